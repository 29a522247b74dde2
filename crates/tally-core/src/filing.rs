//! The filing pipeline
//!
//! incoming ledgers -> classify -> mine leftovers -> dedup against root and
//! destination -> merge and supersede -> atomic write.
//!
//! Everything before the write happens in memory. A failure anywhere before
//! `Organizer::commit` leaves the destination untouched.

use std::path::PathBuf;

use regex::Regex;
use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::{Error, Result};
use crate::ledger::{self, LedgerFile};
use crate::miner::{candidates_yaml, RuleMiner};
use crate::models::TransactionRecord;
use crate::organizer::Organizer;
use crate::persist::write_atomic;
use crate::rules::RuleEngine;

/// Inputs of one filing run
#[derive(Debug, Clone)]
pub struct FilingRequest {
    /// Root ledger; read-only, its includes are followed
    pub root: PathBuf,
    pub destination: PathBuf,
    /// Ledger files of freshly imported transactions
    pub incoming: Vec<PathBuf>,
    pub year: i32,
    pub rules: Option<PathBuf>,
    /// Also use `match-re` metadata in the root tree as rules
    pub harvest_rules: bool,
    pub account_filter: Option<String>,
    /// Where to write candidate rules for unmatched narrations
    pub candidates: Option<PathBuf>,
    pub dry_run: bool,
}

/// What a filing run did
#[derive(Debug, Clone, Default, Serialize)]
pub struct FilingSummary {
    pub incoming: usize,
    pub rules: usize,
    pub assigned: usize,
    pub unmatched: usize,
    pub duplicates: usize,
    pub transfers_resolved: usize,
    pub inserted: usize,
    /// Pending entries rewritten by a re-import with a new flag
    pub replaced: usize,
    pub excluded_by_year: usize,
    pub excluded_by_account: usize,
    pub warnings: Vec<String>,
    /// Most frequent unmatched narrations
    pub unmatched_narrations: Vec<(String, usize)>,
    pub candidates_written: usize,
    /// Whether the destination file was rewritten
    pub written: bool,
    /// Text of every inserted entry, in file order
    pub inserted_entries: Vec<String>,
}

/// Run the full pipeline
pub fn run(config: &Config, request: &FilingRequest) -> Result<FilingSummary> {
    let root = ledger::load_tree(&request.root)?;
    let mut destination = LedgerFile::load_or_new(&request.destination).map_err(|e| {
        Error::structural(&request.destination, format!("unreadable: {}", e))
    })?;

    let mut engine = match &request.rules {
        Some(path) => RuleEngine::load(path, config)?,
        None => RuleEngine::from_rules(Vec::new(), config),
    };
    if request.harvest_rules {
        engine.harvest_from_ledger(&root);
    }

    let mut records: Vec<TransactionRecord> = Vec::new();
    for path in &request.incoming {
        let file = LedgerFile::load(path)?;
        records.extend(file.transactions().cloned());
    }
    info!(
        "Filing {} incoming records into {}",
        records.len(),
        request.destination.display()
    );

    let mut summary = FilingSummary {
        incoming: records.len(),
        rules: engine.rules().len(),
        ..Default::default()
    };

    let mut miner = RuleMiner::new(&config.miner);
    let stats = engine.classify_batch(&mut records, &mut miner);
    summary.assigned = stats.assigned;
    summary.unmatched = stats.unmatched;
    summary.unmatched_narrations = miner.summarize();

    let existing = root
        .iter()
        .chain(std::iter::once(&destination))
        .flat_map(LedgerFile::transactions);
    let dedup = Deduplicator::new(config).partition(records, existing);
    summary.duplicates = dedup.duplicates;
    summary.transfers_resolved = dedup.transfers_resolved;

    let mut organizer = Organizer::new(config);
    if let Some(filter) = &request.account_filter {
        organizer = organizer.with_account_filter(Regex::new(filter)?);
    }
    let merge = organizer.merge(&root, &mut destination, &dedup.kept, request.year);
    let supersede = organizer.supersede(&root, &mut destination, &dedup.superseded, request.year);
    summary.inserted = merge.inserted;
    summary.replaced = supersede.replaced;
    summary.excluded_by_year = merge.excluded_by_year + supersede.excluded_by_year;
    summary.excluded_by_account = merge.excluded_by_account + supersede.excluded_by_account;
    summary.warnings = merge.warnings;
    summary.warnings.extend(supersede.warnings);
    summary.inserted_entries = destination
        .nodes()
        .iter()
        .filter(|n| n.inserted)
        .map(|n| n.text.trim_start_matches('\n').to_string())
        .collect();

    if !request.dry_run {
        summary.written = organizer.commit(&destination)?;
    }

    if let Some(path) = &request.candidates {
        let candidates = miner.suggestions();
        write_atomic(path, &candidates_yaml(&candidates)?)?;
        summary.candidates_written = candidates.len();
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn request(dir: &Path) -> FilingRequest {
        FilingRequest {
            root: dir.join("main.bean"),
            destination: dir.join("2024.bean"),
            incoming: vec![dir.join("incoming.bean")],
            year: 2024,
            rules: Some(dir.join("rules.yaml")),
            harvest_rules: false,
            account_filter: None,
            candidates: Some(dir.join("candidates.yaml")),
            dry_run: false,
        }
    }

    fn setup(dir: &Path) {
        fs::write(
            dir.join("main.bean"),
            "2020-01-01 open Liabilities:Card\n2020-01-01 open Expenses:Dining\ninclude \"2024.bean\"\n",
        )
        .unwrap();
        fs::write(dir.join("2024.bean"), "; 2024\n").unwrap();
        fs::write(
            dir.join("rules.yaml"),
            "- pattern: \"(?i)starbucks\"\n  account: Expenses:Dining\n",
        )
        .unwrap();
        fs::write(
            dir.join("incoming.bean"),
            "2024-03-01 ! \"STARBUCKS #123\"\n  Liabilities:Card  -4.50 USD\n  Expenses:FIXME\n\n\
             2024-03-02 ! \"Mystery\"\n  Liabilities:Card  -1.00 USD\n  Expenses:FIXME\n",
        )
        .unwrap();
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path());
        let mut req = request(dir.path());
        req.dry_run = true;
        req.candidates = None;

        let summary = run(&Config::default(), &req).unwrap();
        assert_eq!(summary.inserted, 2);
        assert!(!summary.written);
        assert_eq!(summary.inserted_entries.len(), 2);
        assert_eq!(
            fs::read_to_string(dir.path().join("2024.bean")).unwrap(),
            "; 2024\n"
        );
    }

    #[test]
    fn test_bad_account_filter_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path());
        let mut req = request(dir.path());
        req.account_filter = Some("(".into());
        assert!(matches!(
            run(&Config::default(), &req),
            Err(Error::Regex(_))
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("2024.bean")).unwrap(),
            "; 2024\n"
        );
    }

    #[test]
    fn test_run_then_rerun() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path());
        let req = request(dir.path());

        let first = run(&Config::default(), &req).unwrap();
        assert_eq!(first.assigned, 1);
        assert_eq!(first.unmatched, 1);
        assert_eq!(first.inserted, 2);
        assert!(first.written);
        // "Mystery" posts to the unopened unknown account
        assert_eq!(first.warnings.len(), 1);

        let second = run(&Config::default(), &req).unwrap();
        assert_eq!(second.duplicates, 2);
        assert_eq!(second.inserted, 0);
        assert!(!second.written);
    }

    #[test]
    fn test_cleared_reimport_supersedes_pending_entries() {
        let dir = tempfile::tempdir().unwrap();
        setup(dir.path());
        let req = request(dir.path());
        run(&Config::default(), &req).unwrap();

        let cleared = fs::read_to_string(dir.path().join("incoming.bean"))
            .unwrap()
            .replace(" ! \"", " * \"");
        fs::write(dir.path().join("incoming.bean"), cleared).unwrap();

        let second = run(&Config::default(), &req).unwrap();
        assert_eq!(second.replaced, 2);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 0);
        assert!(second.written);

        let text = fs::read_to_string(dir.path().join("2024.bean")).unwrap();
        assert!(text.starts_with("; 2024\n"));
        assert!(text.contains("2024-03-01 * \"STARBUCKS #123\"\n"));
        assert!(!text.contains(" ! \""));
        assert_eq!(text.matches("STARBUCKS").count(), 1);

        let third = run(&Config::default(), &req).unwrap();
        assert_eq!(third.duplicates, 2);
        assert_eq!(third.replaced, 0);
        assert!(!third.written);
    }
}
