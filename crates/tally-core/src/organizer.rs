//! Filing: merging classified records into a hand-maintained ledger file
//!
//! A merge is a splice into the destination's node list. Each record becomes a new
//! node placed after the last dated directive on or before its date that comes
//! before the first later-dated transaction. Nothing that was already in the file is
//! moved or re-rendered, so removing the inserted nodes gives back the original bytes.
//!
//! The one exception is supersession: a pending entry replaced by a corrected
//! re-import has its node text rewritten in place.
//!
//! Records from years other than the requested one are left out of the run. Callers
//! file one year per destination and re-run for other years.

use std::collections::HashMap;

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{self, DirectiveBody, Directive, LedgerFile, Node, NodeKind};
use crate::dedup::Supersession;
use crate::models::TransactionRecord;
use crate::persist::{self, FileLock};

/// What a merge did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub inserted: usize,
    /// Filed entries rewritten by a superseding re-import
    pub replaced: usize,
    pub excluded_by_year: usize,
    pub excluded_by_account: usize,
    /// Non-fatal problems (postings on accounts not open at the record's date)
    pub warnings: Vec<String>,
}

/// Open/close dates of every account declared in the root tree and destination
#[derive(Debug, Default)]
struct AccountIndex {
    opened: HashMap<String, NaiveDate>,
    closed: HashMap<String, NaiveDate>,
}

impl AccountIndex {
    fn build<'a>(directives: impl Iterator<Item = &'a Directive>) -> Self {
        let mut index = Self::default();
        for directive in directives {
            match &directive.body {
                DirectiveBody::Open { account, .. } => {
                    let entry = index.opened.entry(account.clone()).or_insert(directive.date);
                    *entry = (*entry).min(directive.date);
                }
                DirectiveBody::Close { account } => {
                    index.closed.insert(account.clone(), directive.date);
                }
                _ => {}
            }
        }
        index
    }

    fn is_open(&self, account: &str, date: NaiveDate) -> bool {
        let opened = self.opened.get(account).is_some_and(|open| *open <= date);
        let closed = self.closed.get(account).is_some_and(|close| *close <= date);
        opened && !closed
    }
}

#[derive(Debug, Clone)]
pub struct Organizer {
    indent: usize,
    account_filter: Option<Regex>,
}

impl Organizer {
    pub fn new(config: &Config) -> Self {
        Self {
            indent: config.ledger.indent,
            account_filter: None,
        }
    }

    /// Only file records with a posting on an account matching `filter`
    pub fn with_account_filter(mut self, filter: Regex) -> Self {
        self.account_filter = Some(filter);
        self
    }

    /// Insert `incoming` into `destination` in chronological position.
    ///
    /// `root` is the read-only root ledger tree, consulted with the destination for
    /// account open/close dates. Records outside `year` are excluded.
    pub fn merge(
        &self,
        root: &[LedgerFile],
        destination: &mut LedgerFile,
        incoming: &[TransactionRecord],
        year: i32,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let accounts = AccountIndex::build(
            root.iter()
                .flat_map(LedgerFile::directives)
                .chain(destination.directives()),
        );

        for record in incoming {
            if !self.admits(record, year, &mut report) {
                continue;
            }
            check_accounts(&accounts, record, &mut report);
            self.insert(destination, record);
            report.inserted += 1;
        }

        info!(
            "Merged {} records ({} other years, {} filtered by account)",
            report.inserted, report.excluded_by_year, report.excluded_by_account
        );
        report
    }

    /// Replace filed entries with the re-imports that supersede them.
    ///
    /// A replaced node keeps its position and only its text changes. An entry that is
    /// not in the destination (filed elsewhere in the tree) is left alone with a warning.
    pub fn supersede(
        &self,
        root: &[LedgerFile],
        destination: &mut LedgerFile,
        superseded: &[Supersession],
        year: i32,
    ) -> MergeReport {
        let mut report = MergeReport::default();
        let accounts = AccountIndex::build(
            root.iter()
                .flat_map(LedgerFile::directives)
                .chain(destination.directives()),
        );

        for entry in superseded {
            let record = &entry.replacement;
            if !self.admits(record, year, &mut report) {
                continue;
            }

            let Some(index) = destination.nodes().iter().position(|n| {
                !n.inserted && !n.replaced && n.transaction() == Some(&entry.existing)
            }) else {
                let message = format!(
                    "{} '{}': superseded entry is not in the destination, left unchanged",
                    record.date, record.narration
                );
                warn!("{}", message);
                report.warnings.push(message);
                continue;
            };

            check_accounts(&accounts, record, &mut report);
            let old = &destination.nodes()[index];
            let mut text = ledger::format_transaction(record, self.indent);
            if !old.text.ends_with('\n') {
                text.pop();
            }
            let line = old.line;
            debug!(
                "Line {}: {} '{}' superseded ({} -> {})",
                line, record.date, record.narration, entry.existing.flag, record.flag
            );
            destination.replace_node(
                index,
                Node {
                    text,
                    kind: NodeKind::Directive(Directive {
                        date: record.date,
                        body: DirectiveBody::Transaction(record.clone()),
                    }),
                    line,
                    inserted: false,
                    replaced: true,
                },
            );
            report.replaced += 1;
        }

        if report.replaced > 0 {
            info!("Replaced {} superseded entries", report.replaced);
        }
        report
    }

    /// Year and account filters; counts what they exclude
    fn admits(&self, record: &TransactionRecord, year: i32, report: &mut MergeReport) -> bool {
        if record.year() != year {
            debug!(
                "Excluding {} '{}': not in {}",
                record.date, record.narration, year
            );
            report.excluded_by_year += 1;
            return false;
        }
        if let Some(filter) = &self.account_filter {
            if !record.accounts().any(|a| filter.is_match(a)) {
                debug!(
                    "Excluding {} '{}': no account matches {}",
                    record.date,
                    record.narration,
                    filter.as_str()
                );
                report.excluded_by_account += 1;
                return false;
            }
        }
        true
    }

    fn insert(&self, destination: &mut LedgerFile, record: &TransactionRecord) {
        let rendered = ledger::format_transaction(record, self.indent);
        let nodes = destination.nodes();

        // Directives written out of order further down must not pull the record past
        // a later transaction.
        let bound = nodes.iter().position(|n| {
            n.transaction().is_some() && n.date().is_some_and(|d| d > record.date)
        });
        let after = nodes[..bound.unwrap_or(nodes.len())]
            .iter()
            .rposition(|n| n.date().is_some_and(|d| d <= record.date));
        let first_dated = nodes.iter().position(|n| n.date().is_some());

        let (index, text) = match (after, first_dated) {
            (Some(idx), _) => {
                let sep = if nodes[idx].text.ends_with('\n') {
                    "\n"
                } else {
                    "\n\n"
                };
                (idx + 1, format!("{}{}", sep, rendered))
            }
            (None, Some(idx)) => (idx, format!("{}\n", rendered)),
            (None, None) => {
                let text = destination.text();
                let sep = if text.is_empty() {
                    ""
                } else if text.ends_with('\n') {
                    "\n"
                } else {
                    "\n\n"
                };
                (nodes.len(), format!("{}{}", sep, rendered))
            }
        };

        destination.insert_node(
            index,
            Node {
                text,
                kind: NodeKind::Directive(Directive {
                    date: record.date,
                    body: DirectiveBody::Transaction(record.clone()),
                }),
                line: 0,
                inserted: true,
                replaced: false,
            },
        );
    }

    /// Write a merged destination back to its file.
    ///
    /// Takes the lock, checks the file has not changed since it was loaded, then
    /// replaces it atomically. Returns false when there was nothing to write.
    pub fn commit(&self, destination: &LedgerFile) -> Result<bool> {
        if !destination.is_modified() {
            debug!("Destination unchanged, not writing");
            return Ok(false);
        }
        let path = destination
            .path()
            .ok_or_else(|| Error::InvalidData("Destination ledger has no file path".into()))?;

        let _lock = FileLock::acquire(path)?;

        let on_disk = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(Error::structural(path, format!("unreadable: {}", e))),
        };
        if ledger::fingerprint(&on_disk) != destination.fingerprint() {
            return Err(Error::structural(
                path,
                "file changed on disk since it was loaded",
            ));
        }

        persist::write_atomic(path, &destination.text())?;
        info!("Wrote {}", path.display());
        Ok(true)
    }
}

fn check_accounts(accounts: &AccountIndex, record: &TransactionRecord, report: &mut MergeReport) {
    for account in record.accounts() {
        if !accounts.is_open(account, record.date) {
            let message = format!(
                "{} '{}': account {} is not open on that date",
                record.date, record.narration, account
            );
            warn!("{}", message);
            report.warnings.push(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, Posting};
    use rust_decimal::Decimal;
    use std::fs;
    use std::str::FromStr;

    const DEST: &str = r#";; -*- mode: org; -*-
* Coffee

2024-01-01 open Expenses:Dining
2024-01-01 open Liabilities:Card

2024-01-10 * "Cafe" "Latte"
  Liabilities:Card   -4.00 USD
  Expenses:Dining

; a hand-written note
2024-02-01 * "Cafe" "Mocha"   ; trailing comment
  Liabilities:Card   -5.00 USD
  Expenses:Dining
"#;

    fn tx(y: i32, m: u32, d: u32, narration: &str) -> TransactionRecord {
        TransactionRecord::new(NaiveDate::from_ymd_opt(y, m, d).unwrap(), '*', narration)
            .with_posting(Posting::new(
                "Liabilities:Card",
                Some(Amount::new(Decimal::from_str("-3.00").unwrap(), "USD")),
            ))
            .with_posting(Posting::new("Expenses:Dining", None))
    }

    fn pending(mut record: TransactionRecord) -> TransactionRecord {
        record.flag = '!';
        record
    }

    /// Text with every inserted node removed
    fn without_inserted(file: &LedgerFile) -> String {
        file.nodes()
            .iter()
            .filter(|n| !n.inserted)
            .map(|n| n.text.as_str())
            .collect()
    }

    fn organizer() -> Organizer {
        Organizer::new(&Config::default())
    }

    #[test]
    fn test_empty_merge_is_byte_identical() {
        let mut dest = LedgerFile::parse(DEST);
        let report = organizer().merge(&[], &mut dest, &[], 2024);
        assert_eq!(report, MergeReport::default());
        assert_eq!(dest.text(), DEST);
        assert!(!dest.is_modified());
    }

    #[test]
    fn test_merge_only_inserts() {
        let mut dest = LedgerFile::parse(DEST);
        let incoming = vec![
            tx(2024, 1, 15, "Espresso"),
            tx(2024, 3, 1, "Flat white"),
            tx(2024, 1, 10, "Same day, later"),
        ];
        let report = organizer().merge(&[], &mut dest, &incoming, 2024);

        assert_eq!(report.inserted, 3);
        assert_eq!(without_inserted(&dest), DEST);

        let dates: Vec<NaiveDate> = dest.nodes().iter().filter_map(Node::date).collect();
        let mut sorted = dates.clone();
        sorted.sort();
        assert_eq!(dates, sorted);

        let narrations: Vec<&str> = dest.transactions().map(|t| t.narration.as_str()).collect();
        assert_eq!(
            narrations,
            vec!["Latte", "Same day, later", "Espresso", "Mocha", "Flat white"]
        );

        // comments keep their place relative to the entries around them
        let text = dest.text();
        let note = text.find("; a hand-written note").unwrap();
        assert!(text.find("Espresso").unwrap() < note);
        assert!(note < text.find("Mocha").unwrap());
    }

    #[test]
    fn test_year_filter_excludes_other_years() {
        let mut dest = LedgerFile::parse(DEST);
        let incoming = vec![tx(2023, 12, 31, "Old"), tx(2024, 1, 20, "New")];
        let report = organizer().merge(&[], &mut dest, &incoming, 2024);

        assert_eq!(report.inserted, 1);
        assert_eq!(report.excluded_by_year, 1);
        assert!(!dest.text().contains("\"Old\""));
    }

    #[test]
    fn test_account_filter() {
        let mut dest = LedgerFile::parse(DEST);
        let mut bank = tx(2024, 1, 20, "Bank fee");
        bank.postings[0].account = "Assets:Bank".into();
        let incoming = vec![bank, tx(2024, 1, 21, "Card")];

        let organizer =
            organizer().with_account_filter(Regex::new("^Liabilities:Card$").unwrap());
        let report = organizer.merge(&[], &mut dest, &incoming, 2024);
        assert_eq!(report.inserted, 1);
        assert_eq!(report.excluded_by_account, 1);
    }

    #[test]
    fn test_unopened_account_warns_but_inserts() {
        let root = LedgerFile::parse("2020-01-01 open Expenses:Travel\n2024-06-01 close Expenses:Travel\n");
        let mut dest = LedgerFile::parse(DEST);

        let mut travel = tx(2024, 7, 1, "Hotel");
        travel.postings[1].account = "Expenses:Travel".into();
        let mut early = tx(2024, 1, 5, "No root given");
        early.postings[1].account = "Expenses:Travel".into();
        let fine = tx(2024, 1, 3, "Open already");

        let report = organizer().merge(&[root], &mut dest, &[travel, fine], 2024);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("Expenses:Travel"));

        let report = organizer().merge(&[], &mut dest, &[early], 2024);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_placement_without_dated_predecessor() {
        let mut dest = LedgerFile::parse(DEST);
        organizer().merge(&[], &mut dest, &[tx(2024, 1, 1, "New year")], 2024);
        // opens on the same day are <= the record, so it lands after them
        let narrations: Vec<&str> = dest.transactions().map(|t| t.narration.as_str()).collect();
        assert_eq!(narrations[0], "New year");

        let mut dated_later = LedgerFile::parse("; header\n2024-05-01 open Assets:Bank\n");
        organizer().merge(&[], &mut dated_later, &[tx(2024, 2, 1, "Early")], 2024);
        let text = dated_later.text();
        assert!(text.starts_with("; header\n2024-02-01 * \"Early\"\n"));
        assert!(text.ends_with("\n\n2024-05-01 open Assets:Bank\n"));
    }

    #[test]
    fn test_placement_ignores_late_out_of_order_directive() {
        let text = format!("{}\n2024-01-01 open Expenses:Snacks\n", DEST);
        let mut dest = LedgerFile::parse(&text);
        organizer().merge(&[], &mut dest, &[tx(2024, 1, 15, "Espresso")], 2024);

        let narrations: Vec<&str> = dest.transactions().map(|t| t.narration.as_str()).collect();
        assert_eq!(narrations, vec!["Latte", "Espresso", "Mocha"]);
        assert!(dest
            .text()
            .ends_with("Expenses:Dining\n\n2024-01-01 open Expenses:Snacks\n"));
        assert_eq!(without_inserted(&dest), text);
    }

    #[test]
    fn test_supersede_rewrites_pending_entry_in_place() {
        let pending = r#"2024-01-01 open Liabilities:Card
2024-01-01 open Expenses:Dining

2024-01-10 ! "Latte"
  Liabilities:Card  -3.00 USD
  Expenses:Dining

2024-02-01 * "Mocha"
  Liabilities:Card  -5.00 USD
  Expenses:Dining
"#;
        let mut dest = LedgerFile::parse(pending);
        let existing = dest.transactions().next().unwrap().clone();
        let replacement = tx(2024, 1, 10, "Latte");

        let superseded = vec![Supersession {
            existing,
            replacement,
        }];
        let report = organizer().supersede(&[], &mut dest, &superseded, 2024);

        assert_eq!(report.replaced, 1);
        assert!(dest.is_modified());
        let text = dest.text();
        assert!(!text.contains("! \"Latte\""));
        assert!(text.contains("2024-01-10 * \"Latte\"\n"));
        let flags: Vec<char> = dest.transactions().map(|t| t.flag).collect();
        assert_eq!(flags, vec!['*', '*']);
        assert!(text.ends_with(
            "\n\n2024-02-01 * \"Mocha\"\n  Liabilities:Card  -5.00 USD\n  Expenses:Dining\n"
        ));
    }

    #[test]
    fn test_supersede_missing_entry_warns() {
        let mut dest = LedgerFile::parse(DEST);
        let superseded = vec![Supersession {
            existing: pending(tx(2024, 1, 12, "Elsewhere")),
            replacement: tx(2024, 1, 12, "Elsewhere"),
        }];
        let report = organizer().supersede(&[], &mut dest, &superseded, 2024);
        assert_eq!(report.replaced, 0);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(dest.text(), DEST);

        let other_year = vec![Supersession {
            existing: pending(tx(2023, 5, 1, "Old")),
            replacement: tx(2023, 5, 1, "Old"),
        }];
        let report = organizer().supersede(&[], &mut dest, &other_year, 2024);
        assert_eq!(report.excluded_by_year, 1);
    }

    #[test]
    fn test_append_to_undated_file() {
        let mut dest = LedgerFile::parse("* 2024\n");
        organizer().merge(&[], &mut dest, &[tx(2024, 4, 1, "First")], 2024);
        assert!(dest.text().starts_with("* 2024\n\n2024-04-01 * \"First\"\n"));

        let mut empty = LedgerFile::parse("");
        organizer().merge(&[], &mut empty, &[tx(2024, 4, 1, "First")], 2024);
        assert!(empty.text().starts_with("2024-04-01 * \"First\"\n"));
    }

    #[test]
    fn test_commit_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.bean");
        fs::write(&path, DEST).unwrap();

        let mut dest = LedgerFile::load(&path).unwrap();
        assert!(!organizer().commit(&dest).unwrap());

        organizer().merge(&[], &mut dest, &[tx(2024, 1, 20, "Espresso")], 2024);
        assert!(organizer().commit(&dest).unwrap());

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, dest.text());
        assert!(!dir.path().join("2024.bean.lock").exists());
    }

    #[test]
    fn test_commit_refuses_changed_or_locked_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("2024.bean");
        fs::write(&path, DEST).unwrap();

        let mut dest = LedgerFile::load(&path).unwrap();
        organizer().merge(&[], &mut dest, &[tx(2024, 1, 20, "Espresso")], 2024);

        let lock = FileLock::acquire(&path).unwrap();
        assert!(matches!(
            organizer().commit(&dest),
            Err(Error::StructuralWrite { .. })
        ));
        drop(lock);

        fs::write(&path, format!("{}; edited\n", DEST)).unwrap();
        assert!(matches!(
            organizer().commit(&dest),
            Err(Error::StructuralWrite { .. })
        ));
        assert!(fs::read_to_string(&path).unwrap().ends_with("; edited\n"));
    }

    #[test]
    fn test_commit_new_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.bean");

        let mut dest = LedgerFile::load_or_new(&path).unwrap();
        organizer().merge(&[], &mut dest, &[tx(2024, 4, 1, "First")], 2024);
        assert!(organizer().commit(&dest).unwrap());
        assert!(fs::read_to_string(&path).unwrap().contains("\"First\""));
    }
}
