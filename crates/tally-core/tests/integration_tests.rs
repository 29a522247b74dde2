//! Integration tests for tally-core
//!
//! These tests exercise the full import → classify → dedup → file workflow on
//! temporary ledgers.

use std::fs;
use std::path::Path;

use tally_core::{
    filing::{self, FilingRequest},
    ledger::LedgerFile,
    CsvImporter, Config, Deduplicator, Importer, Organizer, Outcome, RuleEngine, RuleMiner,
    TransferPolicy,
};

const ROOT: &str = r#"option "title" "Household"

2020-01-01 open Assets:Bank          USD
2020-01-01 open Liabilities:Card     USD
2020-01-01 open Expenses:Dining
2020-01-01 open Expenses:Fitness
2020-01-01 open Expenses:FIXME

include "2024.bean"
"#;

const DEST: &str = r#";; -*- mode: org; -*-
* January

2024-01-02 * "Gold's Gym" "GOLDS GYM 0042"
  match-re: "(?i)golds[ ]+gym"
  Liabilities:Card  -30.00 USD
  Expenses:Fitness

* March
; entries below were typed by hand
2024-03-15 * "Lunch with Sam"
  Assets:Bank      -22.00 USD
  Expenses:Dining
"#;

const RULES: &str = r#"
- pattern: "(?i)starbucks"
  account: Expenses:Dining
  label: coffee
- pattern: "(broken"
  account: Expenses:Broken
"#;

const CARD_CSV: &str = "Date,Description,Amount,Reference\n\
03/01/2024,STARBUCKS #123,-4.50,CARD-001\n\
03/03/2024,GOLDS GYM 0043,-30.00,CARD-002\n\
03/05/2024,SQ *FARMERS MKT 18,-12.00,CARD-003\n\
03/06/2024,SQ *FARMERS MKT 19,-14.00,CARD-004\n\
12/30/2023,STARBUCKS #123,-4.50,CARD-000\n";

/// Write the ledger tree and import the card CSV into an incoming ledger
fn setup(dir: &Path, config: &Config) {
    fs::write(dir.join("main.bean"), ROOT).unwrap();
    fs::write(dir.join("2024.bean"), DEST).unwrap();
    fs::write(dir.join("rules.yaml"), RULES).unwrap();

    let records = CsvImporter::new("Liabilities:Card", config)
        .extract(&mut CARD_CSV.as_bytes())
        .unwrap();
    let text: String = records
        .iter()
        .map(|r| tally_core::format_transaction(r, 2))
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(dir.join("incoming.bean"), text).unwrap();
}

fn request(dir: &Path) -> FilingRequest {
    FilingRequest {
        root: dir.join("main.bean"),
        destination: dir.join("2024.bean"),
        incoming: vec![dir.join("incoming.bean")],
        year: 2024,
        rules: Some(dir.join("rules.yaml")),
        harvest_rules: true,
        account_filter: None,
        candidates: Some(dir.join("candidates.yaml")),
        dry_run: false,
    }
}

/// Destination text with every imported entry (and the blank line before it) removed
fn strip_inserted(after: &str) -> String {
    let file = LedgerFile::parse(after);
    let mut kept: Vec<&str> = Vec::new();
    for node in file.nodes() {
        let imported = node
            .transaction()
            .is_some_and(|tx| tx.meta_str("source").is_some());
        if imported {
            if kept.last() == Some(&"\n") {
                kept.pop();
            }
            continue;
        }
        kept.push(node.text.as_str());
    }
    kept.concat()
}

// =============================================================================
// Filing pipeline
// =============================================================================

#[test]
fn test_file_classifies_and_merges() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    setup(dir.path(), &config);

    let summary = filing::run(&config, &request(dir.path())).unwrap();

    assert_eq!(summary.incoming, 5);
    // 1 file rule survives, 1 harvested from match-re
    assert_eq!(summary.rules, 2);
    assert_eq!(summary.assigned, 3);
    assert_eq!(summary.unmatched, 2);
    assert_eq!(summary.excluded_by_year, 1);
    assert_eq!(summary.inserted, 4);
    assert!(summary.written);
    assert_eq!(
        summary.unmatched_narrations,
        vec![("sq *farmers mkt".to_string(), 2)]
    );
    assert_eq!(summary.candidates_written, 1);

    let after = fs::read_to_string(dir.path().join("2024.bean")).unwrap();
    let filed = LedgerFile::parse(&after);

    // starbucks -> Expenses:Dining, gym via the harvested rule
    let starbucks = filed
        .transactions()
        .find(|t| t.narration == "STARBUCKS #123")
        .unwrap();
    assert_eq!(starbucks.postings[1].account, "Expenses:Dining");
    let gym = filed
        .transactions()
        .find(|t| t.narration == "GOLDS GYM 0043")
        .unwrap();
    assert_eq!(gym.postings[1].account, "Expenses:Fitness");
    assert_eq!(gym.payee.as_deref(), Some("Gold's Gym"));

    // year filter: the 2023 row never shows up
    assert!(filed
        .transactions()
        .all(|t| t.date.format("%Y").to_string() == "2024"));

    // chronological, and the hand-written content is byte-identical
    let narrations: Vec<&str> = filed.transactions().map(|t| t.narration.as_str()).collect();
    assert_eq!(
        narrations,
        vec![
            "GOLDS GYM 0042",
            "STARBUCKS #123",
            "GOLDS GYM 0043",
            "SQ *FARMERS MKT 18",
            "SQ *FARMERS MKT 19",
            "Lunch with Sam",
        ]
    );
    assert_eq!(strip_inserted(&after), DEST);

    let candidates = fs::read_to_string(dir.path().join("candidates.yaml")).unwrap();
    assert!(candidates.contains("farmers"));
}

#[test]
fn test_reimport_is_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    setup(dir.path(), &config);

    filing::run(&config, &request(dir.path())).unwrap();
    let after_first = fs::read_to_string(dir.path().join("2024.bean")).unwrap();

    let second = filing::run(&config, &request(dir.path())).unwrap();
    assert_eq!(second.duplicates, 4);
    assert_eq!(second.inserted, 0);
    assert!(!second.written);
    assert_eq!(
        fs::read_to_string(dir.path().join("2024.bean")).unwrap(),
        after_first
    );
}

#[test]
fn test_other_year_needs_its_own_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::default();
    setup(dir.path(), &config);

    let mut req = request(dir.path());
    req.year = 2023;
    req.destination = dir.path().join("2023.bean");
    let summary = filing::run(&config, &req).unwrap();

    assert_eq!(summary.inserted, 1);
    assert_eq!(summary.excluded_by_year, 4);
    let text = fs::read_to_string(dir.path().join("2023.bean")).unwrap();
    assert!(text.starts_with("2023-12-30 ! \"STARBUCKS #123\"\n"));
}

// =============================================================================
// Component wiring
// =============================================================================

#[test]
fn test_starbucks_end_to_end() {
    let config = Config::default();
    let engine = RuleEngine::from_yaml(
        "- pattern: \"(?i)starbucks\"\n  account: Expenses:Dining\n",
        &config,
    )
    .unwrap();

    let mut incoming = CsvImporter::new("Liabilities:Card", &config)
        .extract(&mut "Date,Description,Amount\n2024-03-01,STARBUCKS #123,-4.50\n".as_bytes())
        .unwrap();
    let mut miner = RuleMiner::new(&config.miner);
    engine.classify_batch(&mut incoming, &mut miner);
    assert_eq!(incoming[0].postings[1].account, "Expenses:Dining");
    assert!(miner.is_empty());

    let mut destination = LedgerFile::parse("");
    let dedup = Deduplicator::new(&config);
    let fresh = dedup.filter_new(incoming.clone(), destination.transactions());
    Organizer::new(&config).merge(&[], &mut destination, &fresh, 2024);

    // second run: same row, same key
    let mut again = incoming.clone();
    let mut record = again[0].clone();
    assert!(matches!(
        engine.classify(&mut record),
        Outcome::Assigned { .. }
    ));
    again[0] = record;
    assert!(dedup
        .filter_new(again, destination.transactions())
        .is_empty());
}

#[test]
fn test_transfer_policy_is_configurable() {
    let bank = LedgerFile::parse(
        "2024-04-01 * \"Card payment\"\n  Assets:Bank  -250.00 USD\n  Liabilities:Card  250.00 USD\n",
    );
    let card_leg = LedgerFile::parse(
        "2024-04-02 * \"PAYMENT THANK YOU\"\n  transfer: TRUE\n  Liabilities:Card  250.00 USD\n  Assets:Bank  -250.00 USD\n",
    );
    let incoming: Vec<_> = card_leg.transactions().cloned().collect();

    let mut config = Config::default();
    let kept = Deduplicator::new(&config).filter_new(incoming.clone(), bank.transactions());
    assert!(kept.is_empty());

    config.transfers.policy = TransferPolicy::ZeroIncoming;
    let kept = Deduplicator::new(&config).filter_new(incoming, bank.transactions());
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].meta_str("transfer-amount").as_deref(), Some("250.00 USD"));
}
