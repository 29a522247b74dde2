//! Tally Core Library
//!
//! Files freshly imported transactions into a hand-maintained plain-text ledger:
//! - Ledger adapter that keeps untouched text byte-identical
//! - Ordered regex rules that assign the unknown counter-account
//! - Candidate rule mining from unmatched narrations
//! - Match keys and de-duplication, including transfer legs seen from both sides
//! - Chronological merge with an atomic, locked write
//! - Preview mode that classifies without writing the ledger
//! - Generic CSV importer

pub mod config;
pub mod dedup;
pub mod error;
pub mod filing;
pub mod importer;
pub mod ledger;
pub mod matchkey;
pub mod miner;
pub mod models;
pub mod organizer;
pub mod persist;
pub mod preview;
pub mod rules;

pub use config::{default_config_path, parse_config, Config, TransferPolicy};
pub use dedup::{DedupReport, Deduplicator, Supersession};
pub use error::{Error, Result};
pub use filing::{FilingRequest, FilingSummary};
pub use importer::{CsvImporter, Importer};
pub use ledger::{format_transaction, load_tree, LedgerFile};
pub use matchkey::{MatchKey, MatchKeyDeriver};
pub use miner::{CandidateRule, RuleMiner};
pub use models::{Amount, Meta, MetaValue, Posting, TransactionRecord};
pub use organizer::{MergeReport, Organizer};
pub use preview::{PreviewReport, Previewer};
pub use rules::{ClassifyStats, Outcome, Rule, RuleEngine, Scope};
