//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tally - File imported transactions into a plain-text ledger
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Classify, de-duplicate and file transactions into a plain-text ledger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ~/.config/tally/config.toml, then built-in defaults)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify incoming ledgers and merge them into a destination file
    File {
        /// Root ledger (read-only, used for accounts and de-duplication)
        #[arg(long)]
        root: PathBuf,

        /// Destination ledger file to merge into
        #[arg(long)]
        dest: PathBuf,

        /// Only file records dated in this year (defaults to the current year)
        #[arg(long)]
        year: Option<i32>,

        /// Rule file (YAML)
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Also use `match-re` metadata found in the root ledger as rules
        #[arg(long)]
        harvest_rules: bool,

        /// Only file records with a posting on an account matching this regex
        #[arg(long)]
        account: Option<String>,

        /// Write candidate rules for unmatched narrations to this file
        #[arg(long)]
        candidates: Option<PathBuf>,

        /// Show what would be filed without writing the destination
        #[arg(long)]
        dry_run: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        /// Ledger files with imported transactions
        #[arg(required = true)]
        incoming: Vec<PathBuf>,
    },

    /// Classify pending transactions of a ledger and write a report, without changing it
    Preview {
        /// Host ledger to read
        #[arg(long)]
        host: PathBuf,

        /// Rule file (YAML)
        #[arg(long)]
        rules: PathBuf,

        /// Report file with the proposed entries
        #[arg(long)]
        report: PathBuf,

        /// Candidate rules file
        #[arg(long)]
        candidates: PathBuf,
    },

    /// Convert a bank CSV export into a ledger file of pending entries
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,

        /// Account the CSV belongs to (e.g. Liabilities:Card)
        #[arg(short, long)]
        account: String,

        /// Currency for rows without a currency column
        #[arg(short, long)]
        currency: Option<String>,

        /// Pre-classify with this rule file
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Output ledger file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Inspect a rule file
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// Load a rule file and report skipped rules and failing rule tests
    Check {
        /// Rule file (YAML)
        #[arg(long)]
        rules: PathBuf,
    },

    /// Test which rules match a narration
    Test {
        /// Rule file (YAML)
        #[arg(long)]
        rules: PathBuf,

        /// Narration to test
        text: String,
    },
}
