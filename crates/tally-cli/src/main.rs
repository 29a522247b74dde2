//! Tally CLI - File imported transactions into a plain-text ledger
//!
//! Usage:
//!   tally import --file card.csv --account Liabilities:Card --output incoming.bean
//!   tally file --root main.bean --dest 2024.bean --rules rules.yaml incoming.bean
//!   tally preview --host main.bean --rules rules.yaml --report preview.bean --candidates new.yaml
//!   tally rules test --rules rules.yaml "STARBUCKS #123"

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::File {
            root,
            dest,
            year,
            rules,
            harvest_rules,
            account,
            candidates,
            dry_run,
            json,
            incoming,
        } => commands::cmd_file(
            &config,
            commands::FileArgs {
                root,
                dest,
                year,
                rules,
                harvest_rules,
                account,
                candidates,
                dry_run,
                incoming,
            },
            json,
        ),
        Commands::Preview {
            host,
            rules,
            report,
            candidates,
        } => commands::cmd_preview(&config, &host, &rules, &report, &candidates),
        Commands::Import {
            file,
            account,
            currency,
            rules,
            output,
        } => commands::cmd_import(
            &config,
            &file,
            &account,
            currency.as_deref(),
            rules.as_deref(),
            &output,
        ),
        Commands::Rules { action } => match action {
            RulesAction::Check { rules } => commands::cmd_rules_check(&config, &rules),
            RulesAction::Test { rules, text } => commands::cmd_rules_test(&config, &rules, &text),
        },
    }
}
