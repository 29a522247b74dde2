//! CSV import command

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use tally_core::persist::write_atomic;
use tally_core::{format_transaction, Config, CsvImporter, Importer, RuleMiner};

use super::load_rules;

pub fn cmd_import(
    config: &Config,
    file: &Path,
    account: &str,
    currency: Option<&str>,
    rules: Option<&Path>,
    output: &Path,
) -> Result<()> {
    println!("📥 Importing {}...", file.display());

    let mut importer = CsvImporter::new(account, config);
    if let Some(currency) = currency {
        importer = importer.with_currency(currency);
    }

    let mut reader =
        File::open(file).with_context(|| format!("Failed to open {}", file.display()))?;
    let mut records = importer
        .extract(&mut reader)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    println!("   Parsed:     {}", records.len());

    if let Some(rules) = rules {
        let engine = load_rules(config, rules)?;
        let mut miner = RuleMiner::new(&config.miner);
        let stats = engine.classify_batch(&mut records, &mut miner);
        println!("   Classified: {}", stats.assigned);
        println!("   Unmatched:  {}", stats.unmatched);
    }

    let text = records
        .iter()
        .map(|r| format_transaction(r, config.ledger.indent))
        .collect::<Vec<_>>()
        .join("\n");
    write_atomic(output, &text)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "✅ Wrote {} entries to {}",
        records.len(),
        output.display()
    );
    Ok(())
}
