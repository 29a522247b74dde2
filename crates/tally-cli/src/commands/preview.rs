//! Preview command

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{load_tree, Config, Previewer};

use super::load_rules;

pub fn cmd_preview(
    config: &Config,
    host: &Path,
    rules: &Path,
    report_path: &Path,
    candidates_path: &Path,
) -> Result<()> {
    println!("🔍 Previewing pending entries in {}...", host.display());

    let host_files =
        load_tree(host).with_context(|| format!("Failed to read ledger {}", host.display()))?;
    let engine = load_rules(config, rules)?;

    let previewer = Previewer::new(config);
    let report = previewer.run(&host_files, &engine);
    previewer
        .write(&report, report_path, candidates_path)
        .context("Failed to write preview files")?;

    println!("   Pending:    {}", report.pending());
    println!("   Matched:    {}", report.matched);
    println!("   Unmatched:  {}", report.unmatched);
    println!("   Candidates: {}", report.candidates.len());
    println!("✅ Report written to {}", report_path.display());

    Ok(())
}
