//! Filing command

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Datelike;
use tally_core::filing::{self, FilingRequest, FilingSummary};
use tally_core::Config;

use super::truncate;

/// Arguments of `tally file`
#[derive(Debug, Clone)]
pub struct FileArgs {
    pub root: PathBuf,
    pub dest: PathBuf,
    pub year: Option<i32>,
    pub rules: Option<PathBuf>,
    pub harvest_rules: bool,
    pub account: Option<String>,
    pub candidates: Option<PathBuf>,
    pub dry_run: bool,
    pub incoming: Vec<PathBuf>,
}

impl FileArgs {
    fn into_request(self) -> FilingRequest {
        FilingRequest {
            root: self.root,
            destination: self.dest,
            incoming: self.incoming,
            year: self.year.unwrap_or_else(|| chrono::Local::now().year()),
            rules: self.rules,
            harvest_rules: self.harvest_rules,
            account_filter: self.account,
            candidates: self.candidates,
            dry_run: self.dry_run,
        }
    }
}

pub fn cmd_file(config: &Config, args: FileArgs, json: bool) -> Result<()> {
    let request = args.into_request();
    if !json {
        println!(
            "📥 Filing {} file(s) into {} (year {})...",
            request.incoming.len(),
            request.destination.display(),
            request.year
        );
    }

    let summary = filing::run(config, &request)
        .with_context(|| format!("Filing into {} failed", request.destination.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&summary, &request);
    Ok(())
}

fn print_summary(summary: &FilingSummary, request: &FilingRequest) {
    println!("   Incoming:      {}", summary.incoming);
    println!("   Rules:         {}", summary.rules);
    println!("   Classified:    {}", summary.assigned);
    println!("   Unmatched:     {}", summary.unmatched);
    println!("   Duplicates:    {}", summary.duplicates);
    if summary.replaced > 0 {
        println!("   Superseded:    {}", summary.replaced);
    }
    if summary.transfers_resolved > 0 {
        println!("   Transfers:     {}", summary.transfers_resolved);
    }
    if summary.excluded_by_year > 0 {
        println!(
            "   Other years:   {} (not filed; re-run with --year)",
            summary.excluded_by_year
        );
    }
    if summary.excluded_by_account > 0 {
        println!("   Filtered out:  {}", summary.excluded_by_account);
    }

    if !summary.warnings.is_empty() {
        println!();
        println!("⚠️  Warnings:");
        for warning in &summary.warnings {
            println!("   {}", warning);
        }
    }

    if !summary.unmatched_narrations.is_empty() {
        println!();
        println!("🔍 Top unmatched narrations:");
        for (narration, hits) in summary.unmatched_narrations.iter().take(10) {
            println!("   {:>4}  {}", hits, truncate(narration, 60));
        }
    }
    if let Some(path) = &request.candidates {
        println!(
            "   Wrote {} candidate rules to {}",
            summary.candidates_written,
            path.display()
        );
    }

    println!();
    if request.dry_run {
        println!("📝 Dry run: {} entries would be filed", summary.inserted);
        for entry in &summary.inserted_entries {
            println!();
            print!("{}", entry);
        }
    } else if summary.written {
        println!(
            "✅ Filed {} entries into {}",
            summary.inserted,
            request.destination.display()
        );
    } else {
        println!("✅ Nothing new to file");
    }
}
