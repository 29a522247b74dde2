//! Rule file commands

use std::path::Path;

use anyhow::Result;
use tally_core::Config;

use super::load_rules;

pub fn cmd_rules_check(config: &Config, path: &Path) -> Result<()> {
    let engine = load_rules(config, path)?;

    println!();
    println!("📋 Rules in {}", path.display());
    println!("   ─────────────────────────────────────────────────────────────");
    for (idx, rule) in engine.rules().iter().enumerate() {
        println!("   {:>3}. {} → {}", idx + 1, rule.name(), rule.account);
    }

    if !engine.skipped().is_empty() {
        println!();
        println!("⚠️  Skipped:");
        for reason in engine.skipped() {
            println!("   {}", reason);
        }
    }

    let failures = engine.self_test();
    if !failures.is_empty() {
        println!();
        println!("❌ Failing rule tests:");
        for (rule, samples) in &failures {
            for sample in samples {
                println!("   '{}' does not match '{}'", rule, sample);
            }
        }
    }

    if engine.skipped().is_empty() && failures.is_empty() {
        println!();
        println!("✅ {} rules OK", engine.rules().len());
        Ok(())
    } else {
        anyhow::bail!(
            "{} rules skipped, {} rules with failing tests",
            engine.skipped().len(),
            failures.len()
        )
    }
}

pub fn cmd_rules_test(config: &Config, path: &Path, text: &str) -> Result<()> {
    let engine = load_rules(config, path)?;
    let matches = engine.test_rules(text);

    if matches.is_empty() {
        println!("No rules match '{}'", text);
        return Ok(());
    }

    println!("Rules matching '{}':", text);
    for (position, (idx, rule)) in matches.iter().enumerate() {
        let marker = if position == 0 { "→" } else { " " };
        println!("  {} {:>3}. {} → {}", marker, idx + 1, rule.name(), rule.account);
    }
    Ok(())
}
