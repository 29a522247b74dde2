//! Preview mode: classify without touching the ledger
//!
//! Reads a host ledger, re-classifies every transaction still awaiting
//! classification against the rules, and writes two files: a report with the
//! proposed entries and a candidate-rules YAML for what nothing matched.

use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::ledger::{format_transaction, LedgerFile};
use crate::miner::{candidates_yaml, CandidateRule, RuleMiner};
use crate::models::TransactionRecord;
use crate::persist::write_atomic;
use crate::rules::{Outcome, RuleEngine};

/// One pending transaction and what the rules would do with it
#[derive(Debug, Clone, Serialize)]
pub struct Proposal {
    /// The record as it would look after classification
    pub record: TransactionRecord,
    /// Name of the matching rule, None when unmatched
    pub rule: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewReport {
    pub proposals: Vec<Proposal>,
    pub matched: usize,
    pub unmatched: usize,
    pub candidates: Vec<CandidateRule>,
}

impl PreviewReport {
    pub fn pending(&self) -> usize {
        self.proposals.len()
    }
}

#[derive(Debug, Clone)]
pub struct Previewer {
    config: Config,
}

impl Previewer {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Classify copies of the host's pending transactions
    pub fn run(&self, host: &[LedgerFile], engine: &RuleEngine) -> PreviewReport {
        let mut miner = RuleMiner::new(&self.config.miner);
        let mut report = PreviewReport::default();

        let pending = host
            .iter()
            .flat_map(LedgerFile::transactions)
            .filter(|tx| engine.needs_classification(tx));

        for tx in pending {
            let mut record = tx.clone();
            let rule = match engine.classify(&mut record) {
                Outcome::Assigned { label, .. } => {
                    report.matched += 1;
                    Some(label)
                }
                Outcome::Unmatched => {
                    report.unmatched += 1;
                    miner.record(&record.narration);
                    None
                }
            };
            report.proposals.push(Proposal { record, rule });
        }

        report.candidates = miner.suggestions();
        info!(
            "Preview: {} pending, {} matched, {} unmatched",
            report.pending(),
            report.matched,
            report.unmatched
        );
        report
    }

    /// Report text: each proposed entry preceded by the rule that produced it
    pub fn render(&self, report: &PreviewReport) -> String {
        let mut out = format!(
            ";; tally preview: {} pending, {} matched, {} unmatched\n",
            report.pending(),
            report.matched,
            report.unmatched
        );
        for proposal in &report.proposals {
            out.push('\n');
            match &proposal.rule {
                Some(rule) => out.push_str(&format!("; rule: {}\n", rule)),
                None => out.push_str("; unmatched\n"),
            }
            out.push_str(&format_transaction(&proposal.record, self.config.ledger.indent));
        }
        out
    }

    /// Write the report and candidate rule files
    pub fn write(
        &self,
        report: &PreviewReport,
        report_path: &Path,
        candidates_path: &Path,
    ) -> Result<()> {
        write_atomic(report_path, &self.render(report))?;
        write_atomic(candidates_path, &candidates_yaml(&report.candidates)?)?;
        info!(
            "Wrote preview to {} and {} candidate rules to {}",
            report_path.display(),
            report.candidates.len(),
            candidates_path.display()
        );
        Ok(())
    }
}
