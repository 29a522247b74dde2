//! Candidate rule mining
//!
//! Counts the narrations that no rule classified so the user can see which rules to
//! write next. Output is advisory only and never feeds back into classification.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::MinerConfig;
use crate::error::Result;

/// Narration normalization used to group near-duplicates
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    pub strip_numbers: bool,
    pub strip_punctuation: bool,
}

impl Normalizer {
    pub fn from_config(config: &MinerConfig) -> Self {
        Self {
            strip_numbers: config.strip_numbers,
            strip_punctuation: config.strip_punctuation,
        }
    }

    /// Case-fold, optionally drop punctuation and digit-bearing tokens, collapse whitespace.
    ///
    /// Normalizing an already normalized string returns it unchanged.
    pub fn normalize(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let cleaned: String = if self.strip_punctuation {
            lowered
                .chars()
                .map(|c| if c.is_alphanumeric() { c } else { ' ' })
                .collect()
        } else {
            lowered
        };

        cleaned
            .split_whitespace()
            .filter(|token| !(self.strip_numbers && token.chars().any(|c| c.is_ascii_digit())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A suggested rule, in the rule file's YAML shape
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRule {
    pub pattern: String,
    pub account: String,
    pub label: String,
    pub hits: usize,
}

#[derive(Debug, Clone)]
pub struct RuleMiner {
    normalizer: Normalizer,
    min_hits: usize,
    placeholder_account: String,
    counts: BTreeMap<String, usize>,
}

impl RuleMiner {
    pub fn new(config: &MinerConfig) -> Self {
        Self {
            normalizer: Normalizer::from_config(config),
            min_hits: config.min_hits,
            placeholder_account: config.placeholder_account.clone(),
            counts: BTreeMap::new(),
        }
    }

    /// Count one unmatched narration
    pub fn record(&mut self, narration: &str) {
        let normalized = self.normalizer.normalize(narration);
        if normalized.is_empty() {
            return;
        }
        *self.counts.entry(normalized).or_insert(0) += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Buckets by hit count descending, then narration ascending
    pub fn summarize(&self) -> Vec<(String, usize)> {
        let mut summary: Vec<(String, usize)> =
            self.counts.iter().map(|(n, c)| (n.clone(), *c)).collect();
        // BTreeMap iteration is already narration-ordered; a stable sort keeps it for ties
        summary.sort_by(|a, b| b.1.cmp(&a.1));
        summary
    }

    /// Rule skeletons for every bucket seen at least `min_hits` times
    pub fn candidate_rules(&self, account: &str, min_hits: usize) -> Vec<CandidateRule> {
        self.summarize()
            .into_iter()
            .filter(|(_, hits)| *hits >= min_hits)
            .map(|(narration, hits)| CandidateRule {
                pattern: candidate_pattern(&narration),
                account: account.to_string(),
                label: narration,
                hits,
            })
            .collect()
    }

    /// Candidates using the configured placeholder account and threshold
    pub fn suggestions(&self) -> Vec<CandidateRule> {
        self.candidate_rules(&self.placeholder_account, self.min_hits)
    }
}

/// Case-insensitive pattern matching the words of a normalized narration
fn candidate_pattern(narration: &str) -> String {
    let words: Vec<String> = narration.split_whitespace().map(regex::escape).collect();
    format!("(?i){}", words.join(r"\s+"))
}

/// Serialize candidates as a rule file
pub fn candidates_yaml(candidates: &[CandidateRule]) -> Result<String> {
    Ok(serde_yaml::to_string(candidates)?)
}
