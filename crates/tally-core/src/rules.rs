//! Rule-based classification
//!
//! Rules are an ordered decision list read from a YAML file:
//!
//! ```yaml
//! - pattern: "(?i)starbucks"
//!   account: Expenses:Dining
//! - pattern: "(?i)(?P<payee>amazon\\.com|amzn mktp us)\\*(?P<order>\\w+)"
//!   account: Expenses:Shopping
//!   scope: narration
//!   match-account: "^Liabilities:"
//!   payee: "{payee}"
//!   meta: { order-id: "{order}" }
//!   tests: ["AMZN Mktp US*MA23B5WO1"]
//! ```
//!
//! The first rule whose pattern matches a record wins. A rule that cannot be read
//! (missing fields, bad regex) is reported and left out of the run.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, LedgerConfig};
use crate::error::{Error, Result};
use crate::ledger::LedgerFile;
use crate::miner::RuleMiner;
use crate::models::{MetaValue, Posting, TransactionRecord};

/// Metadata key that turns a filed transaction into a rule
pub const HARVEST_META_KEY: &str = "match-re";

/// Which record text a rule's pattern is searched in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Narration,
    Payee,
    /// Narration first, then payee
    Any,
}

impl std::str::FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "narration" => Ok(Self::Narration),
            "payee" => Ok(Self::Payee),
            "any" | "both" => Ok(Self::Any),
            _ => Err(format!("Unknown rule scope: {}", s)),
        }
    }
}

/// A compiled classification rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub account: String,
    pub scope: Scope,
    pub label: Option<String>,
    /// The record must also have a posting on a matching account
    pub match_account: Option<Regex>,
    /// Payee to set; `{name}` expands to a capture group
    pub payee: Option<String>,
    pub tags: Vec<String>,
    pub meta: BTreeMap<String, String>,
    /// Sample texts the pattern is expected to match
    pub tests: Vec<String>,
}

impl Rule {
    pub fn new(pattern: &str, account: impl Into<String>) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            account: account.into(),
            scope: Scope::default(),
            label: None,
            match_account: None,
            payee: None,
            tags: Vec::new(),
            meta: BTreeMap::new(),
            tests: Vec::new(),
        })
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Label, or the pattern when the rule has none
    pub fn name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.pattern.as_str())
    }

    /// Captures of the first matching field, if the rule applies to the record
    fn captures<'t>(&self, record: &'t TransactionRecord) -> Option<Captures<'t>> {
        if let Some(account_re) = &self.match_account {
            if !record.accounts().any(|a| account_re.is_match(a)) {
                return None;
            }
        }

        let narration = || self.pattern.captures(&record.narration);
        let payee = || {
            record
                .payee
                .as_deref()
                .and_then(|p| self.pattern.captures(p))
        };

        match self.scope {
            Scope::Narration => narration(),
            Scope::Payee => payee(),
            Scope::Any => narration().or_else(payee),
        }
    }

    /// Rule tests the pattern does not match
    pub fn failing_tests(&self) -> Vec<&str> {
        self.tests
            .iter()
            .filter(|t| !self.pattern.is_match(t))
            .map(String::as_str)
            .collect()
    }
}

/// Replace `{name}` / `{1}` with capture groups
fn expand(template: &str, caps: &Captures<'_>, pattern: &Regex) -> String {
    let mut out = template.to_string();
    for (idx, name) in pattern.capture_names().enumerate().skip(1) {
        let Some(value) = caps.get(idx).map(|m| m.as_str()) else {
            continue;
        };
        out = out.replace(&format!("{{{}}}", idx), value);
        if let Some(name) = name {
            out = out.replace(&format!("{{{}}}", name), value);
        }
    }
    out
}

/// Result of classifying one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Assigned {
        account: String,
        /// Position of the winning rule in the active rule list
        rule_index: usize,
        label: String,
    },
    Unmatched,
}

/// Counts from classifying a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyStats {
    pub assigned: usize,
    pub unmatched: usize,
    /// Records with no unknown posting, left alone
    pub already_classified: usize,
    /// Hits per rule name
    pub by_rule: BTreeMap<String, usize>,
}

/// Rule file entry as written by the user
#[derive(Debug, Deserialize)]
struct RawRule {
    pattern: String,
    account: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default, rename = "match-account")]
    match_account: Option<String>,
    #[serde(default)]
    payee: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    meta: BTreeMap<String, String>,
    #[serde(default)]
    tests: Vec<String>,
}

impl RawRule {
    fn compile(self) -> std::result::Result<Rule, String> {
        let pattern = Regex::new(&self.pattern)
            .map_err(|e| format!("invalid pattern '{}': {}", self.pattern, e))?;
        let match_account = self
            .match_account
            .map(|re| Regex::new(&re).map_err(|e| format!("invalid match-account '{}': {}", re, e)))
            .transpose()?;
        let scope = match self.scope {
            Some(s) => s.parse()?,
            None => Scope::default(),
        };
        if self.account.trim().is_empty() {
            return Err("empty account".into());
        }

        Ok(Rule {
            pattern,
            account: self.account,
            scope,
            label: self.label,
            match_account,
            payee: self.payee,
            tags: self.tags,
            meta: self.meta,
            tests: self.tests,
        })
    }
}

/// Ordered rule list plus the ledger conventions needed to rewrite postings
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: Vec<Rule>,
    ledger: LedgerConfig,
    /// Entries skipped while loading, with the reason
    skipped: Vec<String>,
}

impl RuleEngine {
    pub fn from_rules(rules: Vec<Rule>, config: &Config) -> Self {
        Self {
            rules,
            ledger: config.ledger.clone(),
            skipped: Vec::new(),
        }
    }

    /// Load a YAML rule file
    pub fn load(path: &Path, config: &Config) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read rules {}: {}", path.display(), e))
        })?;
        let engine = Self::from_yaml(&content, config)?;
        info!(
            "Loaded {} rules from {} ({} skipped)",
            engine.rules.len(),
            path.display(),
            engine.skipped.len()
        );
        Ok(engine)
    }

    /// Parse rules from YAML: a list, or a mapping with a `rules` list
    pub fn from_yaml(content: &str, config: &Config) -> Result<Self> {
        let doc: serde_yaml::Value = serde_yaml::from_str(content)?;
        let entries = match doc {
            serde_yaml::Value::Sequence(entries) => entries,
            serde_yaml::Value::Mapping(mut map) => match map.remove("rules") {
                Some(serde_yaml::Value::Sequence(entries)) => entries,
                _ => return Err(Error::Config("Rule file has no 'rules' list".into())),
            },
            serde_yaml::Value::Null => Vec::new(),
            _ => return Err(Error::Config("Rule file must be a list of rules".into())),
        };

        let mut engine = Self::from_rules(Vec::new(), config);
        for (idx, entry) in entries.into_iter().enumerate() {
            let compiled = serde_yaml::from_value::<RawRule>(entry)
                .map_err(|e| e.to_string())
                .and_then(RawRule::compile);
            match compiled {
                Ok(rule) => engine.rules.push(rule),
                Err(reason) => {
                    warn!("Skipping rule #{}: {}", idx + 1, reason);
                    engine.skipped.push(format!("rule #{}: {}", idx + 1, reason));
                }
            }
        }

        for (rule, failures) in engine.self_test() {
            for sample in failures {
                warn!("Rule '{}' does not match its test '{}'", rule, sample);
            }
        }

        Ok(engine)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// Rules with failing tests: (rule name, samples not matched)
    pub fn self_test(&self) -> Vec<(String, Vec<String>)> {
        self.rules
            .iter()
            .filter_map(|rule| {
                let failures = rule.failing_tests();
                if failures.is_empty() {
                    None
                } else {
                    Some((
                        rule.name().to_string(),
                        failures.into_iter().map(str::to_string).collect(),
                    ))
                }
            })
            .collect()
    }

    /// Append rules from transactions carrying `match-re` metadata.
    ///
    /// The rule account is the transaction's last posting; the payee is copied. A
    /// pattern that does not match its own narration is skipped.
    pub fn harvest_from_ledger(&mut self, files: &[LedgerFile]) -> usize {
        let mut harvested = 0;
        for tx in files.iter().flat_map(LedgerFile::transactions) {
            let Some(pattern) = tx.meta_str(HARVEST_META_KEY) else {
                continue;
            };
            let Some(account) = tx.postings.last().map(|p| p.account.clone()) else {
                warn!("Ignoring {} on {}: no postings", HARVEST_META_KEY, tx.date);
                continue;
            };

            let mut rule = match Rule::new(&pattern, account) {
                Ok(rule) => rule,
                Err(e) => {
                    warn!("Ignoring {} '{}' on {}: {}", HARVEST_META_KEY, pattern, tx.date, e);
                    continue;
                }
            };
            if !rule.pattern.is_match(&tx.narration) {
                warn!(
                    "Ignoring {} '{}' on {}: does not match its own narration '{}'",
                    HARVEST_META_KEY, pattern, tx.date, tx.narration
                );
                continue;
            }
            rule.payee = tx.payee.clone();
            rule.label = Some(format!("{} ({})", pattern, tx.date));
            self.rules.push(rule);
            harvested += 1;
        }

        debug!("Harvested {} rules from ledger metadata", harvested);
        harvested
    }

    /// Whether a record still carries an unknown counter-account or is a half-entry
    pub fn needs_classification(&self, record: &TransactionRecord) -> bool {
        record.postings.len() == 1 || record.accounts().any(|a| self.ledger.is_unknown(a))
    }

    /// Classify a record in place; the first matching rule wins.
    pub fn classify(&self, record: &mut TransactionRecord) -> Outcome {
        let view: &TransactionRecord = record;
        let found = self
            .rules
            .iter()
            .enumerate()
            .find_map(|(idx, rule)| rule.captures(view).map(|caps| (idx, rule, caps)));

        let Some((rule_index, rule, caps)) = found else {
            debug!("No rule for '{}'", view.narration);
            return Outcome::Unmatched;
        };

        // Expand templates before the record is mutated
        let payee = rule.payee.as_ref().map(|t| expand(t, &caps, &rule.pattern));
        let meta: Vec<(String, String)> = rule
            .meta
            .iter()
            .map(|(k, t)| (k.clone(), expand(t, &caps, &rule.pattern)))
            .collect();
        drop(caps);

        self.assign(record, &rule.account);
        if let Some(payee) = payee.filter(|p| !p.is_empty()) {
            record.payee = Some(payee);
        }
        record.tags.extend(rule.tags.iter().cloned());
        for (key, value) in meta {
            record.meta.insert(key, MetaValue::Text(value));
        }

        debug!("'{}' -> {} (rule '{}')", record.narration, rule.account, rule.name());
        Outcome::Assigned {
            account: rule.account.clone(),
            rule_index,
            label: rule.name().to_string(),
        }
    }

    /// Rewrite unknown counter-accounts, or balance a single-posting half-entry
    fn assign(&self, record: &mut TransactionRecord, account: &str) {
        let mut rewritten = false;
        for posting in record
            .postings
            .iter_mut()
            .filter(|p| self.ledger.is_unknown(&p.account))
        {
            posting.account = account.to_string();
            if posting.flag == Some(self.ledger.pending_flag) {
                posting.flag = None;
            }
            rewritten = true;
        }

        if !rewritten && record.postings.len() == 1 {
            let units = record.postings[0].units.as_ref().map(|u| u.negated());
            record.postings.push(Posting::new(account, units));
        }
    }

    /// Classify every record still awaiting classification, reporting misses to the miner
    pub fn classify_batch(
        &self,
        records: &mut [TransactionRecord],
        miner: &mut RuleMiner,
    ) -> ClassifyStats {
        let mut stats = ClassifyStats::default();
        for record in records.iter_mut() {
            if !self.needs_classification(record) {
                stats.already_classified += 1;
                continue;
            }
            match self.classify(record) {
                Outcome::Assigned { label, .. } => {
                    stats.assigned += 1;
                    *stats.by_rule.entry(label).or_insert(0) += 1;
                }
                Outcome::Unmatched => {
                    stats.unmatched += 1;
                    miner.record(&record.narration);
                }
            }
        }

        info!(
            "Classified {} records ({} unmatched, {} already classified)",
            stats.assigned, stats.unmatched, stats.already_classified
        );
        stats
    }

    /// Every rule whose pattern matches the text, in order
    pub fn test_rules(&self, text: &str) -> Vec<(usize, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.pattern.is_match(text))
            .collect()
    }
}
