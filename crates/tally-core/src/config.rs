//! Tally configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path (`--config`), or the user file (~/.config/tally/config.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Every component receives the parts of `Config` it needs at construction.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/tally.toml");

/// How an incoming transfer leg is treated when its counterparty is already filed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferPolicy {
    /// Drop the incoming leg
    #[default]
    KeepExisting,
    /// Keep the incoming leg with zeroed amounts, recording the true amount in meta
    ZeroIncoming,
    /// Keep both legs unchanged
    KeepBoth,
}

impl TransferPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepExisting => "keep-existing",
            Self::ZeroIncoming => "zero-incoming",
            Self::KeepBoth => "keep-both",
        }
    }
}

impl std::str::FromStr for TransferPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "keep-existing" => Ok(Self::KeepExisting),
            "zero-incoming" => Ok(Self::ZeroIncoming),
            "keep-both" => Ok(Self::KeepBoth),
            _ => Err(format!("Unknown transfer policy: {}", s)),
        }
    }
}

impl std::fmt::Display for TransferPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Counter-accounts marking a posting as awaiting classification
    pub unknown_accounts: Vec<String>,
    pub default_currency: String,
    pub pending_flag: char,
    pub cleared_flag: char,
    pub indent: usize,
}

impl LedgerConfig {
    pub fn is_unknown(&self, account: &str) -> bool {
        self.unknown_accounts.iter().any(|a| a == account)
    }

    /// First configured unknown account
    pub fn unknown_account(&self) -> &str {
        self.unknown_accounts
            .first()
            .map(String::as_str)
            .unwrap_or("Expenses:FIXME")
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            unknown_accounts: vec!["Expenses:FIXME".to_string(), "Income:FIXME".to_string()],
            default_currency: "USD".to_string(),
            pending_flag: '!',
            cleared_flag: '*',
            indent: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchKeyConfig {
    pub meta_key: String,
    pub amount_precision: u32,
}

impl Default for MatchKeyConfig {
    fn default() -> Self {
        Self {
            meta_key: "match-key".to_string(),
            amount_precision: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub flag: char,
    pub meta_key: String,
    pub policy: TransferPolicy,
    pub window_days: i64,
    pub amount_meta_key: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            flag: 'T',
            meta_key: "transfer".to_string(),
            policy: TransferPolicy::KeepExisting,
            window_days: 3,
            amount_meta_key: "transfer-amount".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Drop tokens containing digits (amounts, dates, store numbers)
    pub strip_numbers: bool,
    pub strip_punctuation: bool,
    /// Minimum hits before a narration is suggested as a rule
    pub min_hits: usize,
    pub placeholder_account: String,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            strip_numbers: true,
            strip_punctuation: false,
            min_hits: 2,
            placeholder_account: "Expenses:FIXME".to_string(),
        }
    }
}

/// Column aliases for the generic CSV importer (matched case-insensitively)
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub date_formats: Vec<String>,
    pub date_columns: Vec<String>,
    pub narration_columns: Vec<String>,
    pub payee_columns: Vec<String>,
    pub amount_columns: Vec<String>,
    pub debit_columns: Vec<String>,
    pub credit_columns: Vec<String>,
    pub currency_columns: Vec<String>,
    pub id_columns: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            date_formats: strings(&["%Y-%m-%d", "%m/%d/%Y", "%m/%d/%y", "%d.%m.%Y"]),
            date_columns: strings(&["date", "transaction date", "posted date", "posting date"]),
            narration_columns: strings(&["narration", "description", "memo", "details", "notes"]),
            payee_columns: strings(&["payee", "merchant", "name"]),
            amount_columns: strings(&["amount"]),
            debit_columns: strings(&["debit", "withdrawal"]),
            credit_columns: strings(&["credit", "deposit"]),
            currency_columns: strings(&["currency"]),
            id_columns: strings(&["id", "fitid", "reference", "transaction id"]),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub match_key: MatchKeyConfig,
    pub transfers: TransferConfig,
    pub miner: MinerConfig,
    pub import: ImportConfig,
}

impl Config {
    /// Load configuration (explicit path, then user file, then embedded defaults)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                Error::Config(format!("Failed to read config {}: {}", path.display(), e))
            })?,
            None => match default_config_path() {
                Some(user) if user.exists() => {
                    debug!("Using config override {}", user.display());
                    fs::read_to_string(&user).map_err(|e| {
                        Error::Config(format!("Failed to read config {}: {}", user.display(), e))
                    })?
                }
                _ => DEFAULT_CONFIG.to_string(),
            },
        };

        parse_config(&content)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tally").join("config.toml"))
}

/// Raw config structure for TOML parsing
#[derive(Debug, Deserialize)]
struct RawConfig {
    ledger: Option<RawLedger>,
    match_key: Option<RawMatchKey>,
    transfers: Option<RawTransfers>,
    miner: Option<RawMiner>,
    import: Option<RawImport>,
}

#[derive(Debug, Deserialize)]
struct RawLedger {
    unknown_accounts: Option<Vec<String>>,
    default_currency: Option<String>,
    pending_flag: Option<String>,
    cleared_flag: Option<String>,
    indent: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawMatchKey {
    meta_key: Option<String>,
    amount_precision: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawTransfers {
    flag: Option<String>,
    meta_key: Option<String>,
    policy: Option<String>,
    window_days: Option<i64>,
    amount_meta_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMiner {
    strip_numbers: Option<bool>,
    strip_punctuation: Option<bool>,
    min_hits: Option<usize>,
    placeholder_account: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawImport {
    date_formats: Option<Vec<String>>,
    date_columns: Option<Vec<String>>,
    narration_columns: Option<Vec<String>>,
    payee_columns: Option<Vec<String>>,
    amount_columns: Option<Vec<String>>,
    debit_columns: Option<Vec<String>>,
    credit_columns: Option<Vec<String>>,
    currency_columns: Option<Vec<String>>,
    id_columns: Option<Vec<String>>,
}

fn parse_flag(name: &str, value: &str) -> Result<char> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_whitespace() => Ok(c),
        _ => Err(Error::Config(format!(
            "{} must be a single character, got '{}'",
            name, value
        ))),
    }
}

/// Parse config from TOML content
pub fn parse_config(content: &str) -> Result<Config> {
    let raw: RawConfig = toml::from_str(content)?;
    let mut config = Config::default();

    if let Some(ledger) = raw.ledger {
        if let Some(accounts) = ledger.unknown_accounts {
            if accounts.is_empty() {
                return Err(Error::Config(
                    "ledger.unknown_accounts must list at least one account".into(),
                ));
            }
            config.ledger.unknown_accounts = accounts;
        }
        if let Some(currency) = ledger.default_currency {
            config.ledger.default_currency = currency;
        }
        if let Some(flag) = ledger.pending_flag {
            config.ledger.pending_flag = parse_flag("ledger.pending_flag", &flag)?;
        }
        if let Some(flag) = ledger.cleared_flag {
            config.ledger.cleared_flag = parse_flag("ledger.cleared_flag", &flag)?;
        }
        if let Some(indent) = ledger.indent {
            config.ledger.indent = indent;
        }
    }

    if let Some(match_key) = raw.match_key {
        if let Some(key) = match_key.meta_key {
            config.match_key.meta_key = key;
        }
        if let Some(precision) = match_key.amount_precision {
            config.match_key.amount_precision = precision;
        }
    }

    if let Some(transfers) = raw.transfers {
        if let Some(flag) = transfers.flag {
            config.transfers.flag = parse_flag("transfers.flag", &flag)?;
        }
        if let Some(key) = transfers.meta_key {
            config.transfers.meta_key = key;
        }
        if let Some(policy) = transfers.policy {
            config.transfers.policy = policy.parse().map_err(Error::Config)?;
        }
        if let Some(days) = transfers.window_days {
            if days < 0 {
                return Err(Error::Config("transfers.window_days must be >= 0".into()));
            }
            config.transfers.window_days = days;
        }
        if let Some(key) = transfers.amount_meta_key {
            config.transfers.amount_meta_key = key;
        }
    }

    if let Some(miner) = raw.miner {
        if let Some(strip) = miner.strip_numbers {
            config.miner.strip_numbers = strip;
        }
        if let Some(strip) = miner.strip_punctuation {
            config.miner.strip_punctuation = strip;
        }
        if let Some(hits) = miner.min_hits {
            config.miner.min_hits = hits;
        }
        if let Some(account) = miner.placeholder_account {
            config.miner.placeholder_account = account;
        }
    }

    if let Some(import) = raw.import {
        let target = &mut config.import;
        let lists = [
            (import.date_formats, &mut target.date_formats),
            (import.date_columns, &mut target.date_columns),
            (import.narration_columns, &mut target.narration_columns),
            (import.payee_columns, &mut target.payee_columns),
            (import.amount_columns, &mut target.amount_columns),
            (import.debit_columns, &mut target.debit_columns),
            (import.credit_columns, &mut target.credit_columns),
            (import.currency_columns, &mut target.currency_columns),
            (import.id_columns, &mut target.id_columns),
        ];
        for (value, slot) in lists {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }

    Ok(config)
}
