//! Domain models for Tally

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Metadata attached to a transaction or posting
pub type Meta = BTreeMap<String, MetaValue>;

/// A scalar metadata value as it appears in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaValue {
    /// Quoted string
    Text(String),
    Number(Decimal),
    Bool(bool),
    Date(NaiveDate),
    /// Unquoted token (account, currency, tag...)
    Raw(String),
}

impl MetaValue {
    /// Plain string form of the value, without ledger quoting
    pub fn value_string(&self) -> String {
        match self {
            Self::Text(s) | Self::Raw(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Bool(true) => "TRUE".to_string(),
            Self::Bool(false) => "FALSE".to_string(),
            Self::Date(d) => d.to_string(),
        }
    }

    /// Whether the value reads as "yes" (TRUE, "true", "yes", non-zero)
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Number(n) => !n.is_zero(),
            Self::Text(s) | Self::Raw(s) => {
                matches!(s.to_lowercase().as_str(), "true" | "yes" | "1" | "y")
            }
            Self::Date(_) => true,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl std::fmt::Display for MetaValue {
    /// Ledger syntax form (strings quoted and escaped)
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "\"{}\"", escape(s)),
            other => write!(f, "{}", other.value_string()),
        }
    }
}

/// Escape a string for use inside ledger double quotes.
///
/// Line breaks become spaces: ledger strings do not span lines.
pub fn escape(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

/// A number with its commodity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub number: Decimal,
    pub currency: String,
}

impl Amount {
    pub fn new(number: Decimal, currency: impl Into<String>) -> Self {
        Self {
            number,
            currency: currency.into(),
        }
    }

    pub fn negated(&self) -> Self {
        Self {
            number: -self.number,
            currency: self.currency.clone(),
        }
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.number, self.currency)
    }
}

/// One leg of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub flag: Option<char>,
    pub account: String,
    /// None for an auto-balanced leg
    pub units: Option<Amount>,
    /// Cost/price annotations, kept verbatim
    pub suffix: Option<String>,
    pub meta: Meta,
}

impl Posting {
    pub fn new(account: impl Into<String>, units: Option<Amount>) -> Self {
        Self {
            flag: None,
            account: account.into(),
            units,
            suffix: None,
            meta: Meta::new(),
        }
    }

    pub fn with_flag(mut self, flag: char) -> Self {
        self.flag = Some(flag);
        self
    }
}

/// The common in-memory transaction shape produced by importers and the ledger reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub date: NaiveDate,
    /// '*' cleared, '!' pending, 'T' transfer (configurable)
    pub flag: char,
    pub payee: Option<String>,
    pub narration: String,
    pub tags: BTreeSet<String>,
    pub links: BTreeSet<String>,
    pub postings: Vec<Posting>,
    pub meta: Meta,
}

impl TransactionRecord {
    pub fn new(date: NaiveDate, flag: char, narration: impl Into<String>) -> Self {
        Self {
            date,
            flag,
            payee: None,
            narration: narration.into(),
            tags: BTreeSet::new(),
            links: BTreeSet::new(),
            postings: Vec::new(),
            meta: Meta::new(),
        }
    }

    pub fn with_payee(mut self, payee: impl Into<String>) -> Self {
        self.payee = Some(payee.into());
        self
    }

    pub fn with_posting(mut self, posting: Posting) -> Self {
        self.postings.push(posting);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    /// Non-empty string value of a metadata key
    pub fn meta_str(&self, key: &str) -> Option<String> {
        self.meta
            .get(key)
            .map(MetaValue::value_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn accounts(&self) -> impl Iterator<Item = &str> {
        self.postings.iter().map(|p| p.account.as_str())
    }

    /// Payee when present, otherwise the narration
    pub fn description(&self) -> &str {
        self.payee.as_deref().unwrap_or(&self.narration)
    }
}
