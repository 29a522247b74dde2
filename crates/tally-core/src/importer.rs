//! Importers: turning bank exports into transaction records
//!
//! Every importer yields pending half-entries: one posting on the account the file
//! belongs to and one on the unknown counter-account, waiting for the rule engine.
//! When the source carries a unique id it goes into `meta[match-key]`.

use std::collections::HashMap;
use std::io::Read;
use std::str::FromStr;

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord};
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{Config, ImportConfig};
use crate::error::{Error, Result};
use crate::models::{Amount, MetaValue, Posting, TransactionRecord};

/// A source format
pub trait Importer {
    fn name(&self) -> &str;

    /// Whether this importer understands a file with these column headers
    fn identify(&self, header: &[String]) -> bool;

    fn extract(&self, reader: &mut dyn Read) -> Result<Vec<TransactionRecord>>;
}

/// Resolved column positions for one file
#[derive(Debug, Default)]
struct Columns {
    date: Option<usize>,
    narration: Option<usize>,
    payee: Option<usize>,
    amount: Option<usize>,
    debit: Option<usize>,
    credit: Option<usize>,
    currency: Option<usize>,
    id: Option<usize>,
}

impl Columns {
    fn resolve(header: &[String], config: &ImportConfig) -> Self {
        let index: HashMap<String, usize> = header
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();
        let find = |aliases: &[String]| {
            aliases
                .iter()
                .find_map(|a| index.get(&a.to_lowercase()).copied())
        };

        Self {
            date: find(&config.date_columns),
            narration: find(&config.narration_columns),
            payee: find(&config.payee_columns),
            amount: find(&config.amount_columns),
            debit: find(&config.debit_columns),
            credit: find(&config.credit_columns),
            currency: find(&config.currency_columns),
            id: find(&config.id_columns),
        }
    }

    fn has_amount(&self) -> bool {
        self.amount.is_some() || self.debit.is_some() || self.credit.is_some()
    }
}

/// CSV exports with a header row, columns found through configured aliases
#[derive(Debug, Clone)]
pub struct CsvImporter {
    account: String,
    currency: String,
    unknown_account: String,
    pending_flag: char,
    key_meta: String,
    columns: ImportConfig,
}

impl CsvImporter {
    pub fn new(account: impl Into<String>, config: &Config) -> Self {
        Self {
            account: account.into(),
            currency: config.ledger.default_currency.clone(),
            unknown_account: config.ledger.unknown_account().to_string(),
            pending_flag: config.ledger.pending_flag,
            key_meta: config.match_key.meta_key.clone(),
            columns: config.import.clone(),
        }
    }

    /// Currency for rows without a currency column
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    fn parse_date(&self, s: &str) -> Result<NaiveDate> {
        let s = s.trim();
        for fmt in &self.columns.date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
                return Ok(date);
            }
        }
        Err(Error::Import(format!("Unable to parse date: {}", s)))
    }

    /// Signed amount of a row: `amount`, else `credit - debit`
    fn row_amount(&self, columns: &Columns, row: &StringRecord) -> Result<Option<Decimal>> {
        let cell = |idx: Option<usize>| {
            idx.and_then(|i| row.get(i))
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        if let Some(raw) = cell(columns.amount) {
            return parse_amount(raw).map(Some);
        }

        let debit = cell(columns.debit).map(parse_amount).transpose()?;
        let credit = cell(columns.credit).map(parse_amount).transpose()?;
        Ok(match (debit, credit) {
            (None, None) => None,
            (debit, credit) => {
                Some(credit.unwrap_or_default() - debit.map(|d| d.abs()).unwrap_or_default())
            }
        })
    }
}

impl Importer for CsvImporter {
    fn name(&self) -> &str {
        "csv"
    }

    fn identify(&self, header: &[String]) -> bool {
        let columns = Columns::resolve(header, &self.columns);
        columns.date.is_some() && columns.narration.is_some() && columns.has_amount()
    }

    fn extract(&self, reader: &mut dyn Read) -> Result<Vec<TransactionRecord>> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let header: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
        if !self.identify(&header) {
            return Err(Error::Import(format!(
                "Unrecognized CSV header: {}",
                header.join(",")
            )));
        }
        let columns = Columns::resolve(&header, &self.columns);

        let mut records = Vec::new();
        for (line, row) in rdr.records().enumerate() {
            let row = row?;
            let date_cell = columns.date.and_then(|i| row.get(i)).unwrap_or_default();
            if date_cell.trim().is_empty() {
                debug!("Row {}: no date, skipping", line + 2);
                continue;
            }
            let date = self.parse_date(date_cell)?;
            let Some(number) = self.row_amount(&columns, &row)? else {
                debug!("Row {}: no amount, skipping", line + 2);
                continue;
            };

            let text = |idx: Option<usize>| {
                idx.and_then(|i| row.get(i))
                    .map(fold_whitespace)
                    .filter(|s| !s.is_empty())
            };
            let narration = text(columns.narration).unwrap_or_default();
            let currency = text(columns.currency).unwrap_or_else(|| self.currency.clone());
            let units = Amount::new(number, currency);

            let mut record = TransactionRecord::new(date, self.pending_flag, narration)
                .with_posting(Posting::new(self.account.clone(), Some(units.clone())))
                .with_posting(Posting::new(
                    self.unknown_account.clone(),
                    Some(units.negated()),
                ))
                .with_meta("source", self.name());
            record.payee = text(columns.payee);
            if let Some(id) = text(columns.id) {
                record.meta.insert(self.key_meta.clone(), MetaValue::Text(id));
            }
            records.push(record);
        }

        debug!("Parsed {} CSV transactions", records.len());
        Ok(records)
    }
}

/// Parse an amount cell, handling currency symbols, separators and parentheses
pub fn parse_amount(s: &str) -> Result<Decimal> {
    let cleaned: String = s
        .trim()
        .replace(['$', '€', '£', ' ', ','], "")
        .replace('(', "-")
        .replace(')', "");
    let cleaned = cleaned.strip_prefix('+').unwrap_or(&cleaned);

    Decimal::from_str(cleaned).map_err(|_| Error::Import(format!("Unable to parse amount: {}", s)))
}

/// Collapse whitespace runs, line breaks included, into single spaces
fn fold_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
