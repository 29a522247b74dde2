//! Match keys: the identity used to recognise a transaction that was already filed
//!
//! An explicit external id in `meta[match-key]` always wins. Without one, the key is
//! a composite of date, rounded primary amount, currency, primary account and a
//! fingerprint of the normalized narration.

use rust_decimal::Decimal;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::models::{Amount, Posting, TransactionRecord};

/// Hex characters of the narration digest kept in a composite key
const FINGERPRINT_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MatchKey(String);

impl MatchKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MatchKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct MatchKeyDeriver {
    meta_key: String,
    precision: u32,
    unknown_accounts: Vec<String>,
}

impl MatchKeyDeriver {
    pub fn new(config: &Config) -> Self {
        Self {
            meta_key: config.match_key.meta_key.clone(),
            precision: config.match_key.amount_precision,
            unknown_accounts: config.ledger.unknown_accounts.clone(),
        }
    }

    pub fn meta_key(&self) -> &str {
        &self.meta_key
    }

    /// Primary identity of a record
    pub fn derive(&self, record: &TransactionRecord) -> MatchKey {
        match record.meta_str(&self.meta_key) {
            Some(id) => MatchKey(id),
            None => self.composite(record),
        }
    }

    /// Primary key followed by any numbered keys (`match-key-1`, `match-key-2`, ...)
    pub fn derive_all(&self, record: &TransactionRecord) -> Vec<MatchKey> {
        let mut keys = vec![self.derive(record)];
        let prefix = format!("{}-", self.meta_key);

        let mut numbered: Vec<(u32, String)> = record
            .meta
            .keys()
            .filter_map(|k| {
                let n = k.strip_prefix(&prefix)?.parse::<u32>().ok()?;
                Some((n, record.meta_str(k)?))
            })
            .collect();
        numbered.sort();

        for (_, id) in numbered {
            let key = MatchKey(id);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// `date|amount|currency|account|fingerprint`
    fn composite(&self, record: &TransactionRecord) -> MatchKey {
        let (amount, currency, account) = match self.primary(record) {
            Some((account, Some(units))) => (self.round(units.number), units.currency, account),
            Some((account, None)) => (String::new(), String::new(), account),
            None => (String::new(), String::new(), String::new()),
        };

        MatchKey(format!(
            "{}|{}|{}|{}|{}",
            record.date.format("%Y-%m-%d"),
            amount,
            currency,
            account,
            narration_fingerprint(&record.narration)
        ))
    }

    /// Account and units the composite key is built from, independent of posting order.
    ///
    /// Candidates rank by balance-sheet root (Assets, Liabilities) first, then account,
    /// currency and amount. Unknown accounts count only when nothing else has units. A
    /// single posting without units takes the balancing amount of the others.
    fn primary(&self, record: &TransactionRecord) -> Option<(String, Option<Amount>)> {
        let elided = elided_units(record);
        let resolved: Vec<(&Posting, Amount)> = record
            .postings
            .iter()
            .filter_map(|p| match &p.units {
                Some(units) => Some((p, units.clone())),
                None => elided.clone().map(|units| (p, units)),
            })
            .collect();

        let rank = |(p, units): &&(&Posting, Amount)| {
            (
                !is_balance_sheet(&p.account),
                p.account.clone(),
                units.currency.clone(),
                units.number,
            )
        };
        let known = resolved
            .iter()
            .filter(|(p, _)| !self.unknown_accounts.contains(&p.account))
            .min_by_key(rank);

        match known.or_else(|| resolved.iter().min_by_key(rank)) {
            Some((p, units)) => Some((p.account.clone(), Some(units.clone()))),
            None => record
                .postings
                .iter()
                .map(|p| p.account.clone())
                .min()
                .map(|account| (account, None)),
        }
    }

    fn round(&self, number: Decimal) -> String {
        let mut rounded = number.round_dp(self.precision);
        if rounded.is_zero() {
            rounded = Decimal::ZERO;
        }
        rounded.rescale(self.precision);
        rounded.to_string()
    }
}

fn is_balance_sheet(account: &str) -> bool {
    matches!(account.split(':').next(), Some("Assets" | "Liabilities"))
}

/// Balancing units for the one posting left blank, when the others share a currency
/// and carry no cost or price
fn elided_units(record: &TransactionRecord) -> Option<Amount> {
    let blank = record.postings.iter().filter(|p| p.units.is_none()).count();
    if blank != 1 || record.postings.iter().any(|p| p.suffix.is_some()) {
        return None;
    }

    let mut units = record.postings.iter().filter_map(|p| p.units.as_ref());
    let first = units.next()?;
    let mut sum = first.number;
    for other in units {
        if other.currency != first.currency {
            return None;
        }
        sum += other.number;
    }
    Some(Amount::new(-sum, first.currency.clone()))
}

/// Digest of the narration with case and whitespace variance removed
pub fn narration_fingerprint(narration: &str) -> String {
    let normalized = narration
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let digest = hex::encode(Sha256::digest(normalized.as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn record(narration: &str, amount: &str) -> TransactionRecord {
        TransactionRecord::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), '!', narration)
            .with_posting(Posting::new(
                "Liabilities:Card",
                Some(Amount::new(Decimal::from_str(amount).unwrap(), "USD")),
            ))
            .with_posting(Posting::new(
                "Expenses:FIXME",
                Some(Amount::new(-Decimal::from_str(amount).unwrap(), "USD")),
            ))
    }

    fn deriver() -> MatchKeyDeriver {
        MatchKeyDeriver::new(&Config::default())
    }

    #[test]
    fn test_external_id_wins() {
        let a = record("STARBUCKS #123", "-4.50").with_meta("match-key", "FITID-1");
        let b = record("Starbucks coffee", "-9.99").with_meta("match-key", "FITID-1");
        assert_eq!(deriver().derive(&a), MatchKey::from("FITID-1"));
        assert_eq!(deriver().derive(&a), deriver().derive(&b));
    }

    #[test]
    fn test_composite_key() {
        let key = deriver().derive(&record("STARBUCKS #123", "-4.5"));
        let parts: Vec<&str> = key.as_str().split('|').collect();
        assert_eq!(parts[..4], ["2024-03-01", "-4.50", "USD", "Liabilities:Card"]);
        assert_eq!(parts[4].len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_composite_ignores_case_spacing_and_rounding_noise() {
        let a = record("STARBUCKS   #123", "-4.500");
        let b = record("starbucks #123", "-4.50");
        assert_eq!(deriver().derive(&a), deriver().derive(&b));

        let c = record("starbucks #124", "-4.50");
        assert_ne!(deriver().derive(&b), deriver().derive(&c));
    }

    #[test]
    fn test_primary_posting_skips_unknown_account() {
        let mut tx = record("Refund", "10");
        tx.postings.reverse();
        let key = deriver().derive(&tx);
        assert!(key.as_str().contains("|10.00|USD|Liabilities:Card|"));
    }

    #[test]
    fn test_composite_ignores_posting_order() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let units = |n: &str| Some(Amount::new(Decimal::from_str(n).unwrap(), "USD"));
        let transfer = TransactionRecord::new(date, '*', "Card payment")
            .with_posting(Posting::new("Liabilities:Card", units("200")))
            .with_posting(Posting::new("Assets:Bank", units("-200")));
        let mut reversed = transfer.clone();
        reversed.postings.reverse();

        let key = deriver().derive(&transfer);
        assert_eq!(key, deriver().derive(&reversed));
        assert!(key.as_str().contains("|-200.00|USD|Assets:Bank|"));

        let expense = TransactionRecord::new(date, '*', "Lunch")
            .with_posting(Posting::new("Expenses:Dining", units("12")))
            .with_posting(Posting::new("Liabilities:Card", units("-12")));
        assert!(deriver()
            .derive(&expense)
            .as_str()
            .contains("|-12.00|USD|Liabilities:Card|"));
    }

    #[test]
    fn test_composite_fills_elided_units() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let written = TransactionRecord::new(date, '!', "STARBUCKS #123")
            .with_posting(Posting::new(
                "Expenses:Dining",
                Some(Amount::new(Decimal::from_str("4.50").unwrap(), "USD")),
            ))
            .with_posting(Posting::new("Liabilities:Card", None));

        assert_eq!(
            deriver().derive(&written),
            deriver().derive(&record("STARBUCKS #123", "-4.50"))
        );
    }

    #[test]
    fn test_derive_all_collects_numbered_keys() {
        let tx = record("Transfer", "-500")
            .with_meta("match-key", "bank-1")
            .with_meta("match-key-2", "card-9")
            .with_meta("match-key-1", "card-7")
            .with_meta("match-key-x", "ignored")
            .with_meta("match-key-3", "bank-1");
        let keys: Vec<String> = deriver()
            .derive_all(&tx)
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["bank-1", "card-7", "card-9"]);
    }

    #[test]
    fn test_derive_is_stable() {
        let tx = record("Gym membership", "-30");
        assert_eq!(deriver().derive(&tx), deriver().derive(&tx.clone()));
    }
}
