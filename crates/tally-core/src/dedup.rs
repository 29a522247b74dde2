//! De-duplication of incoming records against what is already filed
//!
//! A candidate is dropped when any of its match keys is already present. Transfer
//! legs get one more check: the other side of the movement may already be filed
//! under a different key (imported from the other account's feed). What happens
//! then is the configured `TransferPolicy`.
//!
//! A key match against a filed entry that is neither cleared nor flagged like the
//! candidate is a correction rather than a repeat: the candidate supersedes it.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::config::{Config, LedgerConfig, TransferConfig, TransferPolicy};
use crate::matchkey::{MatchKey, MatchKeyDeriver};
use crate::models::{MetaValue, TransactionRecord};

/// Outcome of partitioning a batch
#[derive(Debug, Clone, Default)]
pub struct DedupReport {
    /// Genuinely new records, in input order
    pub kept: Vec<TransactionRecord>,
    /// Dropped because a key was already present
    pub duplicates: usize,
    /// Transfer legs whose counterparty was already filed
    pub transfers_resolved: usize,
    /// Filed entries to be rewritten by a corrected re-import
    pub superseded: Vec<Supersession>,
}

/// A filed entry and the re-import that replaces it
#[derive(Debug, Clone, PartialEq)]
pub struct Supersession {
    pub existing: TransactionRecord,
    pub replacement: TransactionRecord,
}

#[derive(Debug, Clone)]
pub struct Deduplicator {
    deriver: MatchKeyDeriver,
    transfers: TransferConfig,
    ledger: LedgerConfig,
}

impl Deduplicator {
    pub fn new(config: &Config) -> Self {
        Self {
            deriver: MatchKeyDeriver::new(config),
            transfers: config.transfers.clone(),
            ledger: config.ledger.clone(),
        }
    }

    pub fn policy(&self) -> TransferPolicy {
        self.transfers.policy
    }

    /// Candidates not already present in `existing`, in input order
    pub fn filter_new<'a, I>(
        &self,
        candidates: Vec<TransactionRecord>,
        existing: I,
    ) -> Vec<TransactionRecord>
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        self.partition(candidates, existing).kept
    }

    /// Like `filter_new`, also counting what was dropped and why
    pub fn partition<'a, I>(&self, candidates: Vec<TransactionRecord>, existing: I) -> DedupReport
    where
        I: IntoIterator<Item = &'a TransactionRecord>,
    {
        let existing: Vec<(&TransactionRecord, Vec<MatchKey>)> = existing
            .into_iter()
            .map(|tx| (tx, self.deriver.derive_all(tx)))
            .collect();
        let mut seen: HashSet<MatchKey> = existing
            .iter()
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect();
        let mut owners: HashMap<&MatchKey, usize> = HashMap::new();
        for (idx, (_, keys)) in existing.iter().enumerate() {
            for key in keys {
                owners.entry(key).or_insert(idx);
            }
        }
        let mut replaced: HashSet<usize> = HashSet::new();

        let mut report = DedupReport::default();
        for mut candidate in candidates {
            let keys = self.deriver.derive_all(&candidate);
            if keys.iter().any(|k| seen.contains(k)) {
                let owner = keys.iter().find_map(|k| owners.get(k).copied());
                if let Some(idx) = owner.filter(|idx| !replaced.contains(idx)) {
                    let filed = existing[idx].0;
                    if self.supersedes(&candidate, filed) {
                        debug!(
                            "Superseding: {} '{}' ({} -> {})",
                            keys[0], candidate.narration, filed.flag, candidate.flag
                        );
                        replaced.insert(idx);
                        report.superseded.push(Supersession {
                            existing: filed.clone(),
                            replacement: candidate,
                        });
                        continue;
                    }
                }
                debug!("Duplicate: {} '{}'", keys[0], candidate.narration);
                report.duplicates += 1;
                continue;
            }

            if self.is_transfer(&candidate) && self.has_counterparty(&candidate, &keys, &existing) {
                report.transfers_resolved += 1;
                match self.transfers.policy {
                    TransferPolicy::KeepExisting => {
                        debug!(
                            "Transfer leg '{}' on {} already filed, dropping",
                            candidate.narration, candidate.date
                        );
                        seen.extend(keys);
                        continue;
                    }
                    TransferPolicy::ZeroIncoming => {
                        self.zero_amounts(&mut candidate, &keys[0]);
                    }
                    TransferPolicy::KeepBoth => {}
                }
            }

            seen.extend(keys);
            report.kept.push(candidate);
        }

        info!(
            "Dedup kept {} records ({} duplicates, {} superseded, {} transfer legs resolved)",
            report.kept.len(),
            report.duplicates,
            report.superseded.len(),
            report.transfers_resolved
        );
        report
    }

    /// A cleared entry, or one flagged like the candidate, is never replaced
    fn supersedes(&self, candidate: &TransactionRecord, filed: &TransactionRecord) -> bool {
        filed.flag != self.ledger.cleared_flag && filed.flag != candidate.flag
    }

    /// Flagged with the transfer flag, or carrying a truthy transfer meta value
    pub fn is_transfer(&self, record: &TransactionRecord) -> bool {
        record.flag == self.transfers.flag
            || record
                .meta
                .get(&self.transfers.meta_key)
                .is_some_and(MetaValue::is_truthy)
    }

    /// An existing record, under a different key and within the window, sharing a
    /// known posting (account, number, currency) with the candidate
    fn has_counterparty(
        &self,
        candidate: &TransactionRecord,
        keys: &[MatchKey],
        existing: &[(&TransactionRecord, Vec<MatchKey>)],
    ) -> bool {
        let legs: Vec<_> = candidate
            .postings
            .iter()
            .filter(|p| !self.ledger.is_unknown(&p.account))
            .filter_map(|p| p.units.as_ref().map(|u| (p.account.as_str(), u)))
            .collect();

        existing.iter().any(|(tx, tx_keys)| {
            (tx.date - candidate.date).num_days().abs() <= self.transfers.window_days
                && !tx_keys.iter().any(|k| keys.contains(k))
                && tx.postings.iter().any(|p| {
                    p.units.as_ref().is_some_and(|units| {
                        legs.iter().any(|(account, leg)| {
                            *account == p.account
                                && leg.number == units.number
                                && leg.currency == units.currency
                        })
                    })
                })
        })
    }

    /// Zero every amount, keeping the true amount and original key in metadata
    fn zero_amounts(&self, record: &mut TransactionRecord, key: &MatchKey) {
        let true_amount = record
            .postings
            .iter()
            .filter(|p| !self.ledger.is_unknown(&p.account))
            .find_map(|p| p.units.as_ref())
            .map(|u| u.to_string());
        if let Some(amount) = true_amount {
            record
                .meta
                .insert(self.transfers.amount_meta_key.clone(), MetaValue::Text(amount));
        }
        record
            .meta
            .entry(self.deriver.meta_key().to_string())
            .or_insert_with(|| MetaValue::Text(key.to_string()));

        for units in record.postings.iter_mut().filter_map(|p| p.units.as_mut()) {
            units.number = Decimal::ZERO;
        }
        debug!(
            "Zeroed incoming transfer leg '{}' on {}",
            record.narration, record.date
        );
    }
}
