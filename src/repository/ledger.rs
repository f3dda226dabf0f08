use std::collections::{HashMap, HashSet};

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{EntryQuery, Order};
use crate::models::account::AccountId;
use crate::models::entry::{LedgerEntry, Reference};

/// Read side of the append-only ledger. Appending happens as part of [super::Store::commit].
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn entries_by_reference(&self, reference: &Reference) -> Result<Vec<LedgerEntry>>;

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<LedgerEntry>>;
}

/// The ledger rows of the in-memory store. The position in `entries` doubles as insertion sequence.
#[derive(Debug, Default)]
pub(crate) struct LedgerTable {
    entries: Vec<LedgerEntry>,
    by_reference: HashMap<Reference, Vec<usize>>,
    by_account: HashMap<AccountId, Vec<usize>>,
}

impl LedgerTable {
    /// Appends all entries or none. A leg is identified by reference, account and direction.
    pub(crate) fn append(&mut self, entries: Vec<LedgerEntry>) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &entries {
            let leg = (entry.reference, entry.account_id.clone(), entry.direction);
            if !seen.insert(leg) || self.contains_leg(entry) {
                bail!(
                    "Failed to append ledger entry {} for account {}. The leg has already been persisted",
                    entry.reference,
                    entry.account_id
                );
            }
        }

        for entry in entries {
            let idx = self.entries.len();
            self.by_reference.entry(entry.reference).or_default().push(idx);
            self.by_account
                .entry(entry.account_id.clone())
                .or_default()
                .push(idx);
            self.entries.push(entry);
        }

        Ok(())
    }

    fn contains_leg(&self, entry: &LedgerEntry) -> bool {
        self.by_reference
            .get(&entry.reference)
            .into_iter()
            .flatten()
            .any(|&idx| {
                let existing = &self.entries[idx];
                existing.account_id == entry.account_id && existing.direction == entry.direction
            })
    }

    pub(crate) fn by_reference(&self, reference: &Reference) -> Vec<LedgerEntry> {
        self.by_reference
            .get(reference)
            .into_iter()
            .flatten()
            .map(|&idx| self.entries[idx].clone())
            .collect()
    }

    pub(crate) fn query(&self, query: &EntryQuery) -> Vec<LedgerEntry> {
        let mut hits: Vec<usize> = query
            .accounts
            .iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .filter_map(|id| self.by_account.get(id))
            .flatten()
            .copied()
            .filter(|&idx| {
                let created_at = self.entries[idx].created_at;
                query.from.is_none_or(|from| created_at >= from)
                    && query.to.is_none_or(|to| created_at < to)
            })
            .collect();

        hits.sort_by_key(|&idx| (self.entries[idx].created_at, idx));
        if query.order == Order::NewestFirst {
            hits.reverse();
        }

        hits.into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .map(|idx| self.entries[idx].clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use claims::{assert_err, assert_ok};

    use super::*;
    use crate::models::entry::{Counterparty, Direction, EntryStatus, TransferKind};
    use crate::models::{Currency, Money};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + TimeDelta::seconds(secs)
    }

    fn leg(
        reference: Reference,
        account: &str,
        direction: Direction,
        created_at: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry {
            reference,
            account_id: AccountId::new(account),
            direction,
            amount: Money::from_minor(100),
            currency: Currency::etb(),
            counterparty: Counterparty::External("payee".into()),
            kind: TransferKind::BankTransfer,
            status: EntryStatus::Completed,
            description: None,
            category: None,
            created_at,
        }
    }

    #[test]
    fn cant_append_the_same_leg_twice() {
        let mut table = LedgerTable::default();
        let reference = Reference::new_at(at(0));

        assert_ok!(table.append(vec![leg(reference, "a", Direction::Debit, at(0))]));
        assert_err!(table.append(vec![leg(reference, "a", Direction::Debit, at(0))]));
        assert_eq!(table.by_reference(&reference).len(), 1);
    }

    #[test]
    fn rejected_append_writes_nothing() {
        let mut table = LedgerTable::default();
        let reference = Reference::new_at(at(0));

        let res = table.append(vec![
            leg(reference, "a", Direction::Debit, at(0)),
            leg(reference, "a", Direction::Debit, at(0)),
        ]);

        assert_err!(res);
        assert!(table.by_reference(&reference).is_empty());
    }

    #[test]
    fn query_filters_by_half_open_range_and_orders_newest_first() {
        let mut table = LedgerTable::default();
        for secs in 0..5 {
            let reference = Reference::new_at(at(secs));
            assert_ok!(table.append(vec![leg(reference, "a", Direction::Debit, at(secs))]));
        }

        let hits = table.query(&EntryQuery {
            accounts: vec![AccountId::new("a")],
            from: Some(at(1)),
            to: Some(at(4)),
            ..EntryQuery::default()
        });

        let times: Vec<_> = hits.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![at(3), at(2), at(1)]);
    }

    #[test]
    fn query_pages_through_results() {
        let mut table = LedgerTable::default();
        for secs in 0..5 {
            let reference = Reference::new_at(at(secs));
            assert_ok!(table.append(vec![leg(reference, "a", Direction::Credit, at(secs))]));
        }

        let hits = table.query(&EntryQuery {
            accounts: vec![AccountId::new("a"), AccountId::new("a")],
            order: Order::OldestFirst,
            offset: 2,
            limit: Some(2),
            ..EntryQuery::default()
        });

        let times: Vec<_> = hits.iter().map(|e| e.created_at).collect();
        assert_eq!(times, vec![at(2), at(3)]);
    }
}
