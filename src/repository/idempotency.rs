use std::collections::HashMap;
use std::collections::hash_map::Entry;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::entry::{LedgerEntry, Reference};
use crate::models::request::{IdempotencyKey, RequestShape};

/// Lifecycle of one idempotency key: `reserved -> completed` or `reserved -> failed -> reserved ...`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ReservationState {
    Reserved {
        reference: Reference,
    },
    Completed {
        reference: Reference,
        entries: Vec<LedgerEntry>,
    },
    /// Nothing was committed. The key may be reserved again.
    Failed {
        reference: Reference,
    },
}

impl ReservationState {
    pub fn reference(&self) -> Reference {
        match self {
            ReservationState::Reserved { reference }
            | ReservationState::Completed { reference, .. }
            | ReservationState::Failed { reference } => *reference,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub shape: RequestShape,
    pub state: ReservationState,
    pub updated_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn reserved(
        key: IdempotencyKey,
        shape: RequestShape,
        reference: Reference,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            key,
            shape,
            state: ReservationState::Reserved { reference },
            updated_at: at,
        }
    }
}

/// Durable reservation records. Every state change is a compare-and-swap on the record's current reference,
/// so two processes racing for the same key can't both win.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    async fn idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;

    /// Inserts the record if the key is unseen. Otherwise the existing record is returned and nothing changes.
    async fn try_reserve(&self, record: IdempotencyRecord) -> Result<Option<IdempotencyRecord>>;

    /// Replaces a reserved or failed record still carrying `expected`. Returns false if the record moved on.
    async fn take_over_reservation(
        &self,
        expected: Reference,
        record: IdempotencyRecord,
    ) -> Result<bool>;

    /// Marks a reservation completed with entries found in the ledger after its owner vanished.
    async fn complete_stale_reservation(
        &self,
        key: &IdempotencyKey,
        expected: Reference,
        entries: Vec<LedgerEntry>,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Forgets a reservation that wrote nothing, the key is unseen again.
    async fn release_reservation(&self, key: &IdempotencyKey, expected: Reference) -> Result<()>;

    async fn fail_reservation(
        &self,
        key: &IdempotencyKey,
        expected: Reference,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// The idempotency rows of the in-memory store.
#[derive(Debug, Default)]
pub(crate) struct IdempotencyTable {
    records: HashMap<IdempotencyKey, IdempotencyRecord>,
}

impl IdempotencyTable {
    pub(crate) fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        self.records.get(key).cloned()
    }

    pub(crate) fn try_insert(&mut self, record: IdempotencyRecord) -> Option<IdempotencyRecord> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(existing) => Some(existing.get().clone()),
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                None
            }
        }
    }

    pub(crate) fn take_over(&mut self, expected: Reference, record: IdempotencyRecord) -> bool {
        match self.records.get_mut(&record.key) {
            Some(existing)
                if matches!(
                    existing.state,
                    ReservationState::Reserved { reference } | ReservationState::Failed { reference }
                        if reference == expected
                ) =>
            {
                *existing = record;
                true
            }
            _ => false,
        }
    }

    /// Fails unless the key is still reserved under `expected`.
    pub(crate) fn ensure_reserved(&self, key: &IdempotencyKey, expected: Reference) -> Result<()> {
        match self.records.get(key).map(|rec| &rec.state) {
            Some(ReservationState::Reserved { reference }) if *reference == expected => Ok(()),
            other => bail!(
                "Reservation of key {key} under reference {expected} is no longer held: {other:?}"
            ),
        }
    }

    pub(crate) fn complete(
        &mut self,
        key: &IdempotencyKey,
        expected: Reference,
        entries: Vec<LedgerEntry>,
        at: DateTime<Utc>,
    ) -> bool {
        match self.records.get_mut(key) {
            Some(existing)
                if existing.state
                    == (ReservationState::Reserved {
                        reference: expected,
                    }) =>
            {
                existing.state = ReservationState::Completed {
                    reference: expected,
                    entries,
                };
                existing.updated_at = at;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn release(&mut self, key: &IdempotencyKey, expected: Reference) {
        if let Entry::Occupied(existing) = self.records.entry(key.clone())
            && existing.get().state
                == (ReservationState::Reserved {
                    reference: expected,
                })
        {
            existing.remove();
        }
    }

    pub(crate) fn fail(&mut self, key: &IdempotencyKey, expected: Reference, at: DateTime<Utc>) {
        if let Some(existing) = self.records.get_mut(key)
            && existing.state
                == (ReservationState::Reserved {
                    reference: expected,
                })
        {
            existing.state = ReservationState::Failed {
                reference: expected,
            };
            existing.updated_at = at;
        }
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_none, assert_ok, assert_some};

    use super::*;
    use crate::models::Money;
    use crate::models::account::AccountId;
    use crate::models::entry::TransferKind;
    use crate::models::request::Destination;
    use crate::models::user::UserId;

    fn shape() -> RequestShape {
        RequestShape {
            user_id: UserId::new("u1"),
            kind: TransferKind::BillPayment,
            source: AccountId::new("a"),
            destination: Destination::External("EEU:42".into()),
            amount: Money::from_minor(15000),
        }
    }

    fn reserved(key: &str, reference: Reference) -> IdempotencyRecord {
        IdempotencyRecord::reserved(IdempotencyKey::new(key), shape(), reference, Utc::now())
    }

    #[test]
    fn second_reservation_sees_the_first() {
        let mut table = IdempotencyTable::default();
        let first = Reference::new_at(Utc::now());
        let second = Reference::new_at(Utc::now());

        assert_none!(table.try_insert(reserved("k", first)));
        let existing = assert_some!(table.try_insert(reserved("k", second)));

        assert_eq!(existing.state.reference(), first);
    }

    #[test]
    fn take_over_requires_the_expected_reference() {
        let mut table = IdempotencyTable::default();
        let first = Reference::new_at(Utc::now());
        let stranger = Reference::new_at(Utc::now());
        assert_none!(table.try_insert(reserved("k", first)));

        assert!(!table.take_over(stranger, reserved("k", stranger)));

        let replacement = Reference::new_at(Utc::now());
        assert!(table.take_over(first, reserved("k", replacement)));
        assert_ok!(table.ensure_reserved(&IdempotencyKey::new("k"), replacement));
    }

    #[test]
    fn completed_records_can_not_be_taken_over() {
        let mut table = IdempotencyTable::default();
        let key = IdempotencyKey::new("k");
        let first = Reference::new_at(Utc::now());
        assert_none!(table.try_insert(reserved("k", first)));
        assert!(table.complete(&key, first, vec![], Utc::now()));

        let replacement = Reference::new_at(Utc::now());
        assert!(!table.take_over(first, reserved("k", replacement)));
    }

    #[test]
    fn release_makes_the_key_unseen() {
        let mut table = IdempotencyTable::default();
        let key = IdempotencyKey::new("k");
        let first = Reference::new_at(Utc::now());
        assert_none!(table.try_insert(reserved("k", first)));

        table.release(&key, first);

        assert_none!(table.get(&key));
    }

    #[test]
    fn failed_reservation_keeps_the_record() {
        let mut table = IdempotencyTable::default();
        let key = IdempotencyKey::new("k");
        let first = Reference::new_at(Utc::now());
        assert_none!(table.try_insert(reserved("k", first)));

        table.fail(&key, first, Utc::now());

        let record = assert_some!(table.get(&key));
        assert_eq!(record.state, ReservationState::Failed { reference: first });
    }
}
