use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail, ensure};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use super::account::{AccountRepository, AccountTable};
use super::idempotency::{IdempotencyRecord, IdempotencyRepository, IdempotencyTable};
use super::ledger::{LedgerRepository, LedgerTable};
use super::{AccountLocks, Changeset, EntryQuery, Store};
use crate::models::Money;
use crate::models::account::{Account, AccountId, AccountStatus};
use crate::models::entry::{EntryStatus, LedgerEntry, Reference};
use crate::models::request::IdempotencyKey;
use crate::models::user::UserId;

/// Points inside the store where a test can make the next operation fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    /// Acquiring row locks.
    Lock,
    /// Right after the first balance of a commit has been written.
    AfterDebit,
    /// After all balances are written, before the ledger append.
    BeforeLedgerAppend,
}

/// An in-process stand-in for the hosted database: accounts, ledger and idempotency records behind one lock,
/// plus one row lock per account.
///
/// The common Arc - Inner pattern makes it cheap to clone and share between the engine, spawned tasks and tests.
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
    lock_timeout: Duration,
    fault: Arc<StdMutex<Option<FailPoint>>>,
}

#[derive(Default)]
struct Tables {
    accounts: AccountTable,
    ledger: LedgerTable,
    idempotency: IdempotencyTable,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(2))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::default(),
            row_locks: Arc::default(),
            lock_timeout,
            fault: Arc::default(),
        }
    }

    /// Arms a one-shot failure at the given point.
    pub fn inject_fault(&self, at: FailPoint) {
        *self.fault.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
    }

    fn trips(&self, at: FailPoint) -> bool {
        let mut armed = self.fault.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *armed == Some(at) {
            *armed = None;
            return true;
        }

        false
    }

    async fn row_lock(&self, id: &AccountId) -> Arc<Mutex<()>> {
        let mut rows = self.row_locks.lock().await;

        Arc::clone(rows.entry(id.clone()).or_default())
    }

    /// Applies the changeset, recording every overwritten balance in `undo`.
    fn apply(
        &self,
        tables: &mut Tables,
        locks: &AccountLocks,
        changes: Changeset,
        undo: &mut Vec<(AccountId, Money)>,
    ) -> Result<()> {
        if let Some((key, reference)) = &changes.completes {
            tables.idempotency.ensure_reserved(key, *reference)?;
        }

        for write in &changes.balances {
            ensure!(
                locks.covers(&write.account_id),
                "Refusing balance write on account {} without holding its row lock",
                write.account_id
            );
            ensure!(
                !write.balance.is_negative(),
                "Refusing negative balance {} on account {}",
                write.balance,
                write.account_id
            );

            let previous = tables
                .accounts
                .write_balance(&write.account_id, write.balance)?;
            undo.push((write.account_id.clone(), previous));

            if self.trips(FailPoint::AfterDebit) {
                bail!("Injected fault after writing the balance of {}", write.account_id);
            }
        }

        if self.trips(FailPoint::BeforeLedgerAppend) {
            bail!("Injected fault before the ledger append");
        }

        let published: Vec<LedgerEntry> = changes
            .entries
            .into_iter()
            .map(|mut entry| {
                entry.status = EntryStatus::Completed;
                entry
            })
            .collect();
        let completed_at = published
            .first()
            .map(|entry| entry.created_at)
            .unwrap_or_else(Utc::now);

        tables.ledger.append(published.clone())?;

        if let Some((key, reference)) = changes.completes {
            // still reserved: checked above under the same write guard
            tables
                .idempotency
                .complete(&key, reference, published, completed_at);
        }

        Ok(())
    }
}

#[async_trait]
impl AccountRepository for InMemoryStore {
    async fn account(&self, id: &AccountId) -> Result<Option<Account>> {
        let tables = self.tables.read().await;

        Ok(tables.accounts.get(id))
    }

    async fn accounts_by_owner(&self, owner: &UserId) -> Result<Vec<Account>> {
        let tables = self.tables.read().await;

        Ok(tables.accounts.by_owner(owner))
    }

    async fn insert_account(&self, account: Account) -> Result<()> {
        let mut tables = self.tables.write().await;

        tables.accounts.insert(account)
    }

    async fn set_status(
        &self,
        locks: &AccountLocks,
        id: &AccountId,
        status: AccountStatus,
    ) -> Result<()> {
        ensure!(
            locks.covers(id),
            "Refusing status change on account {id} without holding its row lock"
        );
        let mut tables = self.tables.write().await;

        tables.accounts.set_status(id, status)
    }

    async fn lock_accounts(&self, ids: &[AccountId]) -> Result<AccountLocks> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        if self.trips(FailPoint::Lock) {
            bail!("Injected fault while locking {ids:?}");
        }

        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            let row = self.row_lock(id).await;
            let guard = tokio::time::timeout(self.lock_timeout, row.lock_owned())
                .await
                .map_err(|_| {
                    anyhow!(
                        "Timed out after {:?} waiting for the row lock of account {id}",
                        self.lock_timeout
                    )
                })?;
            guards.push(guard);
        }

        let tables = self.tables.read().await;
        let accounts = ids
            .iter()
            .map(|id| {
                tables
                    .accounts
                    .get(id)
                    .with_context(|| format!("Failed to lock unknown account {id}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(AccountLocks::new(accounts, guards))
    }

    async fn accounts(&self) -> Vec<Account> {
        let tables = self.tables.read().await;

        tables.accounts.all()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn entries_by_reference(&self, reference: &Reference) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;

        Ok(tables.ledger.by_reference(reference))
    }

    async fn query_entries(&self, query: &EntryQuery) -> Result<Vec<LedgerEntry>> {
        let tables = self.tables.read().await;

        Ok(tables.ledger.query(query))
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn idempotency_record(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let tables = self.tables.read().await;

        Ok(tables.idempotency.get(key))
    }

    async fn try_reserve(&self, record: IdempotencyRecord) -> Result<Option<IdempotencyRecord>> {
        let mut tables = self.tables.write().await;

        Ok(tables.idempotency.try_insert(record))
    }

    async fn take_over_reservation(
        &self,
        expected: Reference,
        record: IdempotencyRecord,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;

        Ok(tables.idempotency.take_over(expected, record))
    }

    async fn complete_stale_reservation(
        &self,
        key: &IdempotencyKey,
        expected: Reference,
        entries: Vec<LedgerEntry>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;

        Ok(tables.idempotency.complete(key, expected, entries, at))
    }

    async fn release_reservation(&self, key: &IdempotencyKey, expected: Reference) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.idempotency.release(key, expected);

        Ok(())
    }

    async fn fail_reservation(
        &self,
        key: &IdempotencyKey,
        expected: Reference,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.idempotency.fail(key, expected, at);

        Ok(())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn commit(&self, locks: &AccountLocks, changes: Changeset) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut undo = Vec::with_capacity(changes.balances.len());

        let res = self.apply(&mut tables, locks, changes, &mut undo);

        if let Err(err) = &res {
            warn!("Rolling back {} balance write(s): {err:#}", undo.len());
            for (id, previous) in undo.into_iter().rev() {
                if let Err(restore_err) = tables.accounts.write_balance(&id, previous) {
                    warn!("Failed to restore balance of {id}: {restore_err:#}");
                }
            }
        }

        res
    }
}
