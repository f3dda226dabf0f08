use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;

use crate::error::TransferError;
use crate::models::Money;
use crate::models::account::{Account, AccountId};
use crate::models::entry::{LedgerEntry, Reference};
use crate::models::request::IdempotencyKey;

pub mod account;
pub mod idempotency;
pub mod ledger;
pub mod memory;

use account::AccountRepository;
use idempotency::IdempotencyRepository;
use ledger::LedgerRepository;

/// The transactional resource behind the engine: accounts, ledger and idempotency records living in one database.
///
/// Reads go through the individual repository traits. Writes that move money only happen through [Store::commit],
/// which must apply a [Changeset] completely or not at all.
#[async_trait]
pub trait Store: AccountRepository + LedgerRepository + IdempotencyRepository + 'static {
    async fn commit(&self, locks: &AccountLocks, changes: Changeset) -> Result<()>;
}

/// Row locks held on a set of accounts, together with the account rows as read after the locks were granted.
///
/// Dropping it releases the locks.
#[derive(Debug)]
pub struct AccountLocks {
    accounts: BTreeMap<AccountId, Account>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    pub fn new(accounts: Vec<Account>, guards: Vec<OwnedMutexGuard<()>>) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|acc| (acc.id.clone(), acc))
            .collect();

        Self {
            accounts,
            _guards: guards,
        }
    }

    pub fn account(&self, id: &AccountId) -> Option<&Account> {
        self.accounts.get(id)
    }

    pub fn covers(&self, id: &AccountId) -> bool {
        self.accounts.contains_key(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub account_id: AccountId,
    pub balance: Money,
}

/// Everything one committed money movement writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    /// Applied in order. The debit of the source comes first.
    pub balances: Vec<BalanceWrite>,
    pub entries: Vec<LedgerEntry>,
    /// Reservation that is completed with the published entries.
    pub completes: Option<(IdempotencyKey, Reference)>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Pagination as requested by a caller. A missing limit means the configured default page size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
    pub order: Order,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self {
            offset: 0,
            limit: Some(limit),
            order: Order::default(),
        }
    }

    pub fn oldest_first(mut self) -> Self {
        self.order = Order::OldestFirst;
        self
    }

    /// The page after this one. A page without a limit stands for the configured default size, so advancing past
    /// it needs that size spelled out.
    pub fn next(self, default_limit: usize) -> Self {
        Self {
            offset: self.offset + self.limit.unwrap_or(default_limit),
            ..self
        }
    }
}

/// A ledger read: legs on any of `accounts`, created within `[from, to)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub accounts: Vec<AccountId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub order: Order,
    pub offset: usize,
    pub limit: Option<usize>,
}

/// Bounds a store call. Running out of time is a storage failure and always safe to retry.
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T, TransferError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(TransferError::storage),
        Err(_) => Err(TransferError::storage(anyhow!(
            "{what} did not finish within {timeout:?}"
        ))),
    }
}
