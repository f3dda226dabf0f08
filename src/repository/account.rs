use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use super::AccountLocks;
use crate::models::Money;
use crate::models::account::{Account, AccountId, AccountStatus};
use crate::models::user::UserId;

/// The account directory. Result types are part of every signature because a real implementation talks to a database.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn account(&self, id: &AccountId) -> Result<Option<Account>>;

    /// All accounts of an owner, ordered by account id.
    async fn accounts_by_owner(&self, owner: &UserId) -> Result<Vec<Account>>;

    async fn insert_account(&self, account: Account) -> Result<()>;

    async fn set_status(
        &self,
        locks: &AccountLocks,
        id: &AccountId,
        status: AccountStatus,
    ) -> Result<()>;

    /// Takes the row locks of all given accounts, in ascending id order, and reads the rows afterwards.
    async fn lock_accounts(&self, ids: &[AccountId]) -> Result<AccountLocks>;

    async fn accounts(&self) -> Vec<Account>;
}

/// The account rows of the in-memory store.
#[derive(Debug, Default)]
pub(crate) struct AccountTable {
    accounts: HashMap<AccountId, Account>,
}

impl AccountTable {
    pub(crate) fn get(&self, id: &AccountId) -> Option<Account> {
        self.accounts.get(id).cloned()
    }

    pub(crate) fn by_owner(&self, owner: &UserId) -> Vec<Account> {
        let mut owned: Vec<Account> = self
            .accounts
            .values()
            .filter(|acc| &acc.owner_id == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.id.cmp(&b.id));

        owned
    }

    pub(crate) fn insert(&mut self, account: Account) -> Result<()> {
        if self.accounts.contains_key(&account.id) {
            bail!(
                "Failed to insert account with id: {}. An account with the same id has already been persisted",
                account.id
            );
        }
        if account.balance.is_negative() {
            bail!(
                "Failed to insert account {} with a negative balance of {}",
                account.id,
                account.balance
            );
        }

        self.accounts.insert(account.id.clone(), account);

        Ok(())
    }

    /// Overwrites the balance and hands back the previous one for the undo log.
    pub(crate) fn write_balance(&mut self, id: &AccountId, balance: Money) -> Result<Money> {
        let acc = self
            .accounts
            .get_mut(id)
            .with_context(|| format!("Failed to write balance of unknown account {id}"))?;

        Ok(std::mem::replace(&mut acc.balance, balance))
    }

    pub(crate) fn set_status(&mut self, id: &AccountId, status: AccountStatus) -> Result<()> {
        self.accounts
            .get_mut(id)
            .map(|acc| acc.status = status)
            .with_context(|| format!("Failed to set status {status:?} of unknown account {id}"))
    }

    pub(crate) fn all(&self) -> Vec<Account> {
        let mut all: Vec<Account> = self.accounts.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));

        all
    }
}
