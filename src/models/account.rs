use std::fmt;

use serde::{Deserialize, Serialize};

use super::user::UserId;
use super::{Currency, Money};
use crate::error::TransferError;

/// Opaque account identifier. For accounts held by the home bank it doubles as the account number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    /// Soft-deleted. The history stays, new transfers are refused.
    Disconnected,
}

/// A customer account.
///
/// The balance must never become negative. The debit and credit calculations below are the only place a balance changes,
/// and the engine only calls them on copies read under the account's row lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    #[serde(rename = "account")]
    pub id: AccountId,

    #[serde(rename = "owner")]
    pub owner_id: UserId,
    pub currency: Currency,
    pub balance: Money,
    pub status: AccountStatus,
}

impl Account {
    pub fn new(id: AccountId, owner_id: UserId, currency: Currency) -> Self {
        Self {
            id,
            owner_id,
            currency,
            balance: Money::ZERO,
            status: AccountStatus::Active,
        }
    }

    pub fn with_balance(mut self, balance: Money) -> Self {
        self.balance = balance;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    pub fn ensure_active(&self) -> Result<(), TransferError> {
        if !self.is_active() {
            return Err(TransferError::AccountInactive(self.id.clone()));
        }

        Ok(())
    }

    pub fn try_debit(&mut self, amount: Money) -> Result<(), TransferError> {
        if !amount.is_positive() {
            return Err(TransferError::InvalidAmount(format!(
                "Can't debit a non-positive amount of {amount}"
            )));
        }

        if amount > self.balance {
            return Err(TransferError::InsufficientFunds {
                account: self.id.clone(),
                available: self.balance,
                requested: amount,
            });
        }

        // amount <= balance, the subtraction can neither overflow nor go below zero
        self.balance = Money::from_minor(self.balance.minor() - amount.minor());

        Ok(())
    }

    pub fn try_credit(&mut self, amount: Money) -> Result<(), TransferError> {
        if !amount.is_positive() {
            return Err(TransferError::InvalidAmount(format!(
                "Can't credit a non-positive amount of {amount}"
            )));
        }

        self.balance = self.balance.checked_add(amount).ok_or_else(|| {
            TransferError::InvalidAmount(format!(
                "Crediting {amount} would overflow the balance of account {}",
                self.id
            ))
        })?;

        Ok(())
    }
}
