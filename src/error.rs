use crate::models::account::AccountId;
use crate::models::user::UserId;
use crate::models::{Currency, Money};

/// Every way a money movement can be refused.
///
/// All variants except [TransferError::StorageFailure] describe a request that has to be corrected by the caller.
/// A storage failure left nothing behind and the identical request (same idempotency key) may simply be retried.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Account {0} is disconnected")]
    AccountInactive(AccountId),

    #[error("Destination {0} not found")]
    DestinationNotFound(String),

    #[error(
        "Insufficient funds on account {account}: requested {requested}, available {available}"
    )]
    InsufficientFunds {
        account: AccountId,
        available: Money,
        requested: Money,
    },

    #[error("Recipient {0} has no account able to receive funds")]
    RecipientHasNoAccount(UserId),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Conflicting request: {0}")]
    Conflict(String),

    #[error("Currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },

    #[error("Storage failure: {0:#}")]
    StorageFailure(#[source] anyhow::Error),
}

impl TransferError {
    pub fn storage(err: anyhow::Error) -> Self {
        Self::StorageFailure(err)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}
