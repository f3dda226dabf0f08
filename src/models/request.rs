use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Money;
use super::account::AccountId;
use super::entry::TransferKind;
use super::user::UserId;

/// Caller supplied token naming one logical request, no matter how often it is retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the money goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Destination {
    /// Another account held in this system. Gets a credit leg.
    Internal(AccountId),
    /// A payee outside the system's balance authority, described in free form.
    External(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub description: Option<String>,
    pub category: Option<String>,
}

impl Metadata {
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            category: None,
        }
    }
}

/// The single request shape every payment kind funnels into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub kind: TransferKind,
    pub source: AccountId,
    pub destination: Destination,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

impl TransferRequest {
    pub fn new(
        kind: TransferKind,
        source: AccountId,
        destination: Destination,
        amount: Decimal,
        idempotency_key: IdempotencyKey,
    ) -> Self {
        Self {
            kind,
            source,
            destination,
            amount,
            idempotency_key,
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// What an idempotency record remembers about the request that reserved it.
/// A retry must carry the same shape, otherwise the key is being reused for something else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestShape {
    pub user_id: UserId,
    pub kind: TransferKind,
    pub source: AccountId,
    pub destination: Destination,
    pub amount: Money,
}
