use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use super::account::AccountId;
use super::{Currency, Money};

/// System generated identifier linking the legs of one transfer.
///
/// ULID based: the first 48 bits are the creation time in milliseconds, the remaining 80 bits are random.
/// References therefore sort by creation time and need no coordination between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reference(Ulid);

impl Reference {
    pub fn new_at(at: DateTime<Utc>) -> Self {
        Self(Ulid::from_datetime(SystemTime::from(at)))
    }

    pub fn inner(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Reference {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Debit,
    Credit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    BankTransfer,
    BillPayment,
    MobileMoney,
    QrPayment,
    PeerTransfer,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::BankTransfer => "bank_transfer",
            TransferKind::BillPayment => "bill_payment",
            TransferKind::MobileMoney => "mobile_money",
            TransferKind::QrPayment => "qr_payment",
            TransferKind::PeerTransfer => "peer_transfer",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Staged inside a commit, not yet visible.
    Pending,
    Completed,
    Failed,
}

/// The other side of a leg. Only [Counterparty::Account] is a party whose balance this system moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Counterparty {
    Account(AccountId),
    External(String),
}

impl fmt::Display for Counterparty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Counterparty::Account(id) => write!(f, "account:{id}"),
            Counterparty::External(descriptor) => f.write_str(descriptor),
        }
    }
}

/// One immutable leg of a money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub reference: Reference,
    pub account_id: AccountId,
    pub direction: Direction,
    pub amount: Money,
    pub currency: Currency,
    pub counterparty: Counterparty,
    pub kind: TransferKind,
    pub status: EntryStatus,
    pub description: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The amount as seen from the account: negative for debits.
    pub fn signed_amount(&self) -> i64 {
        match self.direction {
            Direction::Debit => -self.amount.minor(),
            Direction::Credit => self.amount.minor(),
        }
    }
}
