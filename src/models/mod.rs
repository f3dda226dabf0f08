use std::fmt;

use anyhow::{Context, Result, bail};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod account;
pub mod entry;
pub mod request;
pub mod user;

/// A monetary amount counted in minor units (santim for ETB).
///
/// Amounts enter the domain as [Decimal] and are converted exactly: a value carrying more fractional digits than [Money::SCALE]
/// is rejected instead of being rounded, so a balance can never drift away from what the ledger says.
///
/// Arithmetic is only offered in checked form. Saturating here would silently create or destroy money.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Number of fractional digits of the minor unit.
    pub const SCALE: u32 = 2;

    pub fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    pub fn from_decimal(amount: Decimal) -> Result<Self> {
        let normalized = amount.normalize();
        if normalized.scale() > Self::SCALE {
            bail!(
                "Amount {amount} has more than {} fractional digits",
                Self::SCALE
            );
        }

        let factor = Decimal::from(10_i64.pow(Self::SCALE));
        let minor = normalized
            .checked_mul(factor)
            .and_then(|scaled| scaled.to_i64())
            .with_context(|| format!("Amount {amount} does not fit into minor units"))?;

        Ok(Self(minor))
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, Self::SCALE)
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amount = <Decimal as Deserialize>::deserialize(deserializer)?;
        Money::from_decimal(amount).map_err(serde::de::Error::custom)
    }
}

/// ISO-like currency code. The system runs on a single configured currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_ascii_uppercase())
    }

    pub fn etb() -> Self {
        Self::new("ETB")
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
