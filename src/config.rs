use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::models::{Currency, Money};

/// Business policy and operational limits of the engine.
///
/// Every field has a default, a YAML file only needs to name what it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub currency: Currency,

    /// Ceiling for a single transfer of any kind.
    pub max_transfer_amount: Money,
    pub mobile_money_max_amount: Money,

    /// Bank code under which account numbers are internal account ids.
    pub home_bank_code: String,
    pub banks: Vec<String>,
    pub bill_providers: Vec<String>,
    pub mobile_money_providers: Vec<String>,

    pub store_timeout_ms: u64,
    pub lock_timeout_ms: u64,
    pub reservation_timeout_secs: u64,

    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: Currency::etb(),
            max_transfer_amount: Money::from_minor(100_000_000),
            mobile_money_max_amount: Money::from_minor(7_500_000),
            home_bank_code: "ABYS".into(),
            banks: ["ABYS", "CBE", "AWASH", "DASHEN", "WEGAGEN", "NIB", "COOP", "ZEMEN", "HIBRET"]
                .map(String::from)
                .to_vec(),
            bill_providers: ["EEU", "AAWSA", "ETHIO_TELECOM", "DSTV"]
                .map(String::from)
                .to_vec(),
            mobile_money_providers: ["telebirr", "mpesa", "cbe_birr", "hellocash"]
                .map(String::from)
                .to_vec(),
            store_timeout_ms: 5_000,
            lock_timeout_ms: 2_000,
            reservation_timeout_secs: 300,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(raw).context("Failed to parse engine config as YAML")?;
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config from {}", path.display()))?;

        Self::from_yaml_str(&raw)
            .with_context(|| format!("Invalid engine config in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.max_transfer_amount.is_positive(),
            "max_transfer_amount must be positive"
        );
        ensure!(
            self.mobile_money_max_amount.is_positive()
                && self.mobile_money_max_amount <= self.max_transfer_amount,
            "mobile_money_max_amount must be positive and not above max_transfer_amount"
        );
        ensure!(
            !self.home_bank_code.trim().is_empty(),
            "home_bank_code must not be empty"
        );
        ensure!(
            self.store_timeout_ms > 0 && self.lock_timeout_ms > 0,
            "timeouts must be positive"
        );
        ensure!(
            self.reservation_timeout_secs > 0,
            "reservation_timeout_secs must be positive"
        );
        ensure!(
            self.default_page_size > 0 && self.default_page_size <= self.max_page_size,
            "default_page_size must be within 1..=max_page_size"
        );

        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn reservation_timeout(&self) -> TimeDelta {
        i64::try_from(self.reservation_timeout_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    pub fn is_home_bank(&self, code: &str) -> bool {
        self.home_bank_code.eq_ignore_ascii_case(code.trim())
    }

    pub fn knows_bank(&self, code: &str) -> bool {
        contains_ignore_case(&self.banks, code)
    }

    pub fn knows_bill_provider(&self, provider: &str) -> bool {
        contains_ignore_case(&self.bill_providers, provider)
    }

    pub fn knows_mobile_money_provider(&self, provider: &str) -> bool {
        contains_ignore_case(&self.mobile_money_providers, provider)
    }
}

fn contains_ignore_case(known: &[String], candidate: &str) -> bool {
    let candidate = candidate.trim();
    known.iter().any(|k| k.eq_ignore_ascii_case(candidate))
}
