use rust_decimal::Decimal;

use super::required;
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::engine::{TransferEngine, parse_amount};
use crate::error::TransferError;
use crate::models::account::AccountId;
use crate::models::entry::{LedgerEntry, TransferKind};
use crate::models::request::{Destination, IdempotencyKey, Metadata, TransferRequest};
use crate::models::user::Session;
use crate::repository::Store;

const COUNTRY_CODE: &str = "251";

/// Pays out to a mobile wallet (telebirr, M-Pesa, ...). External, only the source gets a leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MobileMoneyTransfer {
    pub source: AccountId,
    pub provider: String,
    pub phone: String,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

impl MobileMoneyTransfer {
    pub fn into_request(self, config: &EngineConfig) -> Result<TransferRequest, TransferError> {
        let provider = required("Provider", &self.provider)?;
        if !config.knows_mobile_money_provider(provider) {
            return Err(TransferError::InvalidPayload(format!(
                "Unknown mobile money provider {provider}"
            )));
        }

        let phone = normalize_phone(&self.phone).ok_or_else(|| {
            TransferError::InvalidPayload(format!(
                "{} is not an Ethiopian mobile number",
                self.phone.trim()
            ))
        })?;

        parse_amount(self.amount, config.mobile_money_max_amount)?;

        Ok(TransferRequest::new(
            TransferKind::MobileMoney,
            self.source,
            Destination::External(format!("{}:{phone}", provider.to_lowercase())),
            self.amount,
            self.idempotency_key,
        )
        .with_metadata(self.metadata))
    }
}

impl<S, D> TransferEngine<S, D>
where
    S: Store,
    D: UserDirectory,
{
    pub async fn mobile_money_transfer(
        &self,
        session: &Session,
        transfer: MobileMoneyTransfer,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let request = transfer.into_request(self.config())?;

        self.move_funds(session, request).await
    }
}

/// Brings an Ethiopian mobile number into `+251XXXXXXXXX` form.
///
/// Accepts the international form with or without `+`, the national form with a leading `0` and the bare
/// nine digit subscriber number. Subscriber numbers start with `9` or `7`. Spaces and dashes are ignored.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();

    let subscriber = digits
        .strip_prefix('+')
        .and_then(|rest| rest.strip_prefix(COUNTRY_CODE))
        .or_else(|| digits.strip_prefix(COUNTRY_CODE))
        .or_else(|| digits.strip_prefix('0'))
        .unwrap_or(&digits);

    let valid = subscriber.len() == 9
        && subscriber.starts_with(['9', '7'])
        && subscriber.chars().all(|c| c.is_ascii_digit());

    valid.then(|| format!("+{COUNTRY_CODE}{subscriber}"))
}
