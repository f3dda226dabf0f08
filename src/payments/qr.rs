use rust_decimal::Decimal;
use serde::Deserialize;

use super::required;
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::models::account::AccountId;
use crate::models::entry::{LedgerEntry, TransferKind};
use crate::models::request::{Destination, IdempotencyKey, Metadata, TransferRequest};
use crate::models::user::Session;
use crate::repository::Store;

const SUPPORTED_VERSION: u32 = 1;

/// Pays a merchant or person whose account is encoded in a scanned QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayment {
    pub source: AccountId,
    /// The raw text decoded from the QR code.
    pub payload: String,
    /// What the payer typed. May be left out when the code carries a fixed amount.
    pub amount: Option<Decimal>,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

/// The JSON document inside a payment QR code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QrPayload {
    pub version: u32,
    pub account: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl QrPayload {
    pub fn parse(raw: &str) -> Result<Self, TransferError> {
        let payload: QrPayload = serde_json::from_str(raw)
            .map_err(|err| TransferError::InvalidPayload(format!("Malformed QR payload: {err}")))?;

        if payload.version != SUPPORTED_VERSION {
            return Err(TransferError::InvalidPayload(format!(
                "Unsupported QR payload version {}",
                payload.version
            )));
        }

        Ok(payload)
    }
}

impl QrPayment {
    pub fn into_request(self, config: &EngineConfig) -> Result<TransferRequest, TransferError> {
        let payload = QrPayload::parse(&self.payload)?;
        let account = required("QR account", &payload.account)?;

        if let Some(currency) = &payload.currency
            && !currency.trim().eq_ignore_ascii_case(config.currency.code())
        {
            return Err(TransferError::InvalidPayload(format!(
                "QR code asks for {currency}, accounts are held in {}",
                config.currency
            )));
        }

        let amount = match (payload.amount, self.amount) {
            (Some(encoded), Some(typed)) if encoded != typed => {
                return Err(TransferError::InvalidPayload(format!(
                    "QR code asks for {encoded}, the payment is for {typed}"
                )));
            }
            (Some(amount), _) | (None, Some(amount)) => amount,
            (None, None) => {
                return Err(TransferError::InvalidPayload(
                    "Neither the QR code nor the payment carries an amount".into(),
                ));
            }
        };

        let mut metadata = self.metadata;
        if metadata.description.is_none() {
            metadata.description = payload.note.clone();
        }

        Ok(TransferRequest::new(
            TransferKind::QrPayment,
            self.source,
            Destination::Internal(AccountId::new(account)),
            amount,
            self.idempotency_key,
        )
        .with_metadata(metadata))
    }
}

impl<S, D> TransferEngine<S, D>
where
    S: Store,
    D: UserDirectory,
{
    pub async fn qr_payment(
        &self,
        session: &Session,
        payment: QrPayment,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let request = payment.into_request(self.config())?;

        self.move_funds(session, request).await
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_matches, assert_ok};
    use rust_decimal::dec;

    use super::*;

    fn payment(payload: &str, amount: Option<Decimal>) -> QrPayment {
        QrPayment {
            source: AccountId::new("acc-1"),
            payload: payload.into(),
            amount,
            idempotency_key: IdempotencyKey::new("qr-1"),
            metadata: Metadata::default(),
        }
    }

    fn invalid(payload: &str, amount: Option<Decimal>) {
        let res = payment(payload, amount).into_request(&EngineConfig::default());

        assert_matches!(res, Err(TransferError::InvalidPayload(_)), "payload: {payload}");
    }

    #[test]
    fn fixed_amount_codes_pay_the_encoded_amount() {
        let raw = r#"{"version":1,"account":"merchant-7","name":"Kaldi's","amount":"85.50","currency":"ETB","note":"2 macchiato"}"#;

        let request = assert_ok!(payment(raw, None).into_request(&EngineConfig::default()));

        assert_eq!(request.kind, TransferKind::QrPayment);
        assert_eq!(request.destination, Destination::Internal(AccountId::new("merchant-7")));
        assert_eq!(request.amount, dec!(85.50));
        assert_eq!(request.metadata.description.as_deref(), Some("2 macchiato"));
    }

    #[test]
    fn open_amount_codes_pay_what_was_typed() {
        let raw = r#"{"version":1,"account":"merchant-7"}"#;

        let config = EngineConfig::default();
        let request = assert_ok!(payment(raw, Some(dec!(20))).into_request(&config));

        assert_eq!(request.amount, dec!(20));
    }

    #[test]
    fn equal_amounts_on_both_sides_are_accepted() {
        let raw = r#"{"version":1,"account":"merchant-7","amount":12.5}"#;

        assert_ok!(payment(raw, Some(dec!(12.50))).into_request(&EngineConfig::default()));
    }

    #[test]
    fn broken_payloads_are_refused() {
        invalid("not json", Some(dec!(1)));
        invalid(r#"{"version":2,"account":"merchant-7"}"#, Some(dec!(1)));
        invalid(r#"{"version":1,"account":"  "}"#, Some(dec!(1)));
        invalid(r#"{"version":1,"account":"m","tip":"5"}"#, Some(dec!(1)));
        invalid(r#"{"version":1,"account":"m","currency":"USD"}"#, Some(dec!(1)));
        invalid(r#"{"version":1,"account":"m"}"#, None);
        invalid(r#"{"version":1,"account":"m","amount":"10"}"#, Some(dec!(11)));
    }
}
