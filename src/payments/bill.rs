use rust_decimal::Decimal;

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

/// Pays a utility or service bill. The money leaves the system, only the source gets a leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillPayment {
    pub source: AccountId,
    pub provider: String,
    /// Customer or invoice number at the provider.
    pub payee_reference: String,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

impl BillPayment {
    pub fn into_request(self, config: &EngineConfig) -> Result<TransferRequest, TransferError> {
        let provider = required("Provider", &self.provider)?;
        let payee_reference = required("Payee reference", &self.payee_reference)?;

        if !config.knows_bill_provider(provider) {
            return Err(TransferError::InvalidPayload(format!(
                "Unknown bill provider {provider}"
            )));
        }

        let mut metadata = self.metadata;
        metadata.category.get_or_insert_with(|| "bills".into());

        Ok(TransferRequest::new(
            TransferKind::BillPayment,
            self.source,
            Destination::External(format!("{}:{payee_reference}", provider.to_uppercase())),
            self.amount,
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
    pub async fn bill_payment(
        &self,
        session: &Session,
        payment: BillPayment,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let request = payment.into_request(self.config())?;

        self.move_funds(session, request).await
    }
}
