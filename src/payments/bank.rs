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

/// A transfer to a bank account, either at the home bank (internal) or at another bank (external).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankTransfer {
    pub source: AccountId,
    pub bank_code: String,
    pub account_number: String,
    pub receiver_name: String,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

impl BankTransfer {
    pub fn into_request(self, config: &EngineConfig) -> Result<TransferRequest, TransferError> {
        let bank_code = required("Bank code", &self.bank_code)?;
        let account_number = required("Account number", &self.account_number)?;
        let receiver_name = required("Receiver name", &self.receiver_name)?;

        let destination = if config.is_home_bank(bank_code) {
            // account numbers of the home bank are our own account ids
            Destination::Internal(AccountId::new(account_number))
        } else if config.knows_bank(bank_code) {
            Destination::External(format!(
                "{}:{account_number} ({receiver_name})",
                bank_code.to_uppercase()
            ))
        } else {
            return Err(TransferError::InvalidPayload(format!(
                "Unknown bank {bank_code}"
            )));
        };

        Ok(TransferRequest::new(
            TransferKind::BankTransfer,
            self.source,
            destination,
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
    pub async fn bank_transfer(
        &self,
        session: &Session,
        transfer: BankTransfer,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let request = transfer.into_request(self.config())?;

        self.move_funds(session, request).await
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_matches, assert_ok};
    use rust_decimal::dec;

    use super::*;

    fn transfer(bank_code: &str, account_number: &str, receiver_name: &str) -> BankTransfer {
        BankTransfer {
            source: AccountId::new("acc-1"),
            bank_code: bank_code.into(),
            account_number: account_number.into(),
            receiver_name: receiver_name.into(),
            amount: dec!(250),
            idempotency_key: IdempotencyKey::new("k-1"),
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn home_bank_accounts_are_internal() {
        let config = EngineConfig::default();

        let request = assert_ok!(transfer("abys", " acc-2 ", "Abebe Kebede").into_request(&config));

        assert_eq!(request.kind, TransferKind::BankTransfer);
        assert_eq!(request.destination, Destination::Internal(AccountId::new("acc-2")));
    }

    #[test]
    fn other_banks_are_external() {
        let config = EngineConfig::default();

        let order = transfer("cbe", "1000123456789", "Abebe Kebede");
        let request = assert_ok!(order.into_request(&config));

        assert_eq!(
            request.destination,
            Destination::External("CBE:1000123456789 (Abebe Kebede)".into())
        );
    }

    #[test]
    fn unknown_banks_are_refused() {
        let config = EngineConfig::default();

        let res = transfer("NOPE", "1", "Abebe Kebede").into_request(&config);

        assert_matches!(res, Err(TransferError::InvalidPayload(_)));
    }

    #[test]
    fn every_destination_field_is_required() {
        let config = EngineConfig::default();

        for res in [
            transfer(" ", "1", "Abebe").into_request(&config),
            transfer("CBE", "", "Abebe").into_request(&config),
            transfer("CBE", "1", "  ").into_request(&config),
        ] {
            assert_matches!(res, Err(TransferError::InvalidPayload(_)));
        }
    }
}
