use rust_decimal::Decimal;

use super::required;
use crate::directory::UserDirectory;
use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::models::Currency;
use crate::models::account::{Account, AccountId};
use crate::models::entry::{LedgerEntry, TransferKind};
use crate::models::request::{Destination, IdempotencyKey, Metadata, TransferRequest};
use crate::models::user::{Session, User};
use crate::repository::{Store, bounded};

/// Sends money to another user, found by email address or phone number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerTransfer {
    pub source: AccountId,
    pub recipient: String,
    pub amount: Decimal,
    pub idempotency_key: IdempotencyKey,
    pub metadata: Metadata,
}

impl<S, D> TransferEngine<S, D>
where
    S: Store,
    D: UserDirectory,
{
    pub async fn peer_transfer(
        &self,
        session: &Session,
        transfer: PeerTransfer,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let recipient = required("Recipient", &transfer.recipient)?;
        let store_timeout = self.config().store_timeout();

        let user = bounded(
            store_timeout,
            "Resolving the recipient",
            self.directory().resolve(recipient),
        )
        .await?
        .filter(User::is_active)
        .ok_or_else(|| TransferError::DestinationNotFound(recipient.to_string()))?;

        let accounts = bounded(
            store_timeout,
            "Reading the accounts of the recipient",
            self.store().accounts_by_owner(&user.id),
        )
        .await?;

        let receiving = receiving_account(&accounts, &self.config().currency)
            .ok_or_else(|| TransferError::RecipientHasNoAccount(user.id.clone()))?;

        let request = TransferRequest::new(
            TransferKind::PeerTransfer,
            transfer.source,
            Destination::Internal(receiving.id.clone()),
            transfer.amount,
            transfer.idempotency_key,
        )
        .with_metadata(transfer.metadata);

        self.move_funds(session, request).await
    }
}

/// The first active account, by id, held in `currency`.
fn receiving_account<'a>(accounts: &'a [Account], currency: &Currency) -> Option<&'a Account> {
    accounts
        .iter()
        .filter(|acc| acc.is_active() && &acc.currency == currency)
        .min_by(|a, b| a.id.cmp(&b.id))
}
