//! Per-kind payment builders. Each one checks its own fields, resolves a [crate::models::request::Destination] and hands a
//! [TransferRequest] to [TransferEngine::move_funds]. None of them touches a balance.

use crate::directory::UserDirectory;
use crate::engine::TransferEngine;
use crate::error::TransferError;
use crate::models::entry::{LedgerEntry, TransferKind};
use crate::models::request::{IdempotencyKey, TransferRequest};
use crate::models::user::Session;
use crate::repository::Store;

pub mod bank;
pub mod bill;
pub mod mobile;
pub mod peer;
pub mod qr;

pub use bank::BankTransfer;
pub use bill::BillPayment;
pub use mobile::MobileMoneyTransfer;
pub use peer::PeerTransfer;
pub use qr::QrPayment;

/// One payment of any kind, as it arrives in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOrder {
    Bank(BankTransfer),
    Bill(BillPayment),
    MobileMoney(MobileMoneyTransfer),
    Qr(QrPayment),
    Peer(PeerTransfer),
    /// An already resolved internal transfer.
    Direct(TransferRequest),
}

impl PaymentOrder {
    pub fn kind(&self) -> TransferKind {
        match self {
            PaymentOrder::Bank(_) => TransferKind::BankTransfer,
            PaymentOrder::Bill(_) => TransferKind::BillPayment,
            PaymentOrder::MobileMoney(_) => TransferKind::MobileMoney,
            PaymentOrder::Qr(_) => TransferKind::QrPayment,
            PaymentOrder::Peer(_) => TransferKind::PeerTransfer,
            PaymentOrder::Direct(request) => request.kind,
        }
    }

    pub fn idempotency_key(&self) -> &IdempotencyKey {
        match self {
            PaymentOrder::Bank(order) => &order.idempotency_key,
            PaymentOrder::Bill(order) => &order.idempotency_key,
            PaymentOrder::MobileMoney(order) => &order.idempotency_key,
            PaymentOrder::Qr(order) => &order.idempotency_key,
            PaymentOrder::Peer(order) => &order.idempotency_key,
            PaymentOrder::Direct(request) => &request.idempotency_key,
        }
    }
}

impl From<BankTransfer> for PaymentOrder {
    fn from(order: BankTransfer) -> Self {
        PaymentOrder::Bank(order)
    }
}

impl From<BillPayment> for PaymentOrder {
    fn from(order: BillPayment) -> Self {
        PaymentOrder::Bill(order)
    }
}

impl From<MobileMoneyTransfer> for PaymentOrder {
    fn from(order: MobileMoneyTransfer) -> Self {
        PaymentOrder::MobileMoney(order)
    }
}

impl From<QrPayment> for PaymentOrder {
    fn from(order: QrPayment) -> Self {
        PaymentOrder::Qr(order)
    }
}

impl From<PeerTransfer> for PaymentOrder {
    fn from(order: PeerTransfer) -> Self {
        PaymentOrder::Peer(order)
    }
}

impl<S, D> TransferEngine<S, D>
where
    S: Store,
    D: UserDirectory,
{
    /// Main dispatcher over all payment kinds.
    pub async fn pay(
        &self,
        session: &Session,
        order: PaymentOrder,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        match order {
            PaymentOrder::Bank(order) => self.bank_transfer(session, order).await,
            PaymentOrder::Bill(order) => self.bill_payment(session, order).await,
            PaymentOrder::MobileMoney(order) => self.mobile_money_transfer(session, order).await,
            PaymentOrder::Qr(order) => self.qr_payment(session, order).await,
            PaymentOrder::Peer(order) => self.peer_transfer(session, order).await,
            PaymentOrder::Direct(request) => self.move_funds(session, request).await,
        }
    }
}

/// Trims a mandatory text field, refusing it if nothing is left.
pub(crate) fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, TransferError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(TransferError::InvalidPayload(format!(
            "{field} must not be blank"
        )));
    }

    Ok(trimmed)
}
