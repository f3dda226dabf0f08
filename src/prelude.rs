pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::EngineConfig;
pub use crate::csv::{CsvDecoder, CsvEncoder};
pub use crate::directory::{InMemoryUserDirectory, UserDirectory};
pub use crate::engine::{BatchSummary, Statement, TransferEngine};
pub use crate::error::TransferError;
pub use crate::payments::{
    BankTransfer, BillPayment, MobileMoneyTransfer, PaymentOrder, PeerTransfer, QrPayment,
};
pub use crate::repository::account::AccountRepository;
pub use crate::repository::idempotency::IdempotencyRepository;
pub use crate::repository::ledger::LedgerRepository;
pub use crate::repository::memory::{FailPoint, InMemoryStore};
pub use crate::repository::{Order, Page, Store};
