use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;

use transfer_engine::models::account::{Account, AccountId};
use transfer_engine::models::entry::TransferKind;
use transfer_engine::models::request::{Destination, IdempotencyKey, TransferRequest};
use transfer_engine::models::user::{Session, User, UserId};
use transfer_engine::models::{Currency, Money};
use transfer_engine::prelude::{
    AccountRepository, Clock, EngineConfig, InMemoryStore, InMemoryUserDirectory, ManualClock,
    TransferEngine,
};

pub struct Components {
    pub engine: TransferEngine<InMemoryStore, InMemoryUserDirectory>,
    pub store: Arc<InMemoryStore>,
    pub directory: Arc<InMemoryUserDirectory>,
    pub clock: Arc<ManualClock>,
}

impl Components {
    pub fn setup() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::with_lock_timeout(config.lock_timeout()));
        let directory = Arc::new(InMemoryUserDirectory::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let engine = TransferEngine::new(
            Arc::clone(&store),
            Arc::clone(&directory),
            Arc::clone(&clock) as Arc<dyn Clock>,
            config,
        );

        Self {
            engine,
            store,
            directory,
            clock,
        }
    }

    pub async fn open_account(&self, id: &str, owner: &str, balance: Decimal) -> AccountId {
        let account = Account::new(AccountId::new(id), UserId::new(owner), Currency::etb())
            .with_balance(Money::from_decimal(balance).unwrap());
        self.store.insert_account(account).await.unwrap();

        AccountId::new(id)
    }

    pub async fn register(&self, user: User) {
        self.directory.insert(user).await.unwrap();
    }

    pub async fn balance(&self, id: &AccountId) -> Money {
        let account = self.store.account(id).await.unwrap();

        account
            .unwrap_or_else(|| panic!("Expected account {id} to be present"))
            .balance
    }

    pub async fn total_balance(&self) -> i64 {
        self.store
            .accounts()
            .await
            .iter()
            .map(|acc| acc.balance.minor())
            .sum()
    }
}

pub fn session(user: &str) -> Session {
    Session::new(UserId::new(user))
}

pub fn internal(
    source: &AccountId,
    destination: &AccountId,
    amount: Decimal,
    key: &str,
) -> TransferRequest {
    TransferRequest::new(
        TransferKind::BankTransfer,
        source.clone(),
        Destination::Internal(destination.clone()),
        amount,
        IdempotencyKey::new(key),
    )
}

pub fn external(source: &AccountId, payee: &str, amount: Decimal, key: &str) -> TransferRequest {
    TransferRequest::new(
        TransferKind::BillPayment,
        source.clone(),
        Destination::External(payee.into()),
        amount,
        IdempotencyKey::new(key),
    )
}
