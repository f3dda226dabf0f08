use futures::stream::{self, StreamExt};
use rust_decimal::dec;

use transfer_engine::models::Money;
use transfer_engine::models::account::AccountId;
use transfer_engine::models::request::{IdempotencyKey, Metadata};
use transfer_engine::models::user::{User, UserId};
use transfer_engine::prelude::{
    AccountRepository, BatchSummary, BillPayment, CsvDecoder, CsvEncoder, PaymentOrder,
};

use setup::{Components, internal, session};

mod setup;

#[tokio::test]
async fn process_reports_processed_and_failed_orders() {
    let fx = Components::setup();
    let a = fx.open_account("acc-a", "u1", dec!(100)).await;
    let b = fx.open_account("acc-b", "u2", dec!(0)).await;

    let bill = BillPayment {
        source: a.clone(),
        provider: "AAWSA".into(),
        payee_reference: "W-88".into(),
        amount: dec!(30),
        idempotency_key: IdempotencyKey::new("k-2"),
        metadata: Metadata::default(),
    };
    let orders = vec![
        (session("u1"), PaymentOrder::Direct(internal(&a, &b, dec!(50), "k-1"))),
        (session("u1"), PaymentOrder::from(bill)),
        // not enough left
        (session("u1"), PaymentOrder::Direct(internal(&a, &b, dec!(50), "k-3"))),
        // replay of the first order
        (session("u1"), PaymentOrder::Direct(internal(&a, &b, dec!(50), "k-1"))),
    ];

    let summary = fx.engine.process(stream::iter(orders).fuse()).await;

    assert_eq!(
        summary,
        BatchSummary {
            processed: 4,
            failed: 1
        }
    );
    assert_eq!(fx.balance(&a).await, Money::from_minor(2_000));
    assert_eq!(fx.balance(&b).await, Money::from_minor(5_000));
}

#[tokio::test]
async fn csv_batch_end_to_end() {
    let fx = Components::setup();
    let accounts = "account,owner,currency,balance,status\n\
                    acc-a,u1,ETB,1000.00,active\n\
                    acc-b,u2,ETB,500.00,active\n";
    for account in CsvDecoder::new(accounts.as_bytes()).decode_accounts().unwrap() {
        fx.store.insert_account(account).await.unwrap();
    }
    fx.register(User::new(UserId::new("u2")).with_email("almaz@example.com"))
        .await;

    let requests = "type,user,key,source,to_account,payee,amount,description\n\
                    bank_transfer,u1,k-1,acc-a,acc-b,,200,rent\n\
                    bill_payment,u1,k-2,acc-a,,EEU:0042,150.50,\n\
                    peer_transfer,u1,k-3,acc-a,,almaz@example.com,10,\n\
                    mobile_money,u2,k-4,acc-b,,mpesa:0711223344,100000,too much\n";
    let mut decoder = CsvDecoder::new(requests.as_bytes());

    let summary = fx.engine.process(decoder.decode_orders()).await;

    assert_eq!(summary.processed, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(fx.balance(&AccountId::new("acc-a")).await, Money::from_minor(63_950));
    assert_eq!(fx.balance(&AccountId::new("acc-b")).await, Money::from_minor(71_000));

    let mut out = Vec::new();
    CsvEncoder::encode_balances(&mut out, &fx.store.accounts().await).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "account,owner,currency,balance,status\n\
         acc-a,u1,ETB,639.50,active\n\
         acc-b,u2,ETB,710.00,active\n"
    );
}
