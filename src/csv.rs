use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use csv::{Reader, ReaderBuilder, Trim};
use futures::stream::{self, FusedStream, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::error;

use crate::models::{Currency, Money};
use crate::models::account::{Account, AccountId, AccountStatus};
use crate::models::entry::TransferKind;
use crate::models::request::{Destination, IdempotencyKey, Metadata, TransferRequest};
use crate::models::user::{Session, UserId};
use crate::payments::{
    BankTransfer, BillPayment, MobileMoneyTransfer, PaymentOrder, PeerTransfer, QrPayment,
};

/// Reads the CSV inputs of the command line front end.
///
/// It will be constructed with a reader, which is something that implements [std::io::Read], so files, stdin and
/// in-memory buffers all work. The construction is separate from decoding because the reader has to outlive any
/// consumer of the [FusedStream] returned by [CsvDecoder::decode_orders].
///
/// A payment record carries different fields depending on its type. The records are deserialized into the flat
/// internal [DePaymentRecord] first and then converted into a [PaymentOrder] via `TryFrom`, so the rest of the
/// crate only ever sees the fields a kind actually has.
pub struct CsvDecoder<R> {
    reader: Reader<R>,
}

impl<R: Read> CsvDecoder<R> {
    pub fn new(reader: R) -> Self {
        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .has_headers(true)
            .delimiter(b',')
            .from_reader(reader);

        Self { reader }
    }

    /// Opening balances. Unlike payment records a broken account row aborts the run.
    pub fn decode_accounts(&mut self) -> Result<Vec<Account>> {
        self.reader
            .deserialize::<DeAccountRecord>()
            .enumerate()
            .map(|(idx, rec)| {
                rec.context("Failed to deserialize CSV record into DeAccountRecord")
                    .and_then(Account::try_from)
                    .with_context(|| format!("Invalid account in row {}", idx + 1))
            })
            .collect()
    }

    /// Payment records that fail to decode are logged and skipped.
    pub fn decode_orders(&mut self) -> impl FusedStream<Item = (Session, PaymentOrder)> {
        let records = self
            .reader
            .deserialize::<DePaymentRecord>()
            .map(|rec| rec.context("Failed to deserialize CSV record into DePaymentRecord"))
            .filter_map(|deserialized| {
                deserialized
                    .and_then(<(Session, PaymentOrder)>::try_from)
                    .inspect_err(|err| {
                        error!("Skipping payment record: {err:#}");
                    })
                    .ok()
            });

        stream::iter(records).fuse()
    }
}

pub struct CsvEncoder;

impl CsvEncoder {
    pub fn encode_balances<W: Write>(sink: W, accounts: &[Account]) -> Result<()> {
        let mut writer = csv::Writer::from_writer(sink);
        for acc in accounts {
            writer
                .serialize(acc)
                .context("Failed to serialize account to CSV")?;
        }
        writer.flush().context("Failed to flush the writer")?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DeAccountRecord {
    account: AccountId,
    owner: UserId,
    currency: String,
    #[serde(with = "rust_decimal::serde::str")]
    balance: Decimal,
    status: Option<AccountStatus>,
}

impl TryFrom<DeAccountRecord> for Account {
    type Error = anyhow::Error;

    fn try_from(rec: DeAccountRecord) -> Result<Self, Self::Error> {
        let balance = Money::from_decimal(rec.balance)?;
        let mut account = Account::new(rec.account, rec.owner, Currency::new(rec.currency))
            .with_balance(balance);
        account.status = rec.status.unwrap_or(AccountStatus::Active);

        Ok(account)
    }
}

/// Flat shape of a payment row: `type,user,key,source,to_account,payee,amount,description`.
///
/// Exactly one of `to_account` and `payee` is set. `payee` is kind specific:
/// `BANK:ACCOUNT:RECEIVER` for bank transfers, `PROVIDER:REFERENCE` for bills, `PROVIDER:PHONE` for mobile money,
/// the scanned JSON for QR payments and an email or phone for peer transfers.
#[derive(Debug, Deserialize)]
struct DePaymentRecord {
    #[serde(rename = "type")]
    kind: TransferKind,
    user: UserId,
    key: IdempotencyKey,
    source: AccountId,
    to_account: Option<AccountId>,
    payee: Option<String>,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    amount: Option<Decimal>,
    description: Option<String>,
}

impl TryFrom<DePaymentRecord> for (Session, PaymentOrder) {
    type Error = anyhow::Error;

    fn try_from(rec: DePaymentRecord) -> Result<Self, Self::Error> {
        let session = Session::new(rec.user);
        let metadata = Metadata {
            description: rec.description,
            category: None,
        };
        let key = rec.key;
        let amount = || rec.amount.with_context(|| format!("Payment {key} carries no amount"));

        let order = match (rec.to_account, rec.payee) {
            (Some(_), Some(_)) => bail!("Payment {key} names both to_account and payee"),
            (None, None) => bail!("Payment {key} names neither to_account nor payee"),

            (Some(to_account), None) => {
                if matches!(rec.kind, TransferKind::BillPayment | TransferKind::MobileMoney) {
                    bail!("Payment {key} of type {} can't go to an internal account", rec.kind);
                }
                PaymentOrder::Direct(
                    TransferRequest::new(
                        rec.kind,
                        rec.source,
                        Destination::Internal(to_account),
                        amount()?,
                        key.clone(),
                    )
                    .with_metadata(metadata),
                )
            }

            (None, Some(payee)) => match rec.kind {
                TransferKind::BankTransfer => {
                    let mut parts = payee.splitn(3, ':');
                    let (Some(bank_code), Some(account_number), Some(receiver_name)) =
                        (parts.next(), parts.next(), parts.next())
                    else {
                        bail!("Bank payee of {key} must look like BANK:ACCOUNT:RECEIVER, got {payee}");
                    };

                    PaymentOrder::Bank(BankTransfer {
                        source: rec.source,
                        bank_code: bank_code.into(),
                        account_number: account_number.into(),
                        receiver_name: receiver_name.into(),
                        amount: amount()?,
                        idempotency_key: key.clone(),
                        metadata,
                    })
                }

                TransferKind::BillPayment => {
                    let (provider, payee_reference) = split_pair(&payee).with_context(|| {
                        format!("Bill payee of {key} must look like PROVIDER:REFERENCE")
                    })?;

                    PaymentOrder::Bill(BillPayment {
                        source: rec.source,
                        provider,
                        payee_reference,
                        amount: amount()?,
                        idempotency_key: key.clone(),
                        metadata,
                    })
                }

                TransferKind::MobileMoney => {
                    let (provider, phone) = split_pair(&payee).with_context(|| {
                        format!("Mobile money payee of {key} must look like PROVIDER:PHONE")
                    })?;

                    PaymentOrder::MobileMoney(MobileMoneyTransfer {
                        source: rec.source,
                        provider,
                        phone,
                        amount: amount()?,
                        idempotency_key: key.clone(),
                        metadata,
                    })
                }

                TransferKind::QrPayment => PaymentOrder::Qr(QrPayment {
                    source: rec.source,
                    payload: payee,
                    amount: rec.amount,
                    idempotency_key: key.clone(),
                    metadata,
                }),

                TransferKind::PeerTransfer => PaymentOrder::Peer(PeerTransfer {
                    source: rec.source,
                    recipient: payee,
                    amount: amount()?,
                    idempotency_key: key.clone(),
                    metadata,
                }),
            },
        };

        Ok((session, order))
    }
}

fn split_pair(raw: &str) -> Option<(String, String)> {
    raw.split_once(':')
        .map(|(left, right)| (left.to_string(), right.to_string()))
}
