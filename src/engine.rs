use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{FusedStream, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::pin;
use tracing::{error, info, warn};

use crate::allocator::{ReferenceAllocator, Reservation};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::directory::UserDirectory;
use crate::error::TransferError;
use crate::models::Money;
use crate::models::account::{Account, AccountId, AccountStatus};
use crate::models::entry::{Counterparty, Direction, EntryStatus, LedgerEntry, Reference};
use crate::models::request::{Destination, RequestShape, TransferRequest};
use crate::models::user::Session;
use crate::payments::PaymentOrder;
use crate::repository::{BalanceWrite, Changeset, EntryQuery, Page, Store, bounded};

/// Debit and credit totals of one account over a time range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Statement {
    pub total_debits: Money,
    pub total_credits: Money,
    pub entry_count: usize,
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
}

/// We use static dispatch for the engine, dyn dispatch is not necessary for a single store and directory.
///
/// Every money movement of every payment kind ends up in [TransferEngine::move_funds].
pub struct TransferEngine<S, D> {
    store: Arc<S>,
    directory: Arc<D>,
    allocator: Arc<ReferenceAllocator<S>>,
    clock: Arc<dyn Clock>,
    config: Arc<EngineConfig>,
}

// derive(Clone) would demand S: Clone and D: Clone
impl<S, D> Clone for TransferEngine<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            directory: Arc::clone(&self.directory),
            allocator: Arc::clone(&self.allocator),
            clock: Arc::clone(&self.clock),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S, D> TransferEngine<S, D>
where
    S: Store,
    D: UserDirectory,
{
    pub fn new(
        store: Arc<S>,
        directory: Arc<D>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let allocator = ReferenceAllocator::new(Arc::clone(&store), Arc::clone(&clock), &config);

        Self {
            store,
            directory,
            allocator: Arc::new(allocator),
            clock,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn directory(&self) -> &D {
        &self.directory
    }

    /// Moves `request.amount` from the caller's source account to the destination.
    ///
    /// Returns the published ledger entries, the debit leg first. A request whose idempotency key already completed
    /// returns the entries of that first execution and moves nothing.
    pub async fn move_funds(
        &self,
        session: &Session,
        request: TransferRequest,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let amount = parse_amount(request.amount, self.config.max_transfer_amount)?;
        if request.idempotency_key.is_blank() {
            return Err(TransferError::InvalidPayload(
                "Idempotency key must not be blank".into(),
            ));
        }

        let source = self.owned_account(session, &request.source).await?;
        source.ensure_active()?;
        if source.currency != self.config.currency {
            return Err(TransferError::CurrencyMismatch {
                expected: self.config.currency.clone(),
                found: source.currency,
            });
        }

        if let Destination::Internal(destination) = &request.destination {
            self.check_destination(&source, destination).await?;
        }

        let shape = RequestShape {
            user_id: session.user_id.clone(),
            kind: request.kind,
            source: request.source.clone(),
            destination: request.destination.clone(),
            amount,
        };
        let reference = match self.allocator.reserve(&request.idempotency_key, shape).await? {
            Reservation::Fresh(reference) => reference,
            Reservation::Replay(entries) => return Ok(entries),
        };

        // Once the reservation is ours the transfer runs to its end, even if the caller stops waiting.
        let engine = self.clone();
        let execution =
            tokio::spawn(async move { engine.execute(request, amount, reference).await });

        match execution.await {
            Ok(res) => res,
            Err(join_err) => Err(TransferError::storage(
                anyhow::Error::new(join_err).context(format!("Transfer {reference} was aborted")),
            )),
        }
    }

    async fn execute(
        &self,
        request: TransferRequest,
        amount: Money,
        reference: Reference,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let key = request.idempotency_key.clone();
        let res = self.commit_transfer(&request, amount, reference).await;

        match &res {
            Ok(_) => {
                info!(
                    reference = %reference,
                    key = %key,
                    account = %request.source,
                    kind = %request.kind,
                    amount = %amount,
                    "Transfer committed"
                );
            }

            Err(err) if err.is_retryable() => {
                error!(
                    reference = %reference,
                    key = %key,
                    "Transfer failed, nothing was applied: {err:#}"
                );
                if let Err(mark_err) = self.allocator.fail(&key, reference).await {
                    warn!(
                        reference = %reference,
                        key = %key,
                        "Failed to mark the reservation failed: {mark_err:#}"
                    );
                }
            }

            Err(err) => {
                warn!(reference = %reference, key = %key, "Transfer refused: {err}");
                if let Err(release_err) = self.allocator.release(&key, reference).await {
                    warn!(
                        reference = %reference,
                        key = %key,
                        "Failed to release the reservation: {release_err:#}"
                    );
                }
            }
        }

        res
    }

    async fn commit_transfer(
        &self,
        request: &TransferRequest,
        amount: Money,
        reference: Reference,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let mut ids = vec![request.source.clone()];
        if let Destination::Internal(destination) = &request.destination {
            ids.push(destination.clone());
        }

        let locks = bounded(
            self.config.store_timeout(),
            "Locking the accounts",
            self.store.lock_accounts(&ids),
        )
        .await?;

        let mut source = locks
            .account(&request.source)
            .cloned()
            .ok_or_else(|| TransferError::AccountNotFound(request.source.clone()))?;
        source.ensure_active()?;
        source.try_debit(amount)?;

        let now = self.clock.now();
        let counterparty = match &request.destination {
            Destination::Internal(id) => Counterparty::Account(id.clone()),
            Destination::External(payee) => Counterparty::External(payee.clone()),
        };

        let mut balances = vec![BalanceWrite {
            account_id: source.id.clone(),
            balance: source.balance,
        }];
        let mut entries = vec![leg(
            request,
            reference,
            &source,
            Direction::Debit,
            amount,
            counterparty,
            now,
        )];

        if let Destination::Internal(destination) = &request.destination {
            let mut target = locks
                .account(destination)
                .filter(|acc| acc.is_active())
                .cloned()
                .ok_or_else(|| TransferError::DestinationNotFound(destination.to_string()))?;
            target.try_credit(amount)?;

            balances.push(BalanceWrite {
                account_id: target.id.clone(),
                balance: target.balance,
            });
            entries.push(leg(
                request,
                reference,
                &target,
                Direction::Credit,
                amount,
                Counterparty::Account(source.id.clone()),
                now,
            ));
        }

        let changes = Changeset {
            balances,
            entries: entries.clone(),
            completes: Some((request.idempotency_key.clone(), reference)),
        };

        bounded(
            self.config.store_timeout(),
            "Committing the transfer",
            self.store.commit(&locks, changes),
        )
        .await?;
        drop(locks);

        Ok(entries
            .into_iter()
            .map(|mut entry| {
                entry.status = EntryStatus::Completed;
                entry
            })
            .collect())
    }

    pub async fn entries_for_account(
        &self,
        session: &Session,
        account_id: &AccountId,
        page: Page,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        self.owned_account(session, account_id).await?;

        self.query(vec![account_id.clone()], None, None, page).await
    }

    pub async fn entries_for_user(
        &self,
        session: &Session,
        page: Page,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let ids: Vec<AccountId> = self
            .owned_accounts(session)
            .await?
            .into_iter()
            .map(|acc| acc.id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        self.query(ids, None, None, page).await
    }

    /// The caller's legs of one transfer. Legs on other users' accounts are not disclosed.
    pub async fn entries_by_reference(
        &self,
        session: &Session,
        reference: &Reference,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let owned: HashSet<AccountId> = self
            .owned_accounts(session)
            .await?
            .into_iter()
            .map(|acc| acc.id)
            .collect();

        let entries = bounded(
            self.config.store_timeout(),
            "Reading entries by reference",
            self.store.entries_by_reference(reference),
        )
        .await?;

        Ok(entries
            .into_iter()
            .filter(|entry| owned.contains(&entry.account_id))
            .collect())
    }

    /// Entries created within `[from, to)`.
    pub async fn entries_in_range(
        &self,
        session: &Session,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: Page,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        check_range(from, to)?;
        self.owned_account(session, account_id).await?;

        self.query(vec![account_id.clone()], Some(from), Some(to), page)
            .await
    }

    pub async fn statement(
        &self,
        session: &Session,
        account_id: &AccountId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Statement, TransferError> {
        check_range(from, to)?;
        self.owned_account(session, account_id).await?;

        let query = EntryQuery {
            accounts: vec![account_id.clone()],
            from: Some(from),
            to: Some(to),
            ..EntryQuery::default()
        };
        let entries = bounded(
            self.config.store_timeout(),
            "Reading entries for a statement",
            self.store.query_entries(&query),
        )
        .await?;

        entries
            .iter()
            .try_fold(Statement::default(), |mut statement, entry| {
                let total = match entry.direction {
                    Direction::Debit => &mut statement.total_debits,
                    Direction::Credit => &mut statement.total_credits,
                };
                *total = total.checked_add(entry.amount).ok_or_else(|| {
                    TransferError::InvalidAmount(format!(
                        "Statement totals of account {account_id} overflow"
                    ))
                })?;
                statement.entry_count += 1;

                Ok(statement)
            })
    }

    /// Soft-deletes an account of the caller. It can no longer send or receive, its history stays readable.
    pub async fn disconnect_account(
        &self,
        session: &Session,
        account_id: &AccountId,
    ) -> Result<(), TransferError> {
        self.owned_account(session, account_id).await?;

        let locks = bounded(
            self.config.store_timeout(),
            "Locking the account",
            self.store.lock_accounts(std::slice::from_ref(account_id)),
        )
        .await?;

        let Some(account) = locks.account(account_id) else {
            return Err(TransferError::AccountNotFound(account_id.clone()));
        };
        if !account.is_active() {
            return Ok(());
        }
        if account.balance.is_positive() {
            warn!(
                account = %account_id,
                balance = %account.balance,
                "Disconnecting an account that still holds funds"
            );
        }

        bounded(
            self.config.store_timeout(),
            "Disconnecting the account",
            self.store
                .set_status(&locks, account_id, AccountStatus::Disconnected),
        )
        .await?;
        info!(account = %account_id, "Account disconnected");

        Ok(())
    }

    /// This is the main entry point for batch processing, e.g. the records of a CSV file.
    pub async fn process<St>(&self, stream: St) -> BatchSummary
    where
        St: FusedStream<Item = (Session, PaymentOrder)>,
    {
        pin!(stream);
        let mut summary = BatchSummary::default();

        while let Some((session, order)) = stream.next().await {
            summary.processed += 1;
            let key = order.idempotency_key().clone();

            // The final result marks the root element of the record, so this is where failures are reported.
            let _res = self.pay(&session, order).await.inspect_err(|err| {
                summary.failed += 1;
                error!(
                    key = %key,
                    user = %session.user_id,
                    "Failed to process payment order: {err}"
                );
            });
        }

        summary
    }

    async fn owned_account(
        &self,
        session: &Session,
        account_id: &AccountId,
    ) -> Result<Account, TransferError> {
        let account = bounded(
            self.config.store_timeout(),
            "Reading the account",
            self.store.account(account_id),
        )
        .await?;

        // someone else's account is indistinguishable from a missing one
        account
            .filter(|acc| acc.owner_id == session.user_id)
            .ok_or_else(|| TransferError::AccountNotFound(account_id.clone()))
    }

    async fn owned_accounts(&self, session: &Session) -> Result<Vec<Account>, TransferError> {
        bounded(
            self.config.store_timeout(),
            "Reading the accounts of the user",
            self.store.accounts_by_owner(&session.user_id),
        )
        .await
    }

    async fn check_destination(
        &self,
        source: &Account,
        destination: &AccountId,
    ) -> Result<(), TransferError> {
        if destination == &source.id {
            return Err(TransferError::DestinationNotFound(destination.to_string()));
        }

        let target = bounded(
            self.config.store_timeout(),
            "Reading the destination account",
            self.store.account(destination),
        )
        .await?
        .filter(Account::is_active)
        .ok_or_else(|| TransferError::DestinationNotFound(destination.to_string()))?;

        if target.currency != source.currency {
            return Err(TransferError::CurrencyMismatch {
                expected: source.currency.clone(),
                found: target.currency,
            });
        }

        Ok(())
    }

    async fn query(
        &self,
        accounts: Vec<AccountId>,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        page: Page,
    ) -> Result<Vec<LedgerEntry>, TransferError> {
        let limit = page
            .limit
            .unwrap_or(self.config.default_page_size)
            .min(self.config.max_page_size);
        let query = EntryQuery {
            accounts,
            from,
            to,
            order: page.order,
            offset: page.offset,
            limit: Some(limit),
        };

        bounded(
            self.config.store_timeout(),
            "Querying ledger entries",
            self.store.query_entries(&query),
        )
        .await
    }
}

/// Converts a caller supplied amount into [Money] and checks it against `ceiling`.
pub(crate) fn parse_amount(amount: Decimal, ceiling: Money) -> Result<Money, TransferError> {
    let money = Money::from_decimal(amount)
        .map_err(|err| TransferError::InvalidAmount(format!("{err:#}")))?;

    if !money.is_positive() {
        return Err(TransferError::InvalidAmount(format!(
            "Amount must be positive, got {money}"
        )));
    }
    if money > ceiling {
        return Err(TransferError::InvalidAmount(format!(
            "Amount {money} exceeds the limit of {ceiling}"
        )));
    }

    Ok(money)
}

fn check_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), TransferError> {
    if from > to {
        return Err(TransferError::InvalidPayload(format!(
            "Range start {from} lies after its end {to}"
        )));
    }

    Ok(())
}

fn leg(
    request: &TransferRequest,
    reference: Reference,
    account: &Account,
    direction: Direction,
    amount: Money,
    counterparty: Counterparty,
    created_at: DateTime<Utc>,
) -> LedgerEntry {
    LedgerEntry {
        reference,
        account_id: account.id.clone(),
        direction,
        amount,
        currency: account.currency.clone(),
        counterparty,
        kind: request.kind,
        status: EntryStatus::Pending,
        description: request.metadata.description.clone(),
        category: request.metadata.category.clone(),
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use claims::{assert_matches, assert_ok_eq};
    use rust_decimal::dec;

    use super::*;

    #[test]
    fn amounts_are_converted_exactly() {
        let ceiling = Money::from_minor(100_000);

        assert_ok_eq!(parse_amount(dec!(12.50), ceiling), Money::from_minor(1250));
        assert_ok_eq!(parse_amount(dec!(1000), ceiling), Money::from_minor(100_000));
    }

    #[test]
    fn non_positive_amounts_are_refused() {
        let ceiling = Money::from_minor(100_000);

        assert_matches!(parse_amount(dec!(0), ceiling), Err(TransferError::InvalidAmount(_)));
        assert_matches!(parse_amount(dec!(-5), ceiling), Err(TransferError::InvalidAmount(_)));
    }

    #[test]
    fn sub_santim_and_oversized_amounts_are_refused() {
        let ceiling = Money::from_minor(100_000);

        assert_matches!(parse_amount(dec!(0.001), ceiling), Err(TransferError::InvalidAmount(_)));
        assert_matches!(parse_amount(dec!(1000.01), ceiling), Err(TransferError::InvalidAmount(_)));
    }

    #[test]
    fn reversed_ranges_are_refused() {
        let now = Utc::now();

        assert_matches!(
            check_range(now, now - chrono::TimeDelta::seconds(1)),
            Err(TransferError::InvalidPayload(_))
        );
        assert!(check_range(now, now).is_ok());
    }
}
