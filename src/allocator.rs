use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::TransferError;
use crate::models::entry::{LedgerEntry, Reference};
use crate::models::request::{IdempotencyKey, RequestShape};
use crate::repository::bounded;
use crate::repository::idempotency::{IdempotencyRecord, IdempotencyRepository, ReservationState};
use crate::repository::ledger::LedgerRepository;

/// A competing caller can move the record between our read and our swap. Past this many rounds we give up.
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The key is ours, execute under this reference.
    Fresh(Reference),
    /// The request already completed, these are its entries.
    Replay(Vec<LedgerEntry>),
}

/// Hands out transfer references and guards idempotency keys.
pub struct ReferenceAllocator<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    reservation_timeout: TimeDelta,
    store_timeout: Duration,
}

impl<S> ReferenceAllocator<S>
where
    S: IdempotencyRepository + LedgerRepository,
{
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &EngineConfig) -> Self {
        Self {
            store,
            clock,
            reservation_timeout: config.reservation_timeout(),
            store_timeout: config.store_timeout(),
        }
    }

    pub async fn reserve(
        &self,
        key: &IdempotencyKey,
        shape: RequestShape,
    ) -> Result<Reservation, TransferError> {
        for _ in 0..MAX_ATTEMPTS {
            let now = self.clock.now();
            let reference = Reference::new_at(now);
            let record = IdempotencyRecord::reserved(key.clone(), shape.clone(), reference, now);

            let existing = bounded(
                self.store_timeout,
                "Reserving the idempotency key",
                self.store.try_reserve(record),
            )
            .await?;

            let Some(existing) = existing else {
                debug!(key = %key, reference = %reference, "Reserved idempotency key");
                return Ok(Reservation::Fresh(reference));
            };

            if existing.shape != shape {
                return Err(TransferError::Conflict(format!(
                    "Idempotency key {key} was already used for a different request"
                )));
            }

            match existing.state {
                ReservationState::Completed { reference, entries } => {
                    info!(key = %key, reference = %reference, "Replaying completed request");
                    return Ok(Reservation::Replay(entries));
                }

                ReservationState::Reserved { reference: held }
                    if now - existing.updated_at < self.reservation_timeout =>
                {
                    return Err(TransferError::Conflict(format!(
                        "Request with idempotency key {key} is still in flight under reference {held}"
                    )));
                }

                ReservationState::Reserved { reference: held } => {
                    let entries = bounded(
                        self.store_timeout,
                        "Reading the ledger of a stale reservation",
                        self.store.entries_by_reference(&held),
                    )
                    .await?;

                    if !entries.is_empty() {
                        let completed = bounded(
                            self.store_timeout,
                            "Completing a stale reservation",
                            self.store
                                .complete_stale_reservation(key, held, entries.clone(), now),
                        )
                        .await?;

                        if completed {
                            info!(
                                key = %key,
                                reference = %held,
                                "Stale reservation had committed, replaying it"
                            );
                            return Ok(Reservation::Replay(entries));
                        }
                        continue;
                    }

                    warn!(key = %key, reference = %held, "Reclaiming abandoned reservation");
                    if let Some(fresh) = self.take_over(key, &shape, held, now).await? {
                        return Ok(Reservation::Fresh(fresh));
                    }
                }

                ReservationState::Failed { reference: held } => {
                    if let Some(fresh) = self.take_over(key, &shape, held, now).await? {
                        debug!(
                            key = %key,
                            failed = %held,
                            reference = %fresh,
                            "Retrying failed request"
                        );
                        return Ok(Reservation::Fresh(fresh));
                    }
                }
            }
        }

        Err(TransferError::Conflict(format!(
            "Idempotency key {key} is contended, gave up after {MAX_ATTEMPTS} attempts"
        )))
    }

    /// The reservation wrote nothing and the request was refused, the key becomes unseen again.
    pub async fn release(
        &self,
        key: &IdempotencyKey,
        reference: Reference,
    ) -> Result<(), TransferError> {
        bounded(
            self.store_timeout,
            "Releasing the reservation",
            self.store.release_reservation(key, reference),
        )
        .await
    }

    pub async fn fail(
        &self,
        key: &IdempotencyKey,
        reference: Reference,
    ) -> Result<(), TransferError> {
        bounded(
            self.store_timeout,
            "Marking the reservation failed",
            self.store.fail_reservation(key, reference, self.clock.now()),
        )
        .await
    }

    async fn take_over(
        &self,
        key: &IdempotencyKey,
        shape: &RequestShape,
        held: Reference,
        now: DateTime<Utc>,
    ) -> Result<Option<Reference>, TransferError> {
        let fresh = Reference::new_at(now);
        let record = IdempotencyRecord::reserved(key.clone(), shape.clone(), fresh, now);

        let swapped = bounded(
            self.store_timeout,
            "Taking over the reservation",
            self.store.take_over_reservation(held, record),
        )
        .await?;

        Ok(swapped.then_some(fresh))
    }
}
