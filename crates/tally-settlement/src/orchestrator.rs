//! Atomic settlement orchestrator.
//!
//! One settlement, all-or-nothing:
//! 1. Validate the request and resolve account aliases (no locks yet)
//! 2. Duplicate check: a known reference short-circuits with its movement
//! 3. Open a unit of work and lock every touched balance
//! 4. Run the calculator selected by `(flow, stage)`
//! 5. Write non-deferred balances; collect adjustments for deferred ones
//! 6. Insert (or update) the movement record
//! 7. Commit, all under the database deadline
//! 8. After commit: publish deferred adjustments, then the notification,
//!    each under the publish deadline
//!
//! Steps 2 to 7 run under the database deadline. A failure there drops the
//! unit of work, which rolls it back. A failure in 8 is returned to the
//! caller even though the ledger has moved (see
//! [`TallyError::ledger_mutated`]); the error carries every undelivered
//! payload for [`Settler::redeliver`].

use std::{
    collections::{BTreeMap, BTreeSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use tally_calc::{BalanceDelta, Parties, calculate};
use tally_types::{
    AccountNumber, Balance, DeferredAdjustment, EngineConfig, Movement, MovementId,
    MovementStatus, ReferenceKey, Result, SettlementNotification, SettlementRequest, Stage,
    TallyError, TouchedAccount, Undelivered, constants,
};

use crate::{
    alias::{AliasResolver, AliasTable},
    deferred::{DeferredTransport, adjustments_for, direct_writes},
    idempotency::IdempotencyGuard,
    lifecycle::{self, Transition},
    notify::Notifier,
    store::{Store, UnitOfWork},
};

/// Result of one settlement call.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub movement: Movement,
    /// Before/after balance of every account the call changed. Empty on
    /// replay.
    pub touched_accounts: Vec<TouchedAccount>,
    /// `true` when the call short-circuited on an earlier result and
    /// changed nothing.
    pub replayed: bool,
}

impl Settlement {
    fn replay(movement: Movement) -> Self {
        Self {
            movement,
            touched_accounts: Vec::new(),
            replayed: true,
        }
    }
}

/// Result of a batch submission.
#[derive(Debug, Clone, Default)]
pub struct BatchSettlement {
    /// New movements, in submission order.
    pub settlements: Vec<Settlement>,
    /// References dropped as duplicates.
    pub duplicates: Vec<ReferenceKey>,
}

/// Work committed by one unit of work, waiting to be published.
struct Committed {
    settlements: Vec<Settlement>,
    adjustments: Vec<DeferredAdjustment>,
}

enum Applied {
    Replayed(Settlement),
    Committed(Committed),
}

/// The settlement engine.
///
/// Holds only its collaborators; all mutable state lives in the store.
pub struct Settler {
    store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    deferred: Arc<dyn DeferredTransport>,
    aliases: Arc<dyn AliasResolver>,
    guard: IdempotencyGuard,
    db_timeout: Duration,
    publish_timeout: Duration,
}

impl Settler {
    pub fn new(
        config: &EngineConfig,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
        deferred: Arc<dyn DeferredTransport>,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(Arc::clone(&store), config.idempotency_cache_size),
            store,
            notifier,
            deferred,
            aliases: Arc::new(AliasTable::new()),
            db_timeout: config.db_timeout(),
            publish_timeout: config.publish_timeout(),
        }
    }

    /// Resolve account aliases with `aliases` before locking.
    #[must_use]
    pub fn with_aliases(mut self, aliases: Arc<dyn AliasResolver>) -> Self {
        self.aliases = aliases;
        self
    }

    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.guard
    }

    // -----------------------------------------------------------------
    // New movements
    // -----------------------------------------------------------------

    /// Settle one request, immediately or as a hold.
    ///
    /// A reference that was already settled returns the recorded movement
    /// with `replayed = true` and publishes nothing.
    pub async fn settle(&self, request: SettlementRequest) -> Result<Settlement> {
        request.validate()?;
        let reference = request.reference.clone();
        let applied = self
            .within_deadline("settle", self.settle_one(request))
            .await
            .inspect_err(|err| {
                tracing::warn!(reference = %reference, error = %err, "Settlement aborted");
            })?;
        let committed = match applied {
            Applied::Replayed(settlement) => return Ok(settlement),
            Applied::Committed(committed) => committed,
        };
        let mut settlements = self.publish(committed).await?;
        settlements
            .pop()
            .ok_or_else(|| TallyError::Internal("settlement produced no movement".into()))
    }

    /// Settle a batch in one unit of work.
    ///
    /// Duplicate references (already settled, repeated in the batch, or
    /// recorded by a concurrent caller while the batch was running) are
    /// dropped and logged. The remaining requests settle together or not at
    /// all. A batch made only of duplicates succeeds with no movements.
    pub async fn settle_batch(&self, requests: Vec<SettlementRequest>) -> Result<BatchSettlement> {
        if requests.len() > constants::MAX_BATCH_SIZE {
            return Err(TallyError::InvalidRequest {
                reason: format!(
                    "batch of {} exceeds limit of {}",
                    requests.len(),
                    constants::MAX_BATCH_SIZE
                ),
            });
        }
        for request in &requests {
            request.validate()?;
        }

        let size = requests.len();
        let (committed, duplicates) = self
            .within_deadline("settle_batch", self.settle_fresh(requests))
            .await
            .inspect_err(|err| {
                tracing::warn!(requests = size, error = %err, "Batch aborted");
            })?;
        let settlements = match committed {
            Some(committed) => self.publish(committed).await?,
            None => Vec::new(),
        };
        Ok(BatchSettlement {
            settlements,
            duplicates,
        })
    }

    /// Retry delivery of the payloads carried by
    /// [`TallyError::DeliveryIncomplete`]. Adjustments go out before
    /// notifications, as on the first attempt.
    ///
    /// # Errors
    /// `DeliveryIncomplete` with whatever is still undelivered.
    pub async fn redeliver(&self, undelivered: Undelivered) -> Result<()> {
        let committed = undelivered.movements();
        tracing::info!(
            movements = committed.len(),
            notifications = undelivered.notifications.len(),
            adjustments = undelivered.adjustments.len(),
            "Redelivering post-commit payloads"
        );
        self.deliver(committed, undelivered).await
    }

    // -----------------------------------------------------------------
    // Reserve lifecycle
    // -----------------------------------------------------------------

    /// Commit a reserved movement. Committing an already-committed
    /// movement returns it unchanged.
    pub async fn commit(&self, id: MovementId) -> Result<Settlement> {
        self.finish(id, MovementStatus::Success).await
    }

    /// Cancel a reserved movement. Cancelling an already-cancelled
    /// movement returns it unchanged.
    pub async fn cancel(&self, id: MovementId) -> Result<Settlement> {
        self.finish(id, MovementStatus::Cancel).await
    }

    async fn finish(&self, id: MovementId, target: MovementStatus) -> Result<Settlement> {
        let operation = match target {
            MovementStatus::Cancel => "cancel",
            _ => "commit",
        };
        let committed = self
            .within_deadline(operation, self.apply_transition(id, target))
            .await
            .inspect_err(|err| {
                tracing::warn!(movement = %id, operation, error = %err, "Transition aborted");
            })?;
        let Some(committed) = committed else {
            tracing::info!(movement = %id, status = %target, "Already final, replaying");
            let movement = self
                .store
                .movement(id)
                .await?
                .ok_or(TallyError::MovementNotFound(id))?;
            return Ok(Settlement::replay(movement));
        };
        let mut settlements = self.publish(committed).await?;
        settlements
            .pop()
            .ok_or_else(|| TallyError::Internal("transition produced no movement".into()))
    }

    // -----------------------------------------------------------------
    // Unit of work
    // -----------------------------------------------------------------

    async fn settle_one(&self, request: SettlementRequest) -> Result<Applied> {
        if let Some(existing) = self.guard.existing(&request.reference).await? {
            tracing::info!(
                reference = %request.reference,
                movement = %existing.id,
                "Duplicate reference, returning recorded movement"
            );
            return Ok(Applied::Replayed(Settlement::replay(existing)));
        }
        let request = self.canonicalize(request).await?;
        match self.apply_new(std::slice::from_ref(&request)).await {
            Ok(committed) => Ok(Applied::Committed(committed)),
            Err(TallyError::ReferenceConflict(key)) => {
                self.replay_conflict(&key).await.map(Applied::Replayed)
            }
            Err(err) => Err(err),
        }
    }

    /// Settle the never-seen requests of a batch. `None` when nothing was
    /// left to settle.
    async fn settle_fresh(
        &self,
        requests: Vec<SettlementRequest>,
    ) -> Result<(Option<Committed>, Vec<ReferenceKey>)> {
        let partition = self.guard.partition(requests).await?;
        let mut duplicates = partition.duplicates;

        let mut fresh = Vec::with_capacity(partition.fresh.len());
        for request in partition.fresh {
            fresh.push(self.canonicalize(request).await?);
        }

        // Each conflict removes one request, so this ends.
        while !fresh.is_empty() {
            match self.apply_new(&fresh).await {
                Ok(committed) => return Ok((Some(committed), duplicates)),
                Err(TallyError::ReferenceConflict(key)) => {
                    let before = fresh.len();
                    fresh.retain(|request| request.reference != key);
                    if fresh.len() == before {
                        return Err(TallyError::ReferenceConflict(key));
                    }
                    tracing::warn!(
                        reference = %key,
                        "Reference recorded concurrently, dropped from batch"
                    );
                    duplicates.push(key);
                }
                Err(err) => return Err(err),
            }
        }
        tracing::info!(duplicates = duplicates.len(), "Batch contained only duplicates");
        Ok((None, duplicates))
    }

    async fn apply_new(&self, requests: &[SettlementRequest]) -> Result<Committed> {
        let accounts: BTreeSet<AccountNumber> = requests
            .iter()
            .flat_map(|r| r.from.iter().chain(r.to.iter()))
            .cloned()
            .collect();

        let mut uow = self.store.begin().await?;
        let mut book = uow.lock_balances(&accounts).await?;

        let mut combined = BalanceDelta::new();
        let mut settlements = Vec::with_capacity(requests.len());
        let mut adjustments = Vec::new();
        for request in requests {
            if request.stage == Stage::Reserve {
                reject_deferred_hold(request.from.as_ref(), &book)?;
            }
            let movement = request.to_movement(MovementId::deterministic(&request.reference));
            let delta = run_calculator(&movement, request.stage, &book)?;
            delta.apply_to(&mut book);
            adjustments.extend(adjustments_for(&movement, &delta));
            uow.insert_movement(&movement).await?;

            tracing::debug!(
                movement = %movement.id,
                reference = %movement.reference,
                flow = %movement.flow,
                stage = %request.stage,
                amount = %movement.amount,
                "Movement calculated"
            );
            settlements.push(Settlement {
                touched_accounts: delta.clone().into_touched(),
                movement,
                replayed: false,
            });
            combined.absorb(delta);
        }

        write_all(uow.as_mut(), &combined).await?;
        uow.commit().await?;

        for settlement in &settlements {
            self.guard
                .remember(settlement.movement.reference.clone(), settlement.movement.id);
            tracing::info!(
                movement = %settlement.movement.id,
                reference = %settlement.movement.reference,
                status = %settlement.movement.status,
                "Movement settled"
            );
        }
        Ok(Committed {
            settlements,
            adjustments,
        })
    }

    /// `None` when the movement was already in `target`.
    async fn apply_transition(
        &self,
        id: MovementId,
        target: MovementStatus,
    ) -> Result<Option<Committed>> {
        let mut uow = self.store.begin().await?;
        let mut movement = uow.lock_movement(id).await?;
        let stage = match lifecycle::plan(&movement, target)? {
            Transition::Replay => {
                uow.rollback().await?;
                return Ok(None);
            }
            Transition::Apply(stage) => stage,
        };

        let accounts: BTreeSet<AccountNumber> = movement.accounts().into_iter().collect();
        let book = uow.lock_balances(&accounts).await?;
        // A pending balance smaller than the hold means the stored state is
        // inconsistent, not that the caller misused the operation.
        let delta = run_calculator(&movement, stage, &book).map_err(|err| {
            if matches!(err, TallyError::PendingUnderflow { .. }) {
                TallyError::CorruptState {
                    movement: id,
                    reason: err.to_string(),
                }
            } else {
                err
            }
        })?;

        lifecycle::finish(&mut movement, target)?;
        write_all(uow.as_mut(), &delta).await?;
        uow.update_movement(&movement).await?;
        uow.commit().await?;

        tracing::info!(
            movement = %movement.id,
            reference = %movement.reference,
            status = %movement.status,
            "Reserved movement finalised"
        );
        Ok(Some(Committed {
            adjustments: adjustments_for(&movement, &delta),
            settlements: vec![Settlement {
                movement,
                touched_accounts: delta.into_touched(),
                replayed: false,
            }],
        }))
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    async fn canonicalize(&self, mut request: SettlementRequest) -> Result<SettlementRequest> {
        if let Some(from) = &request.from {
            request.from = Some(self.aliases.resolve(from).await?);
        }
        if let Some(to) = &request.to {
            request.to = Some(self.aliases.resolve(to).await?);
        }
        // Two aliases may resolve to the same account.
        request.validate()?;
        Ok(request)
    }

    /// Run `work` under the database deadline. On expiry the future is
    /// dropped, which drops its unit of work.
    async fn within_deadline<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.db_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = u64::try_from(self.db_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(operation, timeout_ms, "Database deadline exceeded, rolled back");
                Err(TallyError::DeadlineExceeded {
                    operation,
                    timeout_ms,
                })
            }
        }
    }

    /// Lost an insert race: the winner's movement is the result.
    async fn replay_conflict(&self, key: &ReferenceKey) -> Result<Settlement> {
        let existing = self
            .store
            .find_by_reference(key)
            .await?
            .ok_or_else(|| TallyError::ReferenceConflict(key.clone()))?;
        self.guard.remember(key.clone(), existing.id);
        tracing::info!(
            reference = %key,
            movement = %existing.id,
            "Concurrent settlement won the race, returning its movement"
        );
        Ok(Settlement::replay(existing))
    }

    /// Post-commit delivery for a committed unit of work.
    async fn publish(&self, committed: Committed) -> Result<Vec<Settlement>> {
        let ids = committed
            .settlements
            .iter()
            .map(|s| s.movement.id)
            .collect();
        let notifications = committed
            .settlements
            .iter()
            .map(|s| {
                SettlementNotification::new(
                    s.movement.clone(),
                    s.touched_accounts.clone(),
                    message_for(s.movement.status),
                )
            })
            .collect();
        let payloads = Undelivered {
            notifications,
            adjustments: committed.adjustments,
        };
        self.deliver(ids, payloads).await?;
        Ok(committed.settlements)
    }

    /// Attempt every payload, deferred adjustments first so the aggregator
    /// sees them no later than notification consumers. A failure never
    /// stops the remaining attempts; everything that failed is returned.
    async fn deliver(&self, committed: Vec<MovementId>, payloads: Undelivered) -> Result<()> {
        let mut failed = Undelivered::default();
        let mut first_reason = None;

        for adjustment in payloads.adjustments {
            let send = self.deferred.publish(adjustment.clone());
            let outcome = tokio::time::timeout(self.publish_timeout, send).await;
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => format!("publish deadline of {:?} exceeded", self.publish_timeout),
            };
            tracing::warn!(
                movement = %adjustment.movement_id,
                account = %adjustment.account_number,
                reason = %reason,
                "Deferred publish failed after commit"
            );
            first_reason.get_or_insert(reason);
            failed.adjustments.push(adjustment);
        }

        for notification in payloads.notifications {
            let send = self.notifier.publish(&notification);
            let outcome = tokio::time::timeout(self.publish_timeout, send).await;
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(TallyError::NotificationFailed { reason, .. })) => reason,
                Ok(Err(other)) => other.to_string(),
                Err(_) => format!("publish deadline of {:?} exceeded", self.publish_timeout),
            };
            tracing::warn!(
                movement = %notification.movement.id,
                key = %notification.idempotency_key,
                reason = %reason,
                "Notification failed after commit"
            );
            first_reason.get_or_insert(reason);
            failed.notifications.push(notification);
        }

        match first_reason {
            None => Ok(()),
            Some(reason) => Err(TallyError::DeliveryIncomplete {
                committed,
                undelivered: Box::new(failed),
                reason,
            }),
        }
    }
}

fn message_for(status: MovementStatus) -> &'static str {
    match status {
        MovementStatus::Pending => "funds reserved",
        MovementStatus::Success => "movement settled",
        MovementStatus::Cancel => "reservation cancelled",
    }
}

fn run_calculator(
    movement: &Movement,
    stage: Stage,
    book: &BTreeMap<AccountNumber, Balance>,
) -> Result<BalanceDelta> {
    let parties = Parties {
        from: movement.from.as_ref(),
        to: movement.to.as_ref(),
        amount: movement.amount,
    };
    calculate(movement.flow, stage, parties, book)
}

/// A hold lives in `pending`, which a deferred account never persists.
fn reject_deferred_hold(
    from: Option<&AccountNumber>,
    book: &BTreeMap<AccountNumber, Balance>,
) -> Result<()> {
    match from.and_then(|account| book.get(account)) {
        Some(balance) if balance.policy.is_deferred => Err(TallyError::InvalidRequest {
            reason: format!("deferred account {} cannot hold funds", balance.account),
        }),
        _ => Ok(()),
    }
}

async fn write_all(uow: &mut dyn UnitOfWork, delta: &BalanceDelta) -> Result<()> {
    for balance in direct_writes(delta) {
        uow.write_balance(balance).await?;
    }
    Ok(())
}
