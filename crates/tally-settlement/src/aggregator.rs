//! Downstream consumer of deferred adjustments.
//!
//! One aggregator owns one partition of the deferred channel, so it is the
//! only writer for the accounts hashed to that partition. It nets every
//! queued adjustment per account and applies the result in one unit of
//! work: `actual -= sum(amount_delta)`.
//!
//! When the combined unit of work fails, each account is retried on its
//! own. Adjustments for an account that still cannot be applied are kept
//! aside (see [`DeferredAggregator::take_rejected`]) and the rest of the
//! batch goes through.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use rust_decimal::Decimal;
use tally_types::{AccountNumber, DeferredAdjustment, Result, TallyError, constants};
use tokio::sync::mpsc;

use crate::store::Store;

/// Net `amount_delta` per account.
///
/// # Errors
/// `InvalidAmount` naming the account whose running total overflows.
pub fn net(batch: &[DeferredAdjustment]) -> Result<BTreeMap<AccountNumber, Decimal>> {
    let mut netted: BTreeMap<AccountNumber, Decimal> = BTreeMap::new();
    for adjustment in batch {
        let total = netted
            .entry(adjustment.account_number.clone())
            .or_default();
        *total = total
            .checked_add(adjustment.amount_delta)
            .ok_or_else(|| overflow(&adjustment.account_number))?;
    }
    Ok(netted)
}

pub struct DeferredAggregator {
    partition: usize,
    store: Arc<dyn Store>,
    receiver: mpsc::Receiver<DeferredAdjustment>,
    batch_limit: usize,
    rejected: Vec<DeferredAdjustment>,
}

impl DeferredAggregator {
    pub fn new(
        partition: usize,
        store: Arc<dyn Store>,
        receiver: mpsc::Receiver<DeferredAdjustment>,
    ) -> Self {
        Self {
            partition,
            store,
            receiver,
            batch_limit: constants::DEFERRED_AGGREGATE_BATCH,
            rejected: Vec::new(),
        }
    }

    /// Cap the number of adjustments folded into one unit of work.
    #[must_use]
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Wait for at least one adjustment, then apply it together with
    /// whatever else is already queued. Returns the number applied.
    ///
    /// Returns `None` once the channel is closed and empty.
    pub async fn drain(&mut self) -> Result<Option<usize>> {
        let Some(first) = self.receiver.recv().await else {
            return Ok(None);
        };
        let mut batch = vec![first];
        self.fill(&mut batch);
        Ok(Some(self.apply(batch).await))
    }

    /// Apply whatever is queued without waiting. Returns the number of
    /// adjustments applied.
    pub async fn drain_ready(&mut self) -> Result<usize> {
        let mut batch = Vec::new();
        self.fill(&mut batch);
        if batch.is_empty() {
            return Ok(0);
        }
        Ok(self.apply(batch).await)
    }

    /// Adjustments that could not be applied, oldest first. Cleared by the
    /// call; the caller decides whether to republish or escalate them.
    pub fn take_rejected(&mut self) -> Vec<DeferredAdjustment> {
        std::mem::take(&mut self.rejected)
    }

    /// Consume the partition until every sender is dropped.
    pub async fn run(mut self) -> Result<u64> {
        let mut applied = 0u64;
        loop {
            match self.drain().await {
                Ok(Some(count)) => applied += count as u64,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(
                        partition = self.partition,
                        error = %err,
                        "Deferred drain failed"
                    );
                }
            }
        }
        tracing::info!(
            partition = self.partition,
            applied,
            rejected = self.rejected.len(),
            "Deferred aggregator stopped"
        );
        Ok(applied)
    }

    fn fill(&mut self, batch: &mut Vec<DeferredAdjustment>) {
        while batch.len() < self.batch_limit {
            match self.receiver.try_recv() {
                Ok(adjustment) => batch.push(adjustment),
                Err(_) => break,
            }
        }
    }

    /// Apply `batch`, falling back to one unit of work per account.
    async fn apply(&mut self, batch: Vec<DeferredAdjustment>) -> usize {
        let mut by_account: BTreeMap<AccountNumber, Vec<DeferredAdjustment>> = BTreeMap::new();
        for adjustment in batch {
            by_account
                .entry(adjustment.account_number.clone())
                .or_default()
                .push(adjustment);
        }

        let all: Vec<DeferredAdjustment> = by_account.values().flatten().cloned().collect();
        match self.apply_together(&all).await {
            Ok(()) => return all.len(),
            Err(err) => tracing::warn!(
                partition = self.partition,
                accounts = by_account.len(),
                error = %err,
                "Deferred batch failed, retrying per account"
            ),
        }

        let mut applied = 0;
        for (account, adjustments) in by_account {
            match self.apply_together(&adjustments).await {
                Ok(()) => applied += adjustments.len(),
                Err(err) => {
                    tracing::error!(
                        partition = self.partition,
                        account = %account,
                        adjustments = adjustments.len(),
                        error = %err,
                        "Deferred adjustments rejected"
                    );
                    self.rejected.extend(adjustments);
                }
            }
        }
        applied
    }

    async fn apply_together(&self, batch: &[DeferredAdjustment]) -> Result<()> {
        let netted = net(batch)?;
        let accounts: BTreeSet<AccountNumber> = netted.keys().cloned().collect();

        let mut uow = self.store.begin().await?;
        let rows = uow.lock_balances(&accounts).await?;
        for (account, delta) in &netted {
            let mut balance = rows
                .get(account)
                .cloned()
                .ok_or_else(|| TallyError::AccountNotFound(account.clone()))?;
            balance.actual = balance
                .actual
                .checked_sub(*delta)
                .ok_or_else(|| overflow(account))?;
            uow.write_balance(&balance).await?;
        }
        uow.commit().await?;

        tracing::info!(
            partition = self.partition,
            adjustments = batch.len(),
            accounts = netted.len(),
            "Deferred adjustments applied"
        );
        Ok(())
    }
}

fn overflow(account: &AccountNumber) -> TallyError {
    TallyError::InvalidAmount {
        reason: format!("deferred total for {account} overflows"),
    }
}
