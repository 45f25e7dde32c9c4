//! Deferred-settlement routing.
//!
//! Balances flagged `is_deferred` are pooled accounts that take part in a
//! large share of movements. Writing them under a row lock would serialize
//! the whole ledger behind them, so the orchestrator never writes them.
//! Instead each movement publishes one [`DeferredAdjustment`] per deferred
//! account it touched, and a downstream aggregator folds them in later.
//!
//! Sign convention: `amount_delta = available_before - available_after`.
//! A debit or new hold yields a positive delta, a credit or released hold a
//! negative one, and the aggregator applies `actual -= amount_delta`.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tally_calc::BalanceDelta;
use tally_types::{
    AccountNumber, Balance, DeferredAdjustment, EngineConfig, Movement, Result, TallyError,
};
use tokio::sync::mpsc;

/// Transport for deferred adjustments, ordered per account.
#[async_trait]
pub trait DeferredTransport: Send + Sync {
    async fn publish(&self, adjustment: DeferredAdjustment) -> Result<()>;
}

/// Adjustments owed by `movement` for the deferred accounts in `delta`.
/// Accounts whose `available` did not move produce nothing.
#[must_use]
pub fn adjustments_for(movement: &Movement, delta: &BalanceDelta) -> Vec<DeferredAdjustment> {
    delta
        .iter()
        .filter(|touched| touched.balance_before.policy.is_deferred)
        .filter_map(|touched| {
            let amount_delta = -touched.available_change();
            (!amount_delta.is_zero()).then(|| DeferredAdjustment {
                account_number: touched.account.clone(),
                movement_id: movement.id,
                ref_number: movement.reference.ref_number.clone(),
                amount_delta,
                currency: movement.currency.clone(),
            })
        })
        .collect()
}

/// New balances that must be written synchronously.
pub fn direct_writes(delta: &BalanceDelta) -> impl Iterator<Item = &Balance> {
    delta
        .iter()
        .filter(|touched| !touched.balance_before.policy.is_deferred)
        .map(|touched| &touched.balance_after)
}

/// Partition owning `account`: first 8 bytes of SHA-256 of the account
/// number, big-endian, modulo `partitions`.
#[must_use]
pub fn partition_for(account: &AccountNumber, partitions: usize) -> usize {
    let digest = Sha256::digest(account.as_str().as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let partitions = u64::try_from(partitions.max(1)).unwrap_or(u64::MAX);
    // The remainder is below `partitions`, which came from a usize.
    usize::try_from(u64::from_be_bytes(prefix) % partitions).unwrap_or(0)
}

/// [`DeferredTransport`] over N bounded `tokio` channels.
#[derive(Debug, Clone)]
pub struct PartitionedChannel {
    partitions: Vec<mpsc::Sender<DeferredAdjustment>>,
}

impl PartitionedChannel {
    /// Create the channel and one receiver per partition, in partition order.
    #[must_use]
    pub fn new(
        partitions: usize,
        capacity: usize,
    ) -> (Self, Vec<mpsc::Receiver<DeferredAdjustment>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..partitions.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        (Self { partitions: senders }, receivers)
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> (Self, Vec<mpsc::Receiver<DeferredAdjustment>>) {
        Self::new(config.deferred_partitions, config.deferred_channel_capacity)
    }

    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

#[async_trait]
impl DeferredTransport for PartitionedChannel {
    async fn publish(&self, adjustment: DeferredAdjustment) -> Result<()> {
        let partition = partition_for(&adjustment.account_number, self.partitions.len());
        let (movement, account) = (adjustment.movement_id, adjustment.account_number.clone());
        tracing::debug!(
            account = %account,
            movement = %movement,
            delta = %adjustment.amount_delta,
            partition,
            "Deferred adjustment published"
        );
        let sender = self.partitions.get(partition).ok_or_else(|| {
            TallyError::Internal(format!("partition {partition} out of range"))
        })?;
        sender
            .send(adjustment)
            .await
            .map_err(|_| TallyError::DeferredPublishFailed {
                movement,
                account,
                reason: format!("partition {partition} closed"),
            })
    }
}
