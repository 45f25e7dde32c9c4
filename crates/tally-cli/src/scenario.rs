//! Scenario files: accounts, aliases, and an ordered list of operations.
//!
//! ```json
//! {
//!   "accounts": [{ "account": "A", "actual": "1000" }, { "account": "B", "actual": "0" }],
//!   "aliases": { "OLD-A": "A" },
//!   "operations": [
//!     { "op": "settle", "request": { "reference": { "ref_number": "R-1" }, "from": "A",
//!       "to": "B", "amount": "500", "currency": "IDR", "flow": "transfer", "stage": "reserve" } },
//!     { "op": "commit", "reference": { "ref_number": "R-1" } }
//!   ]
//! }
//! ```

use std::{collections::BTreeMap, sync::Arc};

use rust_decimal::Decimal;
use serde::Deserialize;
use tally_settlement::{
    AliasTable, ChannelNotifier, DeferredAggregator, FlowCatalog, MemoryStore,
    PartitionedChannel, Settler, StaticCatalog, Store,
};
use tally_types::{
    AccountNumber, Balance, BalancePolicy, EngineConfig, MovementId, ReferenceKey, Result,
    SettlementNotification, SettlementRequest, TallyError, constants,
};

#[derive(Debug, Deserialize)]
pub struct AccountSeed {
    pub account: AccountNumber,
    pub actual: Decimal,
    #[serde(default)]
    pub pending: Decimal,
    #[serde(default)]
    pub policy: BalancePolicy,
}

impl From<AccountSeed> for Balance {
    fn from(seed: AccountSeed) -> Self {
        Self {
            account: seed.account,
            actual: seed.actual,
            pending: seed.pending,
            policy: seed.policy,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Settle { request: SettlementRequest },
    Batch { requests: Vec<SettlementRequest> },
    Commit { reference: ReferenceKey },
    Cancel { reference: ReferenceKey },
}

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
    #[serde(default)]
    pub aliases: BTreeMap<AccountNumber, AccountNumber>,
    pub operations: Vec<Operation>,
}

impl Scenario {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What a scenario run produced.
#[derive(Debug, Default)]
pub struct Report {
    pub notifications: Vec<SettlementNotification>,
    /// Final balances after deferred adjustments were folded in.
    pub balances: Vec<Balance>,
    pub failed: usize,
}

/// Run every operation in order. A failed operation is logged and
/// counted; the run continues with the next one.
pub async fn run(scenario: Scenario, config: &EngineConfig) -> Result<Report> {
    let store = MemoryStore::new();
    for seed in scenario.accounts {
        store.open_account(seed.into());
    }
    let aliases: AliasTable = scenario.aliases.into_iter().collect();
    let catalog = StaticCatalog::from_config(config);

    // Notifications are drained after every operation, so the channel only
    // has to hold the largest batch.
    let largest_batch = scenario
        .operations
        .iter()
        .map(|op| match op {
            Operation::Batch { requests } => requests.len(),
            _ => 1,
        })
        .max()
        .unwrap_or(1);
    let (notifier, mut notifications) =
        ChannelNotifier::new(largest_batch.max(constants::DEFAULT_NOTIFICATION_CAPACITY));
    let (channel, receivers) = PartitionedChannel::from_config(config);
    let aggregators: Vec<_> = receivers
        .into_iter()
        .enumerate()
        .map(|(partition, receiver)| {
            let aggregator = DeferredAggregator::new(partition, Arc::new(store.clone()), receiver);
            tokio::spawn(aggregator.run())
        })
        .collect();

    let settler = Settler::new(
        config,
        Arc::new(store.clone()),
        Arc::new(notifier),
        Arc::new(channel),
    )
    .with_aliases(Arc::new(aliases));

    let mut report = Report::default();
    for (index, operation) in scenario.operations.into_iter().enumerate() {
        if let Err(err) = apply(&settler, &store, &catalog, operation).await {
            tracing::error!(
                operation = index,
                error = %err,
                ledger_mutated = err.ledger_mutated(),
                "Operation failed"
            );
            report.failed += 1;
        }
        while let Ok(notification) = notifications.try_recv() {
            report.notifications.push(notification);
        }
    }

    // Dropping the settler closes the deferred channel, which stops the
    // aggregators once they have drained it.
    drop(settler);
    for handle in aggregators {
        handle
            .await
            .map_err(|err| TallyError::Internal(format!("aggregator task: {err}")))??;
    }

    report.balances = store.balances();
    Ok(report)
}

async fn apply(
    settler: &Settler,
    store: &MemoryStore,
    catalog: &StaticCatalog,
    operation: Operation,
) -> Result<()> {
    match operation {
        Operation::Settle { request } => {
            catalog.check(&request.reference).await?;
            settler.settle(request).await?;
        }
        Operation::Batch { requests } => {
            for request in &requests {
                catalog.check(&request.reference).await?;
            }
            let batch = settler.settle_batch(requests).await?;
            tracing::info!(
                settled = batch.settlements.len(),
                duplicates = batch.duplicates.len(),
                "Batch applied"
            );
        }
        Operation::Commit { reference } => {
            let id = lookup(store, &reference).await?;
            settler.commit(id).await?;
        }
        Operation::Cancel { reference } => {
            let id = lookup(store, &reference).await?;
            settler.cancel(id).await?;
        }
    }
    Ok(())
}

async fn lookup(store: &MemoryStore, reference: &ReferenceKey) -> Result<MovementId> {
    store
        .find_by_reference(reference)
        .await?
        .map(|movement| movement.id)
        .ok_or_else(|| TallyError::InvalidRequest {
            reason: format!("no movement recorded under {reference}"),
        })
}
