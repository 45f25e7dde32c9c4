//! # tally-settlement
//!
//! **Settlement plane**: idempotent, atomic application of movements to the
//! ledger, and post-commit delivery.
//!
//! ## Architecture
//!
//! A [`Settler`] receives a [`SettlementRequest`](tally_types::SettlementRequest)
//! (or a movement ID to commit / cancel) and:
//! 1. Rejects malformed requests before touching storage
//! 2. Short-circuits duplicate references ([`IdempotencyGuard`])
//! 3. Locks the touched balances inside one [`UnitOfWork`]
//! 4. Applies the calculator for `(flow, stage)` from `tally-calc`
//! 5. Writes ordinary balances, routes deferred ones to a
//!    [`DeferredTransport`]
//! 6. Commits, then publishes a notification through a [`Notifier`]
//!
//! ## Collaborators
//!
//! Every collaborator is an object-safe async trait injected as `Arc<dyn _>`:
//! [`Store`], [`Notifier`], [`DeferredTransport`], [`AliasResolver`], and
//! the caller-side [`FlowCatalog`]. In-process implementations
//! ([`MemoryStore`], [`ChannelNotifier`], [`PartitionedChannel`],
//! [`AliasTable`], [`StaticCatalog`]) back the tests and the CLI harness.

pub mod aggregator;
pub mod alias;
pub mod catalog;
pub mod deferred;
pub mod idempotency;
pub mod lifecycle;
pub mod memory;
pub mod notify;
pub mod orchestrator;
pub mod store;

pub use aggregator::DeferredAggregator;
pub use alias::{AliasResolver, AliasTable};
pub use catalog::{FlowCatalog, StaticCatalog};
pub use deferred::{DeferredTransport, PartitionedChannel, partition_for};
pub use idempotency::{BatchPartition, IdempotencyGuard};
pub use memory::{FailPoint, MemoryStore};
pub use notify::{ChannelNotifier, Notifier};
pub use orchestrator::{BatchSettlement, Settlement, Settler};
pub use store::{Store, UnitOfWork};
