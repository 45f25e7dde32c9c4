//! # tally-types
//!
//! Shared types, errors, and configuration for the **Tally** settlement core.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`AccountNumber`], [`MovementId`], [`ReferenceKey`]
//! - **Balance model**: [`Balance`], [`BalancePolicy`]
//! - **Movement model**: [`Movement`], [`MovementStatus`], [`Flow`], [`Stage`]
//! - **Requests**: [`SettlementRequest`]
//! - **Events**: [`SettlementNotification`], [`TouchedAccount`], [`DeferredAdjustment`]
//! - **Configuration**: [`EngineConfig`], [`LoggingConfig`]
//! - **Errors**: [`TallyError`] with `TL_ERR_` prefix codes
//! - **Constants**: defaults and limits

pub mod balance;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod ids;
pub mod movement;
pub mod request;

// Re-export all primary types at crate root for ergonomic imports:
//   use tally_types::{Balance, Movement, SettlementRequest, ...};

pub use balance::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use ids::*;
pub use movement::*;
pub use request::*;

// Constants are accessed via `tally_types::constants::FOO`
// (not re-exported to avoid name collisions).
