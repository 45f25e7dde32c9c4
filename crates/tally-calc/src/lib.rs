//! # tally-calc
//!
//! **Pure balance transition calculators for Tally.**
//!
//! Given a flow, a lifecycle stage, the two parties, an amount, and the
//! current balances, produce the new balance of every touched account.
//!
//! - **Zero side effects**: no storage reads or writes, no clocks, no I/O
//! - **All-or-nothing**: on error no delta is produced and the caller's
//!   balances are untouched
//! - **One dispatch point**: `(flow, stage)` selects a [`Calculator`]
//!   once per request
//!
//! ```text
//! calculate(flow, stage, from, to, amount, balances) -> BalanceDelta
//! ```

pub mod calculator;
pub mod delta;
pub mod sufficiency;

pub use calculator::{Calculator, Parties, calculate};
pub use delta::BalanceDelta;
pub use sufficiency::check_debit;
