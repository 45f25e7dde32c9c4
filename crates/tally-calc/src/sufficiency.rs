//! Insufficient-funds gate.
//!
//! Applied to every step that lowers `available` (immediate debit, hold).
//! Steps that leave `available` unchanged (consuming an existing hold) or
//! raise it (credit, release) are not gated.

use rust_decimal::Decimal;
use tally_types::{Balance, Result, TallyError};

/// Check that a debit of `amount` taking `before` to `after` keeps the
/// account at or above its floor.
///
/// Deferred accounts are checked like any other, against the last known
/// `available` read at the start of the unit of work.
///
/// # Errors
/// Returns [`TallyError::InsufficientFunds`] carrying the pre-debit
/// `available`.
pub fn check_debit(before: &Balance, after: &Balance, amount: Decimal) -> Result<()> {
    if after.is_within_floor() {
        return Ok(());
    }
    tracing::debug!(
        account = %before.account,
        amount = %amount,
        available = %before.available(),
        floor = %before.policy.floor(),
        "Debit rejected: insufficient funds"
    );
    Err(TallyError::InsufficientFunds {
        account: before.account.clone(),
        needed: amount,
        available: before.available(),
    })
}
