//! Balance tracking types for the Tally hold/settle model.
//!
//! Every account has an `actual` balance (settled funds) and a `pending`
//! balance (funds held against reservations that have not been committed
//! or cancelled). The debit-eligible `available` amount is always derived
//! as `actual - pending`; it is never stored.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AccountNumber;

/// Per-account policy flags that shape how debits are checked and how
/// writes are routed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalancePolicy {
    /// Skip the insufficient-funds check (system / clearing accounts).
    #[serde(default)]
    pub ignore_sufficiency: bool,
    /// High-volume pooled account: deltas go to the deferred channel
    /// instead of a synchronous row write.
    #[serde(default)]
    pub is_deferred: bool,
    /// Whether `available` may drop below zero.
    #[serde(default)]
    pub negative_allowed: bool,
    /// Floor magnitude when `negative_allowed`: `available >= -negative_limit`.
    #[serde(default)]
    pub negative_limit: Decimal,
}

impl BalancePolicy {
    /// Lowest `available` value a debit may leave behind.
    #[must_use]
    pub fn floor(&self) -> Decimal {
        if self.negative_allowed {
            -self.negative_limit.abs()
        } else {
            Decimal::ZERO
        }
    }
}

/// Point-in-time balance of one account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Balance {
    pub account: AccountNumber,
    /// Settled amount, changed only by committed / immediate movements.
    pub actual: Decimal,
    /// Amount held against reserved movements.
    pub pending: Decimal,
    #[serde(default)]
    pub policy: BalancePolicy,
}

impl Balance {
    /// Create a zero balance with the default policy.
    #[must_use]
    pub fn new(account: AccountNumber) -> Self {
        Self {
            account,
            actual: Decimal::ZERO,
            pending: Decimal::ZERO,
            policy: BalancePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: BalancePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Debit-eligible amount: `actual - pending`.
    #[must_use]
    pub fn available(&self) -> Decimal {
        self.actual - self.pending
    }

    /// Whether `available` sits at or above the policy floor.
    #[must_use]
    pub fn is_within_floor(&self) -> bool {
        self.policy.ignore_sufficiency || self.available() >= self.policy.floor()
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.actual.is_zero() && self.pending.is_zero()
    }
}

/// Test fixtures. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl Balance {
    /// A plain account holding `actual` settled funds.
    pub fn funded(account: &str, actual: i64) -> Self {
        Self {
            account: AccountNumber::new(account),
            actual: Decimal::new(actual, 0),
            pending: Decimal::ZERO,
            policy: BalancePolicy::default(),
        }
    }

    /// A deferred (pooled) account holding `actual` settled funds.
    pub fn deferred(account: &str, actual: i64) -> Self {
        Self::funded(account, actual).with_policy(BalancePolicy {
            is_deferred: true,
            ..BalancePolicy::default()
        })
    }
}
