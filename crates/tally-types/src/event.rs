//! Outbound event types.
//!
//! Two payloads leave the engine:
//! - [`SettlementNotification`]: published after a unit of work commits,
//!   describing the movement and the before/after balance of every
//!   touched account. Delivery is at-least-once; consumers deduplicate
//!   on `idempotency_key`.
//! - [`DeferredAdjustment`]: published for deferred (pooled) accounts in
//!   place of a synchronous balance write, keyed by account number.

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountNumber, Balance, Movement, MovementId, MovementStatus};

/// Before/after snapshot of one account touched by a movement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TouchedAccount {
    pub account: AccountNumber,
    pub balance_before: Balance,
    pub balance_after: Balance,
}

impl TouchedAccount {
    /// Change in `available`, `after - before`.
    #[must_use]
    pub fn available_change(&self) -> Decimal {
        self.balance_after.available() - self.balance_before.available()
    }
}

/// Post-commit notification describing one settled movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementNotification {
    pub movement: Movement,
    pub touched_accounts: Vec<TouchedAccount>,
    pub status: MovementStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Stable across redeliveries of the same movement state.
    pub idempotency_key: String,
}

impl SettlementNotification {
    #[must_use]
    pub fn new(
        movement: Movement,
        touched_accounts: Vec<TouchedAccount>,
        message: impl Into<String>,
    ) -> Self {
        let idempotency_key = Self::key_for(movement.id, movement.status);
        Self {
            status: movement.status,
            client_id: movement.client_id.clone(),
            movement,
            touched_accounts,
            message: message.into(),
            idempotency_key,
        }
    }

    /// `hex(SHA-256("tally:notification:v1:" || movement_id || status))`
    #[must_use]
    pub fn key_for(movement: MovementId, status: MovementStatus) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"tally:notification:v1:");
        hasher.update(movement.0.as_bytes());
        hasher.update(status.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Deferred-settlement transport payload.
///
/// `amount_delta` is `available_before - available_after`: positive for a
/// debit or a new hold, negative for a credit or a released hold. The
/// consumer applies it as `actual -= amount_delta`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeferredAdjustment {
    pub account_number: AccountNumber,
    pub movement_id: MovementId,
    pub ref_number: String,
    pub amount_delta: Decimal,
    pub currency: String,
}

/// Post-commit payloads that did not reach their collaborator.
///
/// Carried by [`crate::TallyError::DeliveryIncomplete`] so the
/// caller can hand them back for redelivery. Notifications keep their
/// `idempotency_key`, so a consumer that did receive one drops the repeat.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Undelivered {
    pub notifications: Vec<SettlementNotification>,
    pub adjustments: Vec<DeferredAdjustment>,
}

impl Undelivered {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty() && self.adjustments.is_empty()
    }

    /// Movements with at least one undelivered payload, sorted.
    #[must_use]
    pub fn movements(&self) -> Vec<MovementId> {
        let ids: BTreeSet<MovementId> = self
            .notifications
            .iter()
            .map(|n| n.movement.id)
            .chain(self.adjustments.iter().map(|a| a.movement_id))
            .collect();
        ids.into_iter().collect()
    }
}
