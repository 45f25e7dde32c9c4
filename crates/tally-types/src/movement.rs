//! # Movement: one monetary instruction between two parties
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐    commit    ┌─────────┐
//!   │ PENDING ├─────────────▶│ SUCCESS │
//!   └────┬────┘              └─────────┘
//!        │ cancel
//!        ▼
//!   ┌────────┐
//!   │ CANCEL │
//!   └────────┘
//! ```
//!
//! Immediate flows are created directly in SUCCESS. Both terminal states
//! are final; re-applying the same terminal transition is handled by the
//! settlement engine as an idempotent no-op, never by mutating the record.

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountNumber, MovementId, ReferenceKey, Result, TallyError};

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// Semantic category of a movement. Decides which sides are debited and
/// credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flow {
    /// Funds enter the ledger: credit `to` only.
    CashIn,
    /// Funds leave the ledger: debit `from` only.
    CashOut,
    Transfer,
    Refund,
    /// Any other two-party debit-and-credit movement.
    Generic,
}

impl Flow {
    pub const ALL: [Flow; 5] = [
        Flow::CashIn,
        Flow::CashOut,
        Flow::Transfer,
        Flow::Refund,
        Flow::Generic,
    ];

    /// Whether the `from` account is debited.
    #[must_use]
    pub fn debits_source(self) -> bool {
        !matches!(self, Self::CashIn)
    }

    /// Whether the `to` account is credited.
    #[must_use]
    pub fn credits_destination(self) -> bool {
        !matches!(self, Self::CashOut)
    }

    /// A hold needs a debtor, so only debiting flows can be reserved.
    #[must_use]
    pub fn supports_hold(self) -> bool {
        self.debits_source()
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CashIn => "cash-in",
            Self::CashOut => "cash-out",
            Self::Transfer => "transfer",
            Self::Refund => "refund",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flow {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cash-in" | "cashin" | "topup" => Ok(Self::CashIn),
            "cash-out" | "cashout" | "withdrawal" => Ok(Self::CashOut),
            "transfer" | "p2p" => Ok(Self::Transfer),
            "refund" => Ok(Self::Refund),
            "generic" => Ok(Self::Generic),
            _ => Err(TallyError::UnsupportedFlow(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Lifecycle stage a calculator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Debit and credit `actual` in one step.
    Immediate,
    /// Hold funds on the source (`pending += amount`).
    Reserve,
    /// Consume the hold and move the funds.
    Commit,
    /// Release the hold.
    Cancel,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "IMMEDIATE"),
            Self::Reserve => write!(f, "RESERVE"),
            Self::Commit => write!(f, "COMMIT"),
            Self::Cancel => write!(f, "CANCEL"),
        }
    }
}

// ---------------------------------------------------------------------------
// MovementStatus
// ---------------------------------------------------------------------------

/// The lifecycle state of a movement.
///
/// Transitions are **monotonic**:
/// - `Pending → Success` (commit)
/// - `Pending → Cancel` (cancel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MovementStatus {
    Pending,
    Success,
    Cancel,
}

impl MovementStatus {
    /// Can a movement in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!((self, target), (Self::Pending, Self::Success | Self::Cancel))
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Cancel => write!(f, "CANCEL"),
        }
    }
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// A persisted movement record. Owned and exclusively written by the
/// settlement engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Movement {
    pub id: MovementId,
    /// External idempotency key.
    pub reference: ReferenceKey,
    /// Debited account. Absent for cash-in.
    pub from: Option<AccountNumber>,
    /// Credited account. Absent for cash-out.
    pub to: Option<AccountNumber>,
    pub amount: Decimal,
    pub currency: String,
    pub flow: Flow,
    pub status: MovementStatus,
    pub transaction_time: DateTime<Utc>,
    /// Caller on whose behalf the movement was submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub updated_at: DateTime<Utc>,
}

impl Movement {
    /// Check that a stored record can still drive a commit or cancel.
    ///
    /// # Errors
    /// Returns [`TallyError::CorruptState`] when the amount is not positive
    /// or an account the flow needs is missing.
    pub fn check_integrity(&self) -> Result<()> {
        let corrupt = |reason: &str| TallyError::CorruptState {
            movement: self.id,
            reason: reason.to_string(),
        };
        if self.amount <= Decimal::ZERO {
            return Err(corrupt("amount is not positive"));
        }
        if self.flow.debits_source() && self.from.as_ref().is_none_or(AccountNumber::is_blank) {
            return Err(corrupt("source account missing"));
        }
        if self.flow.credits_destination() && self.to.as_ref().is_none_or(AccountNumber::is_blank)
        {
            return Err(corrupt("destination account missing"));
        }
        Ok(())
    }

    /// Every account this movement touches, source first.
    #[must_use]
    pub fn accounts(&self) -> Vec<AccountNumber> {
        self.from.iter().chain(self.to.iter()).cloned().collect()
    }

    /// Transition to SUCCESS.
    ///
    /// # Errors
    /// Returns [`TallyError::InvalidTransition`] unless the movement is PENDING.
    pub fn mark_success(&mut self) -> Result<()> {
        self.transition(MovementStatus::Success)
    }

    /// Transition to CANCEL.
    ///
    /// # Errors
    /// Returns [`TallyError::InvalidTransition`] unless the movement is PENDING.
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.transition(MovementStatus::Cancel)
    }

    fn transition(&mut self, target: MovementStatus) -> Result<()> {
        if !self.status.can_transition_to(target) {
            return Err(TallyError::InvalidTransition {
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_movement(status: MovementStatus) -> Movement {
        Movement {
            id: MovementId::new(),
            reference: ReferenceKey::new("REF-1"),
            from: Some(AccountNumber::new("A")),
            to: Some(AccountNumber::new("B")),
            amount: Decimal::new(500, 0),
            currency: "IDR".into(),
            flow: Flow::Transfer,
            status,
            transaction_time: Utc::now(),
            client_id: None,
            metadata: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn state_transitions_valid() {
        assert!(MovementStatus::Pending.can_transition_to(MovementStatus::Success));
        assert!(MovementStatus::Pending.can_transition_to(MovementStatus::Cancel));
    }

    #[test]
    fn state_transitions_invalid() {
        assert!(!MovementStatus::Success.can_transition_to(MovementStatus::Cancel));
        assert!(!MovementStatus::Success.can_transition_to(MovementStatus::Success));
        assert!(!MovementStatus::Cancel.can_transition_to(MovementStatus::Success));
        assert!(!MovementStatus::Pending.can_transition_to(MovementStatus::Pending));
    }

    #[test]
    fn mark_success_from_pending() {
        let mut m = make_movement(MovementStatus::Pending);
        m.mark_success().unwrap();
        assert_eq!(m.status, MovementStatus::Success);
    }

    #[test]
    fn cancelled_cannot_succeed() {
        let mut m = make_movement(MovementStatus::Pending);
        m.mark_cancelled().unwrap();
        let err = m.mark_success().unwrap_err();
        assert!(matches!(err, TallyError::InvalidTransition { .. }));
        assert_eq!(m.status, MovementStatus::Cancel);
    }

    #[test]
    fn integrity_rejects_zero_amount() {
        let mut m = make_movement(MovementStatus::Pending);
        m.amount = Decimal::ZERO;
        assert!(matches!(
            m.check_integrity().unwrap_err(),
            TallyError::CorruptState { .. }
        ));
    }

    #[test]
    fn integrity_requires_source_for_debiting_flows() {
        let mut m = make_movement(MovementStatus::Pending);
        m.from = None;
        assert!(m.check_integrity().is_err());

        m.flow = Flow::CashIn;
        assert!(m.check_integrity().is_ok());
    }

    #[test]
    fn flow_sides() {
        assert!(!Flow::CashIn.debits_source());
        assert!(Flow::CashIn.credits_destination());
        assert!(Flow::CashOut.debits_source());
        assert!(!Flow::CashOut.credits_destination());
        for flow in [Flow::Transfer, Flow::Refund, Flow::Generic] {
            assert!(flow.debits_source() && flow.credits_destination());
        }
        assert!(!Flow::CashIn.supports_hold());
    }

    #[test]
    fn flow_parsing() {
        assert_eq!("cash-in".parse::<Flow>().unwrap(), Flow::CashIn);
        assert_eq!("CASH_OUT".parse::<Flow>().unwrap(), Flow::CashOut);
        assert_eq!(" refund ".parse::<Flow>().unwrap(), Flow::Refund);
        let err = "swap".parse::<Flow>().unwrap_err();
        assert!(matches!(err, TallyError::UnsupportedFlow(ref s) if s == "swap"));
    }

    #[test]
    fn status_wire_format() {
        let json = serde_json::to_string(&MovementStatus::Success).unwrap();
        assert_eq!(json, "\"SUCCESS\"");
        let flow = serde_json::to_string(&Flow::CashOut).unwrap();
        assert_eq!(flow, "\"cash-out\"");
    }
}
