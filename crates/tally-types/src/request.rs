//! Caller-facing settlement request.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    AccountNumber, Flow, Movement, MovementId, MovementStatus, ReferenceKey, Result, Stage,
    TallyError,
};

/// A request to settle a new movement, either immediately or as a hold.
///
/// Commit and cancel of an existing hold are addressed by [`MovementId`]
/// and do not use this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRequest {
    pub reference: ReferenceKey,
    #[serde(default)]
    pub from: Option<AccountNumber>,
    #[serde(default)]
    pub to: Option<AccountNumber>,
    pub amount: Decimal,
    pub currency: String,
    pub flow: Flow,
    /// `Immediate` or `Reserve`.
    pub stage: Stage,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Business time of the movement. Defaults to the time of settlement.
    #[serde(default)]
    pub transaction_time: Option<DateTime<Utc>>,
}

impl SettlementRequest {
    /// Structural validation. Runs before any lock is taken.
    ///
    /// # Errors
    /// - `InvalidRequest` for a blank reference / currency, a lifecycle
    ///   stage, or a self-transfer
    /// - `InvalidAmount` for a non-positive amount
    /// - `UnsupportedStage` when reserving a flow that cannot hold funds
    /// - `MissingAccount` when the flow needs an account that is absent
    pub fn validate(&self) -> Result<()> {
        if self.reference.ref_number.trim().is_empty() {
            return Err(TallyError::InvalidRequest {
                reason: "reference number is blank".into(),
            });
        }
        if self.amount <= Decimal::ZERO {
            return Err(TallyError::InvalidAmount {
                reason: format!("amount must be positive, got {}", self.amount),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(TallyError::InvalidRequest {
                reason: "currency is blank".into(),
            });
        }
        match self.stage {
            Stage::Immediate => {}
            Stage::Reserve if self.flow.supports_hold() => {}
            Stage::Reserve => {
                return Err(TallyError::UnsupportedStage {
                    flow: self.flow,
                    stage: self.stage,
                });
            }
            Stage::Commit | Stage::Cancel => {
                return Err(TallyError::InvalidRequest {
                    reason: format!("stage {} is addressed by movement id", self.stage),
                });
            }
        }
        if self.flow.debits_source() && self.from.as_ref().is_none_or(AccountNumber::is_blank) {
            return Err(TallyError::MissingAccount {
                role: "source".into(),
            });
        }
        if self.flow.credits_destination() && self.to.as_ref().is_none_or(AccountNumber::is_blank)
        {
            return Err(TallyError::MissingAccount {
                role: "destination".into(),
            });
        }
        let two_party = self.flow.debits_source() && self.flow.credits_destination();
        match (&self.from, &self.to) {
            (Some(from), Some(to)) if two_party && from == to => {
                Err(TallyError::InvalidRequest {
                    reason: format!("source and destination are both {from}"),
                })
            }
            _ => Ok(()),
        }
    }

    /// Status a freshly created movement starts in.
    #[must_use]
    pub fn initial_status(&self) -> MovementStatus {
        match self.stage {
            Stage::Reserve => MovementStatus::Pending,
            _ => MovementStatus::Success,
        }
    }

    /// Build the movement record this request creates. Accounts are taken
    /// as given; the caller substitutes canonical numbers first.
    #[must_use]
    pub fn to_movement(&self, id: MovementId) -> Movement {
        let now = Utc::now();
        Movement {
            id,
            reference: self.reference.clone(),
            from: if self.flow.debits_source() {
                self.from.clone()
            } else {
                None
            },
            to: if self.flow.credits_destination() {
                self.to.clone()
            } else {
                None
            },
            amount: self.amount,
            currency: self.currency.clone(),
            flow: self.flow,
            status: self.initial_status(),
            transaction_time: self.transaction_time.unwrap_or(now),
            client_id: self.client_id.clone(),
            metadata: self.metadata.clone(),
            updated_at: now,
        }
    }
}

/// Test fixtures. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl SettlementRequest {
    fn fixture(
        reference: &str,
        flow: Flow,
        from: Option<&str>,
        to: Option<&str>,
        amount: i64,
    ) -> Self {
        Self {
            reference: ReferenceKey::new(reference),
            from: from.map(AccountNumber::new),
            to: to.map(AccountNumber::new),
            amount: Decimal::new(amount, 0),
            currency: "IDR".into(),
            flow,
            stage: Stage::Immediate,
            client_id: Some("test-client".into()),
            metadata: BTreeMap::new(),
            transaction_time: None,
        }
    }

    /// Immediate transfer `from → to`.
    pub fn transfer(reference: &str, from: &str, to: &str, amount: i64) -> Self {
        Self::fixture(reference, Flow::Transfer, Some(from), Some(to), amount)
    }

    /// Immediate cash-in crediting `to`.
    pub fn cash_in(reference: &str, to: &str, amount: i64) -> Self {
        Self::fixture(reference, Flow::CashIn, None, Some(to), amount)
    }

    /// Immediate cash-out debiting `from`.
    pub fn cash_out(reference: &str, from: &str, amount: i64) -> Self {
        Self::fixture(reference, Flow::CashOut, Some(from), None, amount)
    }

    /// Turn this request into a hold.
    #[must_use]
    pub fn reserve(mut self) -> Self {
        self.stage = Stage::Reserve;
        self
    }
}
