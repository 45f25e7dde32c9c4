//! Error types for the Tally settlement core.
//!
//! All errors use the `TL_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (rejected before any lock is taken)
//! - 2xx: Balance errors
//! - 3xx: Lifecycle / state-machine errors
//! - 4xx: Storage errors (unit of work aborted)
//! - 5xx: Post-commit delivery errors (ledger already mutated)
//! - 9xx: General / internal errors

use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountNumber, Flow, MovementId, MovementStatus, ReferenceKey, Stage, Undelivered};

/// Coarse error taxonomy. Lets callers tell "nothing happened" from
/// "the ledger moved, retry delivery".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    InsufficientFunds,
    NotReserved,
    CorruptState,
    Storage,
    PostCommit,
    Internal,
}

/// Central error enum for all Tally operations.
#[derive(Debug, Error)]
pub enum TallyError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// Amount is zero, negative, or otherwise malformed.
    #[error("TL_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The flow string is not one of the known flows.
    #[error("TL_ERR_101: Unsupported flow: {0}")]
    UnsupportedFlow(String),

    /// The flow has no calculator for the requested stage.
    #[error("TL_ERR_102: Flow {flow} does not support stage {stage}")]
    UnsupportedStage { flow: Flow, stage: Stage },

    /// A required account (from / to) is missing or blank.
    #[error("TL_ERR_103: Missing {role} account")]
    MissingAccount { role: String },

    /// The request failed structural validation.
    #[error("TL_ERR_104: Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The transaction type is not in the accepted master-data set.
    #[error("TL_ERR_105: Transaction type not accepted: {0}")]
    TransactionTypeRejected(String),

    // =================================================================
    // Balance Errors (2xx)
    // =================================================================
    /// The debit would push `available` below the account's floor.
    #[error(
        "TL_ERR_200: Insufficient funds on {account}: need {needed}, available {available}"
    )]
    InsufficientFunds {
        account: AccountNumber,
        needed: Decimal,
        available: Decimal,
    },

    /// Releasing or consuming a hold larger than the pending balance.
    #[error("TL_ERR_201: Pending underflow on {account}: pending {pending}, release {amount}")]
    PendingUnderflow {
        account: AccountNumber,
        pending: Decimal,
        amount: Decimal,
    },

    /// No balance row exists for the account.
    #[error("TL_ERR_202: Account not found: {0}")]
    AccountNotFound(AccountNumber),

    // =================================================================
    // Lifecycle Errors (3xx)
    // =================================================================
    /// No movement with this ID.
    #[error("TL_ERR_300: Movement not found: {0}")]
    MovementNotFound(MovementId),

    /// Commit / cancel attempted on a movement that is not Pending.
    #[error("TL_ERR_301: Movement {movement} is {status}, not reserved")]
    NotReserved {
        movement: MovementId,
        status: MovementStatus,
    },

    /// The stored movement record itself is invalid.
    #[error("TL_ERR_302: Corrupt movement {movement}: {reason}")]
    CorruptState { movement: MovementId, reason: String },

    /// A status change outside the Pending → Success | Cancel graph.
    #[error("TL_ERR_303: Invalid transition {from} -> {to}")]
    InvalidTransition {
        from: MovementStatus,
        to: MovementStatus,
    },

    // =================================================================
    // Storage Errors (4xx)
    // =================================================================
    /// Lock acquisition, read, or write failed. Unit of work aborted.
    #[error("TL_ERR_400: Storage failure: {0}")]
    Storage(String),

    /// The unit of work did not finish within its deadline and was rolled back.
    #[error("TL_ERR_401: {operation} exceeded deadline of {timeout_ms}ms")]
    DeadlineExceeded {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// Unique-key conflict on insert: another settlement won the race.
    #[error("TL_ERR_402: Reference already recorded: {0}")]
    ReferenceConflict(ReferenceKey),

    // =================================================================
    // Post-commit Delivery Errors (5xx)
    // =================================================================
    /// The ledger committed but the notification could not be published.
    #[error("TL_ERR_500: Movement {movement} committed but notification failed: {reason}")]
    NotificationFailed { movement: MovementId, reason: String },

    /// The ledger committed but a deferred adjustment could not be published.
    #[error(
        "TL_ERR_501: Movement {movement} committed but deferred adjustment for {account} \
         failed: {reason}"
    )]
    DeferredPublishFailed {
        movement: MovementId,
        account: AccountNumber,
        reason: String,
    },

    /// A unit of work committed but some of its post-commit payloads were
    /// not delivered. Every undelivered payload is carried for redelivery.
    #[error(
        "TL_ERR_502: {} movement(s) committed, {} notification(s) and {} deferred \
         adjustment(s) undelivered: {reason}",
        .committed.len(),
        .undelivered.notifications.len(),
        .undelivered.adjustments.len()
    )]
    DeliveryIncomplete {
        /// Every movement the unit of work committed, in submission order.
        committed: Vec<MovementId>,
        undelivered: Box<Undelivered>,
        /// First failure reported by a collaborator.
        reason: String,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("TL_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("TL_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("TL_ERR_902: Configuration error: {0}")]
    Configuration(String),
}

impl TallyError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidAmount { .. }
            | Self::UnsupportedFlow(_)
            | Self::UnsupportedStage { .. }
            | Self::MissingAccount { .. }
            | Self::InvalidRequest { .. }
            | Self::TransactionTypeRejected(_)
            | Self::AccountNotFound(_)
            | Self::MovementNotFound(_) => ErrorClass::Validation,
            Self::InsufficientFunds { .. } => ErrorClass::InsufficientFunds,
            Self::NotReserved { .. } | Self::InvalidTransition { .. } => ErrorClass::NotReserved,
            Self::CorruptState { .. } | Self::PendingUnderflow { .. } => ErrorClass::CorruptState,
            Self::Storage(_) | Self::DeadlineExceeded { .. } | Self::ReferenceConflict(_) => {
                ErrorClass::Storage
            }
            Self::NotificationFailed { .. }
            | Self::DeferredPublishFailed { .. }
            | Self::DeliveryIncomplete { .. } => ErrorClass::PostCommit,
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorClass::Internal
            }
        }
    }

    /// `true` when the settlement is durable and only delivery must be retried.
    #[must_use]
    pub fn ledger_mutated(&self) -> bool {
        self.class() == ErrorClass::PostCommit
    }

    /// The committed movement behind a post-commit failure. For a
    /// multi-movement unit of work, the first one with an undelivered payload.
    #[must_use]
    pub fn movement_id(&self) -> Option<MovementId> {
        match self {
            Self::NotificationFailed { movement, .. }
            | Self::DeferredPublishFailed { movement, .. } => Some(*movement),
            Self::DeliveryIncomplete {
                committed,
                undelivered,
                ..
            } => undelivered
                .movements()
                .first()
                .or(committed.first())
                .copied(),
            _ => None,
        }
    }

    /// Payloads still owed to collaborators after a post-commit failure.
    #[must_use]
    pub fn undelivered(&self) -> Option<&Undelivered> {
        match self {
            Self::DeliveryIncomplete { undelivered, .. } => Some(undelivered),
            _ => None,
        }
    }

    /// Take ownership of the undelivered payloads, for redelivery.
    #[must_use]
    pub fn into_undelivered(self) -> Option<Undelivered> {
        match self {
            Self::DeliveryIncomplete { undelivered, .. } => Some(*undelivered),
            _ => None,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, TallyError>;

impl From<serde_json::Error> for TallyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
