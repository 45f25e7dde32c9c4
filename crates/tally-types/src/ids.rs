//! Identifiers used throughout Tally.
//!
//! Movement IDs use UUIDv7 for time-ordered sorting. Movements created
//! from an external reference can instead derive a deterministic ID from
//! their [`ReferenceKey`], so every process racing on the same reference
//! computes the same ID.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// AccountNumber
// ---------------------------------------------------------------------------

/// Canonical account number. Legacy aliases are resolved to this form
/// before any balance row is locked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(pub String);

impl AccountNumber {
    #[must_use]
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountNumber {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// ReferenceKey
// ---------------------------------------------------------------------------

/// External idempotency key: the caller's reference number, optionally
/// scoped by transaction type. Unique among non-duplicate movements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub ref_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_type: Option<String>,
}

impl ReferenceKey {
    #[must_use]
    pub fn new(ref_number: impl Into<String>) -> Self {
        Self {
            ref_number: ref_number.into(),
            transaction_type: None,
        }
    }

    #[must_use]
    pub fn with_type(ref_number: impl Into<String>, transaction_type: impl Into<String>) -> Self {
        Self {
            ref_number: ref_number.into(),
            transaction_type: Some(transaction_type.into()),
        }
    }
}

impl fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.transaction_type {
            Some(kind) => write!(f, "{}#{kind}", self.ref_number),
            None => f.write_str(&self.ref_number),
        }
    }
}

// ---------------------------------------------------------------------------
// MovementId
// ---------------------------------------------------------------------------

/// Globally unique movement identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MovementId(pub Uuid);

impl MovementId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Deterministic `MovementId` from the idempotency key.
    ///
    /// `SHA-256("tally:movement_id:v1:" || ref_number || 0x1f || transaction_type)`,
    /// truncated to 16 bytes.
    #[must_use]
    pub fn deterministic(key: &ReferenceKey) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(b"tally:movement_id:v1:");
        hasher.update(key.ref_number.as_bytes());
        hasher.update([0x1f]);
        if let Some(kind) = &key.transaction_type {
            hasher.update(kind.as_bytes());
        }
        let hash = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&hash[..16]);
        Self(Uuid::from_bytes(bytes))
    }
}

impl Default for MovementId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_id_uniqueness() {
        assert_ne!(MovementId::new(), MovementId::new());
    }

    #[test]
    fn movement_id_deterministic() {
        let a = MovementId::deterministic(&ReferenceKey::new("REF-1"));
        let b = MovementId::deterministic(&ReferenceKey::new("REF-1"));
        assert_eq!(a, b);
        let c = MovementId::deterministic(&ReferenceKey::with_type("REF-1", "TOPUP"));
        assert_ne!(a, c);
    }

    #[test]
    fn type_scoping_is_unambiguous() {
        // "AB" + "C" must not collide with "A" + "BC".
        let a = MovementId::deterministic(&ReferenceKey::with_type("AB", "C"));
        let b = MovementId::deterministic(&ReferenceKey::with_type("A", "BC"));
        assert_ne!(a, b);
    }

    #[test]
    fn reference_key_display() {
        assert_eq!(ReferenceKey::new("R1").to_string(), "R1");
        assert_eq!(ReferenceKey::with_type("R1", "P2P").to_string(), "R1#P2P");
    }

    #[test]
    fn blank_account_number() {
        assert!(AccountNumber::new("  ").is_blank());
        assert!(!AccountNumber::new("ACC-1").is_blank());
    }
}
