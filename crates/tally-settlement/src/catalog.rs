//! Master-data allow-list for transaction types.
//!
//! Consulted by callers before they hand a request to the engine; the
//! engine itself never checks it.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tally_types::{EngineConfig, ReferenceKey, Result, TallyError};

#[async_trait]
pub trait FlowCatalog: Send + Sync {
    /// Whether `transaction_type` is an accepted movement type.
    async fn accepts(&self, transaction_type: &str) -> Result<bool>;

    /// Reject a reference whose transaction type is not accepted. Keys
    /// without a transaction type are not subject to master data.
    async fn check(&self, key: &ReferenceKey) -> Result<()> {
        let Some(kind) = &key.transaction_type else {
            return Ok(());
        };
        if self.accepts(kind).await? {
            Ok(())
        } else {
            Err(TallyError::TransactionTypeRejected(kind.clone()))
        }
    }
}

/// In-process catalog. An empty allow-list accepts every type.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    accepted: BTreeSet<String>,
}

impl StaticCatalog {
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            accepted: types.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.accepted_transaction_types.iter().cloned())
    }
}

#[async_trait]
impl FlowCatalog for StaticCatalog {
    async fn accepts(&self, transaction_type: &str) -> Result<bool> {
        Ok(self.accepted.is_empty() || self.accepted.contains(transaction_type))
    }
}
