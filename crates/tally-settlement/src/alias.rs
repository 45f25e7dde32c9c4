//! Legacy account-number resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use tally_types::{AccountNumber, Result};

/// Maps a possibly-legacy account identifier to its canonical number.
#[async_trait]
pub trait AliasResolver: Send + Sync {
    /// The canonical number for `account`, or `account` itself when it has
    /// no alias.
    async fn resolve(&self, account: &AccountNumber) -> Result<AccountNumber>;
}

/// Static legacy → canonical table. Resolution is a single hop.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<AccountNumber, AccountNumber>,
}

impl AliasTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, legacy: AccountNumber, canonical: AccountNumber) {
        self.aliases.insert(legacy, canonical);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

impl FromIterator<(AccountNumber, AccountNumber)> for AliasTable {
    fn from_iter<I: IntoIterator<Item = (AccountNumber, AccountNumber)>>(iter: I) -> Self {
        Self {
            aliases: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AliasResolver for AliasTable {
    async fn resolve(&self, account: &AccountNumber) -> Result<AccountNumber> {
        match self.aliases.get(account) {
            Some(canonical) => {
                tracing::debug!(legacy = %account, canonical = %canonical, "Alias resolved");
                Ok(canonical.clone())
            }
            None => Ok(account.clone()),
        }
    }
}
