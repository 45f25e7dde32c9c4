//! Output of a calculator run.

use std::collections::BTreeMap;

use tally_types::{AccountNumber, Balance, TouchedAccount};

/// New balance of every account touched by one or more movements, with the
/// balance each account had before the first of them.
///
/// Ephemeral: the orchestrator folds it into balance rows (or the deferred
/// channel) and drops it. Iteration order is account order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    entries: BTreeMap<AccountNumber, TouchedAccount>,
}

impl BalanceDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `after` for the account, keeping the earliest `before`.
    pub fn record(&mut self, before: &Balance, after: Balance) {
        self.entries
            .entry(before.account.clone())
            .and_modify(|touched| touched.balance_after = after.clone())
            .or_insert_with(|| TouchedAccount {
                account: before.account.clone(),
                balance_before: before.clone(),
                balance_after: after,
            });
    }

    /// Fold a later delta into this one. Used when several movements
    /// settle in one unit of work.
    pub fn absorb(&mut self, later: BalanceDelta) {
        for (_, touched) in later.entries {
            self.record(&touched.balance_before, touched.balance_after);
        }
    }

    /// New balance for `account`, if touched.
    #[must_use]
    pub fn after(&self, account: &AccountNumber) -> Option<&Balance> {
        self.entries.get(account).map(|t| &t.balance_after)
    }

    /// Balance of `account` before this delta, if touched.
    #[must_use]
    pub fn before(&self, account: &AccountNumber) -> Option<&Balance> {
        self.entries.get(account).map(|t| &t.balance_before)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TouchedAccount> {
        self.entries.values()
    }

    /// Overwrite `book` entries with the new balances.
    pub fn apply_to(&self, book: &mut BTreeMap<AccountNumber, Balance>) {
        for touched in self.entries.values() {
            book.insert(touched.account.clone(), touched.balance_after.clone());
        }
    }

    #[must_use]
    pub fn into_touched(self) -> Vec<TouchedAccount> {
        self.entries.into_values().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
