//! Storage collaborator.
//!
//! The engine never owns balance rows. It borrows them through a
//! [`UnitOfWork`]: a transactional boundary in which balances are read with
//! a write lock, new balances and movement records are staged, and
//! everything becomes visible at once on [`UnitOfWork::commit`].
//!
//! A unit of work that is dropped without `commit` MUST behave as a
//! rollback. The orchestrator relies on this when its database deadline
//! fires mid-flight.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use async_trait::async_trait;
use tally_types::{AccountNumber, Balance, Movement, MovementId, ReferenceKey, Result};

/// Entry point to a ledger store.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Committed movement recorded under `key`, if any.
    async fn find_by_reference(&self, key: &ReferenceKey) -> Result<Option<Movement>>;

    /// The subset of `keys` that already have a committed movement.
    async fn existing_references(&self, keys: &[ReferenceKey]) -> Result<HashSet<ReferenceKey>>;

    /// Committed movement by ID, if any.
    async fn movement(&self, id: MovementId) -> Result<Option<Movement>>;
}

/// One all-or-nothing consistency unit.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read the balances of `accounts`, holding a write lock on each until
    /// the unit of work ends. Locks are taken in account order.
    ///
    /// Accounts with no balance row are absent from the result.
    async fn lock_balances(
        &mut self,
        accounts: &BTreeSet<AccountNumber>,
    ) -> Result<BTreeMap<AccountNumber, Balance>>;

    /// Read a movement, holding a write lock on it until the unit of work
    /// ends.
    ///
    /// # Errors
    /// `MovementNotFound` when no such movement is committed.
    async fn lock_movement(&mut self, id: MovementId) -> Result<Movement>;

    /// Stage a balance write.
    async fn write_balance(&mut self, balance: &Balance) -> Result<()>;

    /// Stage a new movement record.
    ///
    /// # Errors
    /// `ReferenceConflict` when the reference is already recorded.
    async fn insert_movement(&mut self, movement: &Movement) -> Result<()>;

    /// Stage a status / metadata update of a locked movement.
    async fn update_movement(&mut self, movement: &Movement) -> Result<()>;

    /// Make every staged write visible and release all locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every staged write and release all locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
