//! In-process reference [`Store`].
//!
//! Row locks are per-key `tokio` mutexes held as owned guards by the unit
//! of work, so two units of work touching the same account serialize on
//! the lock and a dropped unit of work releases everything. Committed data
//! lives in one table set behind a synchronous `RwLock`; a commit applies
//! all staged writes under a single write guard, so readers observe either
//! none or all of a unit of work.
//!
//! Deferred-flagged balances are read as snapshots without taking the row
//! lock.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    hash::Hash,
    sync::{Arc, Mutex as StdMutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use tally_types::{
    AccountNumber, Balance, Movement, MovementId, ReferenceKey, Result, TallyError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{Store, UnitOfWork};

/// Storage operation at which [`MemoryStore::fail_next`] injects a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    LockBalances,
    LockMovement,
    WriteBalance,
    InsertMovement,
    UpdateMovement,
    Commit,
}

impl fmt::Display for FailPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LockBalances => "lock_balances",
            Self::LockMovement => "lock_movement",
            Self::WriteBalance => "write_balance",
            Self::InsertMovement => "insert_movement",
            Self::UpdateMovement => "update_movement",
            Self::Commit => "commit",
        };
        f.write_str(name)
    }
}

#[derive(Default)]
struct Tables {
    balances: BTreeMap<AccountNumber, Balance>,
    movements: HashMap<MovementId, Movement>,
    references: HashMap<ReferenceKey, MovementId>,
    /// Committed balance writes per account.
    writes: HashMap<AccountNumber, u64>,
}

/// Lazily created lock tokens, one per key.
struct LockTable<K> {
    tokens: StdMutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            tokens: StdMutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> LockTable<K> {
    async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let token = {
            let mut tokens = self.tokens.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(tokens.entry(key.clone()).or_default())
        };
        token.lock_owned().await
    }
}

#[derive(Default)]
struct Inner {
    tables: RwLock<Tables>,
    balance_locks: LockTable<AccountNumber>,
    movement_locks: LockTable<MovementId>,
    fail_next: StdMutex<Option<FailPoint>>,
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume an injected failure armed for `point`.
    fn trip(&self, point: FailPoint) -> Result<()> {
        let mut armed = self.fail_next.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(TallyError::Storage(format!("injected failure at {point}")));
        }
        Ok(())
    }
}

/// In-memory ledger store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace an account's balance row.
    pub fn open_account(&self, balance: Balance) {
        tracing::debug!(
            account = %balance.account,
            actual = %balance.actual,
            deferred = balance.policy.is_deferred,
            "Account opened"
        );
        self.inner
            .write()
            .balances
            .insert(balance.account.clone(), balance);
    }

    /// Committed balance of `account`.
    #[must_use]
    pub fn balance(&self, account: &AccountNumber) -> Option<Balance> {
        self.inner.read().balances.get(account).cloned()
    }

    /// Every committed balance, in account order.
    #[must_use]
    pub fn balances(&self) -> Vec<Balance> {
        self.inner.read().balances.values().cloned().collect()
    }

    #[must_use]
    pub fn movement_count(&self) -> usize {
        self.inner.read().movements.len()
    }

    /// Number of committed balance writes to `account`.
    #[must_use]
    pub fn balance_writes(&self, account: &AccountNumber) -> u64 {
        self.inner.read().writes.get(account).copied().unwrap_or(0)
    }

    /// Fail the next storage call made at `point`.
    pub fn fail_next(&self, point: FailPoint) {
        *self
            .inner
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(point);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork::new(Arc::clone(&self.inner))))
    }

    async fn find_by_reference(&self, key: &ReferenceKey) -> Result<Option<Movement>> {
        let tables = self.inner.read();
        Ok(tables
            .references
            .get(key)
            .and_then(|id| tables.movements.get(id))
            .cloned())
    }

    async fn existing_references(&self, keys: &[ReferenceKey]) -> Result<HashSet<ReferenceKey>> {
        let tables = self.inner.read();
        Ok(keys
            .iter()
            .filter(|key| tables.references.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn movement(&self, id: MovementId) -> Result<Option<Movement>> {
        Ok(self.inner.read().movements.get(&id).cloned())
    }
}

struct MemoryUnitOfWork {
    store: Arc<Inner>,
    balance_guards: BTreeMap<AccountNumber, OwnedMutexGuard<()>>,
    movement_guards: HashMap<MovementId, OwnedMutexGuard<()>>,
    staged_balances: BTreeMap<AccountNumber, Balance>,
    staged_inserts: Vec<Movement>,
    staged_updates: BTreeMap<MovementId, Movement>,
}

impl MemoryUnitOfWork {
    fn new(store: Arc<Inner>) -> Self {
        Self {
            store,
            balance_guards: BTreeMap::new(),
            movement_guards: HashMap::new(),
            staged_balances: BTreeMap::new(),
            staged_inserts: Vec::new(),
            staged_updates: BTreeMap::new(),
        }
    }

    fn check_inserts(&self, tables: &Tables) -> Result<()> {
        match self.staged_inserts.iter().find(|m| {
            tables.references.contains_key(&m.reference) || tables.movements.contains_key(&m.id)
        }) {
            Some(conflict) => Err(TallyError::ReferenceConflict(conflict.reference.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_balances(
        &mut self,
        accounts: &BTreeSet<AccountNumber>,
    ) -> Result<BTreeMap<AccountNumber, Balance>> {
        self.store.trip(FailPoint::LockBalances)?;
        let mut locked = BTreeMap::new();
        for account in accounts {
            if let Some(staged) = self.staged_balances.get(account) {
                locked.insert(account.clone(), staged.clone());
                continue;
            }
            let deferred = match self.store.read().balances.get(account) {
                Some(balance) => balance.policy.is_deferred,
                None => continue,
            };
            if !deferred && !self.balance_guards.contains_key(account) {
                let guard = self.store.balance_locks.acquire(account).await;
                self.balance_guards.insert(account.clone(), guard);
            }
            if let Some(balance) = self.store.read().balances.get(account) {
                locked.insert(account.clone(), balance.clone());
            }
        }
        Ok(locked)
    }

    async fn lock_movement(&mut self, id: MovementId) -> Result<Movement> {
        self.store.trip(FailPoint::LockMovement)?;
        if !self.store.read().movements.contains_key(&id) {
            return Err(TallyError::MovementNotFound(id));
        }
        if !self.movement_guards.contains_key(&id) {
            let guard = self.store.movement_locks.acquire(&id).await;
            self.movement_guards.insert(id, guard);
        }
        if let Some(staged) = self.staged_updates.get(&id) {
            return Ok(staged.clone());
        }
        self.store
            .read()
            .movements
            .get(&id)
            .cloned()
            .ok_or(TallyError::MovementNotFound(id))
    }

    async fn write_balance(&mut self, balance: &Balance) -> Result<()> {
        self.store.trip(FailPoint::WriteBalance)?;
        if !self.store.read().balances.contains_key(&balance.account) {
            return Err(TallyError::AccountNotFound(balance.account.clone()));
        }
        self.staged_balances
            .insert(balance.account.clone(), balance.clone());
        Ok(())
    }

    async fn insert_movement(&mut self, movement: &Movement) -> Result<()> {
        self.store.trip(FailPoint::InsertMovement)?;
        let staged_twice = self
            .staged_inserts
            .iter()
            .any(|m| m.reference == movement.reference || m.id == movement.id);
        let recorded = {
            let tables = self.store.read();
            tables.references.contains_key(&movement.reference)
                || tables.movements.contains_key(&movement.id)
        };
        if staged_twice || recorded {
            return Err(TallyError::ReferenceConflict(movement.reference.clone()));
        }
        self.staged_inserts.push(movement.clone());
        Ok(())
    }

    async fn update_movement(&mut self, movement: &Movement) -> Result<()> {
        self.store.trip(FailPoint::UpdateMovement)?;
        if !self.movement_guards.contains_key(&movement.id) {
            return Err(TallyError::Storage(format!(
                "movement {} updated without a lock",
                movement.id
            )));
        }
        self.staged_updates.insert(movement.id, movement.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.store.trip(FailPoint::Commit)?;

        // Deferred rows were read unlocked; lock them for the write itself.
        let unlocked: Vec<AccountNumber> = self
            .staged_balances
            .keys()
            .filter(|account| !self.balance_guards.contains_key(*account))
            .cloned()
            .collect();
        for account in unlocked {
            let guard = self.store.balance_locks.acquire(&account).await;
            self.balance_guards.insert(account, guard);
        }

        let store = Arc::clone(&self.store);
        let mut tables = store.write();
        self.check_inserts(&tables)?;
        if let Some(missing) = self
            .staged_balances
            .keys()
            .find(|account| !tables.balances.contains_key(*account))
        {
            return Err(TallyError::AccountNotFound(missing.clone()));
        }

        let staged_balances = std::mem::take(&mut self.staged_balances);
        for (account, balance) in staged_balances {
            *tables.writes.entry(account.clone()).or_insert(0) += 1;
            tables.balances.insert(account, balance);
        }
        for movement in std::mem::take(&mut self.staged_inserts) {
            tables
                .references
                .insert(movement.reference.clone(), movement.id);
            tables.movements.insert(movement.id, movement);
        }
        for (id, movement) in std::mem::take(&mut self.staged_updates) {
            tables.movements.insert(id, movement);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
