//! Settlement idempotency guard: prevents double-settlement.
//!
//! Each reference key settles once. A repeat submission is not an error: the
//! guard hands back the movement already recorded under that key so the
//! caller can short-circuit with the original result.
//!
//! The guard keeps a bounded cache of recently settled references in front
//! of the store's duplicate check so memory usage stays predictable in
//! long-running processes. The store stays the source of truth; a cache
//! miss always falls through to it.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

use tally_types::{Movement, MovementId, ReferenceKey, Result, SettlementRequest};

use crate::store::Store;

/// Bounded map of settled references with insertion-order eviction.
struct RecentReferences {
    /// Reference → movement it produced.
    settled: HashMap<ReferenceKey, MovementId>,
    /// Insertion order for eviction (front = oldest).
    order: VecDeque<ReferenceKey>,
    /// Maximum number of entries before eviction kicks in.
    max_size: usize,
}

impl RecentReferences {
    fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            settled: HashMap::with_capacity(max_size.min(1024)),
            order: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    fn get(&self, key: &ReferenceKey) -> Option<MovementId> {
        self.settled.get(key).copied()
    }

    fn insert(&mut self, key: ReferenceKey, id: MovementId) {
        if self.settled.contains_key(&key) {
            return;
        }
        if self.settled.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.settled.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.settled.insert(key, id);
    }
}

/// Outcome of checking a batch for duplicates.
#[derive(Debug, Default)]
pub struct BatchPartition {
    /// Requests that have never been settled, in submission order.
    pub fresh: Vec<SettlementRequest>,
    /// References dropped from the batch, in submission order.
    pub duplicates: Vec<ReferenceKey>,
}

/// Duplicate-reference detector, consulted before any lock is taken.
pub struct IdempotencyGuard {
    store: Arc<dyn Store>,
    recent: Mutex<RecentReferences>,
}

impl IdempotencyGuard {
    /// Create a guard over `store` remembering up to `max_size` references.
    pub fn new(store: Arc<dyn Store>, max_size: usize) -> Self {
        Self {
            store,
            recent: Mutex::new(RecentReferences::new(max_size)),
        }
    }

    /// The movement already settled under `key`, if any.
    pub async fn existing(&self, key: &ReferenceKey) -> Result<Option<Movement>> {
        let cached = self.recent().get(key);
        if let Some(id) = cached {
            if let Some(movement) = self.store.movement(id).await? {
                return Ok(Some(movement));
            }
        }
        let found = self.store.find_by_reference(key).await?;
        if let Some(movement) = &found {
            self.remember(key.clone(), movement.id);
        }
        Ok(found)
    }

    /// Whether `key` has already been settled.
    pub async fn is_duplicate(&self, key: &ReferenceKey) -> Result<bool> {
        Ok(self.existing(key).await?.is_some())
    }

    /// Split a batch into never-settled requests and duplicates.
    ///
    /// A reference repeated inside the batch keeps its first occurrence.
    /// Remaining references are checked against the store in one lookup.
    pub async fn partition(&self, requests: Vec<SettlementRequest>) -> Result<BatchPartition> {
        let mut partition = BatchPartition::default();
        let mut seen = HashSet::with_capacity(requests.len());
        let mut candidates = Vec::with_capacity(requests.len());

        for request in requests {
            let cached = self.recent().get(&request.reference).is_some();
            if cached || !seen.insert(request.reference.clone()) {
                tracing::warn!(
                    reference = %request.reference,
                    "Duplicate reference dropped from batch"
                );
                partition.duplicates.push(request.reference);
            } else {
                candidates.push(request);
            }
        }

        let keys: Vec<ReferenceKey> = candidates.iter().map(|r| r.reference.clone()).collect();
        let existing = self.store.existing_references(&keys).await?;
        for request in candidates {
            if existing.contains(&request.reference) {
                tracing::warn!(
                    reference = %request.reference,
                    "Reference already settled, dropped from batch"
                );
                partition.duplicates.push(request.reference);
            } else {
                partition.fresh.push(request);
            }
        }
        Ok(partition)
    }

    /// Record a committed settlement.
    pub fn remember(&self, key: ReferenceKey, id: MovementId) {
        self.recent().insert(key, id);
    }

    /// Number of references currently cached.
    pub fn len(&self) -> usize {
        self.recent().settled.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.recent().settled.is_empty()
    }

    fn recent(&self) -> std::sync::MutexGuard<'_, RecentReferences> {
        self.recent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
