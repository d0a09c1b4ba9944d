mod capacity;
mod conflict;
mod error;
mod history;
mod mutations;
mod queries;
mod validation;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use history::apply_update;
pub use validation::{canonical_date, canonical_time, validate_reservation, validate_table};

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use ulid::{Generator, Ulid};

use crate::store::DocumentStore;

/// Reservation engine: validation, capacity, conflict and history rules over
/// a document store, with per-request ownership checks.
pub struct Engine {
    store: Arc<dyn DocumentStore>,
    /// One writer lock per table number. Held across capacity check,
    /// conflict check and write so a slot cannot be double-booked.
    slot_locks: DashMap<u32, Arc<AsyncMutex<()>>>,
    /// Serializes table-number uniqueness checks with their writes.
    registry_gate: AsyncMutex<()>,
    /// Monotonic ids so creation order survives same-millisecond inserts.
    ids: Mutex<Generator>,
}

impl Engine {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            slot_locks: DashMap::new(),
            registry_gate: AsyncMutex::new(()),
            ids: Mutex::new(Generator::new()),
        }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub(super) fn next_id(&self) -> Ulid {
        self.ids
            .lock()
            .ok()
            .and_then(|mut generator| generator.generate().ok())
            .unwrap_or_else(Ulid::new)
    }

    /// Acquire slot locks for the given table numbers in ascending order.
    pub(super) async fn lock_tables(&self, numbers: &[u32]) -> SlotGuard<'_> {
        let mut numbers = numbers.to_vec();
        numbers.sort_unstable();
        numbers.dedup();

        let mut guards = Vec::with_capacity(numbers.len());
        for &n in &numbers {
            let lock = self.slot_locks.entry(n).or_default().clone();
            guards.push(lock.lock_owned().await);
        }
        SlotGuard {
            locks: &self.slot_locks,
            numbers,
            guards,
        }
    }
}

/// Held slot locks. On drop, an entry nobody else holds or waits on is
/// evicted, so the map only ever has entries for contended numbers.
pub(super) struct SlotGuard<'a> {
    locks: &'a DashMap<u32, Arc<AsyncMutex<()>>>,
    numbers: Vec<u32>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        for n in &self.numbers {
            // Clones are taken under the shard lock, so a count of one here
            // means no task holds or awaits this mutex.
            self.locks.remove_if(n, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

/// Parse a path id. Anything unparsable cannot name a record, so it is
/// reported exactly like a missing one.
pub(crate) fn parse_id(raw: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(raw).map_err(|_| EngineError::NotFoundOrForbidden(raw.to_string()))
}
