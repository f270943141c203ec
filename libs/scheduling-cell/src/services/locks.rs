// libs/scheduling-cell/src/services/locks.rs
//
// Per-slot serialization. Every read-then-write sequence that touches one
// slot's occupancy runs under this lock, held across the whole operation
// including recalculation's batch of writes. Cross-slot operations proceed
// in parallel.

use std::collections::HashMap;
use std::sync::{Mutex as StdMutex, OnceLock};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub struct SlotLockRegistry {
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SlotLockRegistry {
    fn new() -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry. Services are constructed per request, so the
    /// locks must outlive any one service instance.
    pub fn global() -> &'static SlotLockRegistry {
        static REGISTRY: OnceLock<SlotLockRegistry> = OnceLock::new();
        REGISTRY.get_or_init(SlotLockRegistry::new)
    }

    /// The single mutex guarding `slot_id`. Callers hold the guard for the
    /// full operation and evaluate every guard against state read after
    /// acquisition.
    pub fn lock_for(&self, slot_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("slot lock registry poisoned");
        let lock = locks
            .entry(slot_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        debug!("Slot lock handle issued for {}", slot_id);
        lock
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_slot_yields_the_same_mutex() {
        let registry = SlotLockRegistry::new();
        let slot_id = Uuid::new_v4();

        let first = registry.lock_for(slot_id);
        let second = registry.lock_for(slot_id);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn different_slots_do_not_contend() {
        let registry = SlotLockRegistry::new();

        let first = registry.lock_for(Uuid::new_v4());
        let second = registry.lock_for(Uuid::new_v4());

        let _first_guard = first.lock().await;
        // Must not deadlock: the second slot has its own mutex.
        let _second_guard = second.lock().await;
    }

    #[tokio::test]
    async fn lock_serializes_critical_sections() {
        use std::sync::atomic::{AtomicI32, Ordering};

        let registry = Arc::new(SlotLockRegistry::new());
        let slot_id = Uuid::new_v4();
        let in_section = Arc::new(AtomicI32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let in_section = Arc::clone(&in_section);
            tasks.push(tokio::spawn(async move {
                let lock = registry.lock_for(slot_id);
                let _guard = lock.lock().await;
                assert_eq!(in_section.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                in_section.fetch_sub(1, Ordering::SeqCst);
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
    }
}
