//! Arena of per-module slots.

use super::ModuleSlot;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared store of [`ModuleSlot`]s indexed by module id.
///
/// Every read-modify-write on a module runs inside that module's slot lock,
/// so concurrent stage executions across runs cannot lose updates. The map
/// shard lock is released before the slot lock is taken.
#[derive(Debug, Default)]
pub struct HealthArena {
    slots: DashMap<String, Arc<Mutex<ModuleSlot>>>,
}

impl HealthArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, module_id: &str) -> Arc<Mutex<ModuleSlot>> {
        if let Some(slot) = self.slots.get(module_id) {
            return Arc::clone(slot.value());
        }
        Arc::clone(
            self.slots
                .entry(module_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn existing(&self, module_id: &str) -> Option<Arc<Mutex<ModuleSlot>>> {
        self.slots.get(module_id).map(|slot| Arc::clone(slot.value()))
    }

    /// Runs `f` with exclusive access to the module's slot, creating it first
    /// if needed.
    pub fn update<R>(&self, module_id: &str, f: impl FnOnce(&mut ModuleSlot) -> R) -> R {
        let slot = self.slot(module_id);
        let mut guard = slot.lock();
        f(&mut guard)
    }

    /// Runs `f` with exclusive access to an existing slot.
    ///
    /// Returns `None` without creating anything when the module has never
    /// been seen.
    pub fn update_existing<R>(
        &self,
        module_id: &str,
        f: impl FnOnce(&mut ModuleSlot) -> R,
    ) -> Option<R> {
        let slot = self.existing(module_id)?;
        let mut guard = slot.lock();
        Some(f(&mut guard))
    }

    /// Returns a copy of the module's slot, if it exists.
    #[must_use]
    pub fn snapshot(&self, module_id: &str) -> Option<ModuleSlot> {
        self.existing(module_id).map(|slot| slot.lock().clone())
    }

    /// Returns the ids of every tracked module, sorted.
    #[must_use]
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Returns the number of tracked modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if no module is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_update_creates_slot() {
        let arena = HealthArena::new();
        assert!(arena.snapshot("m1").is_none());

        arena.update("m1", |slot| slot.record.apply(true, 10.0, 0.3, 10, Instant::now()));

        let snapshot = arena.snapshot("m1").unwrap();
        assert_eq!(snapshot.record.total_attempts, 1);
        assert_eq!(arena.module_ids(), vec!["m1".to_string()]);
    }

    #[test]
    fn test_update_existing_does_not_create() {
        let arena = HealthArena::new();
        let result = arena.update_existing("ghost", |_slot| 1);
        assert!(result.is_none());
        assert!(arena.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let arena = Arc::new(HealthArena::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let arena = arena.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    arena.update("shared", |slot| {
                        slot.record.apply(false, 1.0, 0.3, 10, Instant::now());
                    });
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = arena.snapshot("shared").unwrap();
        assert_eq!(snapshot.record.total_attempts, 2000);
        assert_eq!(snapshot.record.consecutive_failures, 2000);
    }
}
