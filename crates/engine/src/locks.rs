//! Per-key serialization of run operations.
//!
//! Run mutations are read-modify-write cycles over the whole persisted
//! record, so two writers racing on one key can lose an update. [`KeyLocks`]
//! hands out one mutex per run key; operations on distinct keys proceed in
//! parallel while operations on the same key queue up. Idle cells are swept
//! out as new ones are acquired, so the registry tracks live keys rather
//! than every key ever touched.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of per-key mutexes shared by everything that touches run state.
#[derive(Default)]
pub struct KeyLocks {
    cells: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    /// Creates an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<Mutex<()>> {
        let mut cells = self.cells.lock().expect("key lock registry poisoned");
        // A strong count of one means only the registry holds the cell, so
        // no caller can be inside its critical section.
        cells.retain(|_, cell| Arc::strong_count(cell) > 1);
        Arc::clone(cells.entry(key.to_string()).or_default())
    }

    /// Runs the closure while holding the key's mutex.
    ///
    /// Locks are not reentrant; nesting `with` calls for the same key on one
    /// thread will deadlock.
    pub fn with<T>(&self, key: &str, operation: impl FnOnce() -> T) -> T {
        let cell = self.cell(key);
        let _guard = cell.lock().expect("key lock poisoned");
        operation()
    }
}
