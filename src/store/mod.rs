pub mod codec;

use std::collections::HashMap;
use std::sync::RwLock;

/// A durable key-value store, synchronous from the caller's point of
/// view: a read issued after a write in the same process observes the
/// written value.
pub trait KvStore: Send + Sync {
    /// Gets a raw value by key.
    fn get(&self, key: &str) -> Option<String>;
    /// Sets a raw value.
    fn set(&self, key: &str, value: String);
    /// Removes a key.
    fn remove(&self, key: &str);
    /// Removes every key (signs out).
    fn reset(&self);
}

/// An in-memory `KvStore`.
///
/// Production hosts supply their own persistence-backed store; this one
/// backs tests and ephemeral contexts.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Creates a new empty `MemoryStore`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.read().expect("store lock poisoned").get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.inner
            .write()
            .expect("store lock poisoned")
            .insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.inner.write().expect("store lock poisoned").remove(key);
    }

    fn reset(&self) {
        self.inner.write().expect("store lock poisoned").clear();
    }
}
