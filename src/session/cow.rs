//! Copy-on-write map shared between ingestion and sending tasks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

/// A map whose readers take cheap immutable snapshots and whose writers
/// publish a modified copy.
///
/// The lock is only held to swap or clone the inner `Arc`, never across an
/// `.await`, so a reader never observes a half-applied update.
#[derive(Debug)]
pub struct CowMap<K, V> {
    inner: Mutex<Arc<HashMap<K, V>>>,
}

impl<K, V> Default for CowMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Arc::new(HashMap::new())),
        }
    }
}

impl<K, V> CowMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Arc<HashMap<K, V>>> {
        // A panicking writer never leaves a torn map behind: the published
        // Arc is replaced only after the closure returns.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The current published map.
    pub fn snapshot(&self) -> Arc<HashMap<K, V>> {
        Arc::clone(&self.lock())
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Atomic read-modify-publish.
    ///
    /// `f` works on a private copy (cloned only if a snapshot is still
    /// alive), which is published when `f` returns.
    pub fn update<R>(&self, f: impl FnOnce(&mut HashMap<K, V>) -> R) -> R {
        let mut guard = self.lock();
        let mut next = Arc::clone(&guard);
        let result = f(Arc::make_mut(&mut next));
        *guard = next;
        result
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.update(|map| map.insert(key, value))
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.update(|map| map.remove(key))
    }

    /// Returns the value for `key`, inserting `make()` first if absent.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        self.update(|map| map.entry(key).or_insert_with(make).clone())
    }
}
