//! Keyed snapshot storage
//!
//! A `SnapshotStore<K, V>` holds the latest snapshot for each key. Writers
//! replace whole values; readers always get a clone of a fully-formed
//! snapshot, never a partially updated one.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

/// Latest-snapshot map shared between clones
///
/// The store is generic over both the key and the snapshot type. Cloning the
/// store is cheap and every clone observes the same entries.
///
/// # Example
///
/// ```rust
/// use state_store::SnapshotStore;
///
/// #[derive(Clone, PartialEq, Debug)]
/// struct Volume(u8);
///
/// let store = SnapshotStore::<u32, Volume>::new();
///
/// // First write reports a change
/// assert!(store.set(1, Volume(50)));
///
/// // Writing the same value again does not
/// assert!(!store.set(1, Volume(50)));
///
/// assert_eq!(store.get(&1), Some(Volume(50)));
/// ```
pub struct SnapshotStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    entries: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> SnapshotStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the latest snapshot for a key
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().ok()?;
        entries.get(key).cloned()
    }

    /// Replace the snapshot for a key
    ///
    /// Returns `true` if the stored value changed (or was newly inserted),
    /// `false` if an equal value was already present.
    pub fn set(&self, key: K, value: V) -> bool {
        let mut entries = match self.entries.write() {
            Ok(e) => e,
            Err(_) => return false,
        };

        if entries.get(&key) == Some(&value) {
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Remove the snapshot for a key, returning it if present
    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.write().ok()?.remove(key)
    }

    /// Check if a key has a snapshot
    pub fn contains(&self, key: &K) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(key))
            .unwrap_or(false)
    }

    /// All keys currently stored (unordered)
    pub fn keys(&self) -> Vec<K> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Clones of all stored snapshots (unordered)
    pub fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of keys in the store
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every snapshot
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

impl<K, V> Default for SnapshotStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for SnapshotStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K, V> std::fmt::Debug for SnapshotStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("len", &self.len())
            .finish()
    }
}
