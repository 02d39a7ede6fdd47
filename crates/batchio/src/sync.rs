//! Thread-safe containers shared between tasks.
//!
//! Both types sit behind a reader/writer lock: readers for length and peeks,
//! writers for push/pop. Lock guards are never held across an `.await`.
//!
//! Out-of-range index access panics, same as slice indexing.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use indexmap::IndexMap;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    // A panicking writer cannot leave the inner collections half-updated.
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Growable FIFO sequence safe for concurrent use.
#[derive(Debug)]
pub struct SyncList<T> {
    items: RwLock<VecDeque<T>>,
}

impl<T> SyncList<T> {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(VecDeque::new()),
        }
    }

    pub fn append(&self, item: T) {
        write(&self.items).push_back(item);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&self, items: I) {
        write(&self.items).extend(items);
    }

    pub fn pop_front(&self) -> Option<T> {
        write(&self.items).pop_front()
    }

    /// Remove and return the item at `index`.
    ///
    /// # Panics
    /// If `index >= len()`.
    pub fn remove_at(&self, index: usize) -> T {
        let mut items = write(&self.items);
        let len = items.len();
        match items.remove(index) {
            Some(item) => item,
            None => panic!("SyncList::remove_at: index {index} out of range for length {len}"),
        }
    }

    pub fn len(&self) -> usize {
        read(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.items).is_empty()
    }
}

impl<T: Clone> SyncList<T> {
    /// Clone of the item at `index`.
    ///
    /// # Panics
    /// If `index >= len()`.
    pub fn at(&self, index: usize) -> T {
        let items = read(&self.items);
        match items.get(index) {
            Some(item) => item.clone(),
            None => panic!(
                "SyncList::at: index {index} out of range for length {}",
                items.len()
            ),
        }
    }

    /// Clone of the items in `start..end`.
    ///
    /// # Panics
    /// If `start > end` or `end > len()`.
    pub fn slice(&self, start: usize, end: usize) -> Vec<T> {
        let items = read(&self.items);
        assert!(
            start <= end && end <= items.len(),
            "SyncList::slice: range {start}..{end} out of range for length {}",
            items.len()
        );
        items.range(start..end).cloned().collect()
    }
}

impl<T> Default for SyncList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Insertion-ordered map safe for concurrent use, addressable by key or position.
#[derive(Debug)]
pub struct SyncIndexMap<K, V> {
    entries: RwLock<IndexMap<K, V>>,
}

impl<K, V> SyncIndexMap<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    /// Insert or replace. Replacing keeps the key's original position.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        write(&self.entries).insert(key, value)
    }

    /// Remove `key`, shifting later entries down by one position.
    pub fn remove(&self, key: &K) -> Option<V> {
        write(&self.entries).shift_remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        read(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }
}

impl<K, V> SyncIndexMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn get(&self, key: &K) -> Option<V> {
        read(&self.entries).get(key).cloned()
    }

    pub fn keys(&self) -> Vec<K> {
        read(&self.entries).keys().cloned().collect()
    }

    /// Key and value at insertion position `index`.
    ///
    /// # Panics
    /// If `index >= len()`.
    pub fn at(&self, index: usize) -> (K, V) {
        let entries = read(&self.entries);
        match entries.get_index(index) {
            Some((key, value)) => (key.clone(), value.clone()),
            None => panic!(
                "SyncIndexMap::at: index {index} out of range for length {}",
                entries.len()
            ),
        }
    }
}

impl<K, V> Default for SyncIndexMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
