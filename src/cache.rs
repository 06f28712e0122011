//! A generic two-list cache: a lock-free `read-only` list for the hot path
//! and a mutex-guarded `read-write` list for insertions, promoted into the
//! read-only list at frame boundaries.
//!
//! Used by the descriptor-set allocator cache, the pipeline cache, and the
//! render-pass/framebuffer caches (§4.4, §4.5): many threads look entries
//! up every frame, but only a few insert new ones.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// `K` must be cheap to hash/clone (typically a `u64` state hash). `V` is
/// wrapped in `Arc` so readers can hold a value across the promotion swap
/// without locking.
pub struct TwoListCache<K, V> {
    read_only: AtomicPtr<HashMap<K, Arc<V>>>,
    read_write: Mutex<HashMap<K, Arc<V>>>,
}

impl<K, V> Default for TwoListCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TwoListCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        TwoListCache {
            read_only: AtomicPtr::new(Box::into_raw(Box::new(HashMap::new()))),
            read_write: Mutex::new(HashMap::new()),
        }
    }

    /// Lock-free lookup against the read-only list only; does not see
    /// entries inserted since the last promotion.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let map = unsafe { &*self.read_only.load(Ordering::Acquire) };
        map.get(key).cloned()
    }

    /// Looks up the read-only list first, then falls back to the
    /// read-write list under lock (for entries inserted this frame but not
    /// yet promoted).
    pub fn get_or_pending(&self, key: &K) -> Option<Arc<V>> {
        if let Some(v) = self.get(key) {
            return Some(v);
        }
        self.read_write.lock().get(key).cloned()
    }

    /// Inserts into the read-write list under lock. Idempotent: a second
    /// insert for the same key is a no-op, matching `Program::add_pipeline`.
    pub fn insert(&self, key: K, value: V) -> Arc<V> {
        let mut guard = self.read_write.lock();
        guard
            .entry(key)
            .or_insert_with(|| Arc::new(value))
            .clone()
    }

    /// Merges the read-write list into a fresh read-only list and installs
    /// it atomically, then clears the read-write list. Called once per
    /// frame boundary.
    pub fn promote_read_write_to_read_only(&self) {
        let mut write_guard = self.read_write.lock();
        if write_guard.is_empty() {
            return;
        }

        let old_ptr = self.read_only.load(Ordering::Acquire);
        let mut merged = unsafe { (*old_ptr).clone() };
        for (k, v) in write_guard.drain() {
            merged.insert(k, v);
        }

        let new_ptr = Box::into_raw(Box::new(merged));
        self.read_only.store(new_ptr, Ordering::Release);

        // Safe to free: readers only ever dereference through a fresh load
        // of the atomic pointer, never hold the raw pointer across a call
        // that could race with promotion (promotion only happens on the
        // single frame-boundary thread).
        unsafe { drop(Box::from_raw(old_ptr)) };
    }

    pub fn len(&self) -> usize {
        let map = unsafe { &*self.read_only.load(Ordering::Acquire) };
        map.len() + self.read_write.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Drop for TwoListCache<K, V> {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.read_only.load(Ordering::Acquire))) };
    }
}

// SAFETY: `read_only` is only ever replaced wholesale via
// `promote_read_write_to_read_only`, which takes `&self` but serializes
// through `read_write`'s mutex; concurrent readers only load and
// dereference, never mutate through the pointer.
unsafe impl<K: Send, V: Send> Send for TwoListCache<K, V> {}
unsafe impl<K: Send + Sync, V: Send + Sync> Sync for TwoListCache<K, V> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_invisible_until_promoted() {
        let cache: TwoListCache<u64, &'static str> = TwoListCache::new();
        cache.insert(1, "a");
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.get_or_pending(&1).as_deref(), Some(&"a"));

        cache.promote_read_write_to_read_only();
        assert_eq!(cache.get(&1).as_deref(), Some(&"a"));
    }

    #[test]
    fn insert_is_idempotent() {
        let cache: TwoListCache<u64, u32> = TwoListCache::new();
        let a = cache.insert(1, 10);
        let b = cache.insert(1, 99);
        assert_eq!(*a, 10);
        assert_eq!(*b, 10);
    }

    #[test]
    fn promotion_preserves_earlier_entries() {
        let cache: TwoListCache<u64, u32> = TwoListCache::new();
        cache.insert(1, 10);
        cache.promote_read_write_to_read_only();
        cache.insert(2, 20);
        cache.promote_read_write_to_read_only();
        assert_eq!(cache.get(&1).map(|v| *v), Some(10));
        assert_eq!(cache.get(&2).map(|v| *v), Some(20));
    }
}
