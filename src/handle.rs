//! Generational, ref-counted handles to pooled objects.
//!
//! The teacher's `OwnedHandle<T>` held a raw pointer back to its owning
//! Device and panicked on drop if the caller hadn't explicitly released it
//! first — workable for a single-threaded prototype, but it wires every
//! resource kind into a cyclic Device↔resource ownership graph. Here the
//! pool owns a `slotmap::SlotMap` keyed by a generational `DefaultKey`, and
//! a handle is just `(Arc<HandleInner>, SlotMapKey)`: dropping the last
//! `Arc` posts the key back to the pool through a `crossbeam_channel`
//! free-list instead of reaching for a `&Device`.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use slotmap::{new_key_type, SlotMap};

use crate::cookie::Cookie;

new_key_type! {
    /// Generational key into a [`Pool`]. Reusing a slot bumps the generation,
    /// so a stale key from a freed slot never aliases a live object.
    pub struct PoolKey;
}

struct HandleInner {
    key: PoolKey,
    cookie: Cookie,
    free_list: Sender<PoolKey>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        // The pool may already be gone (Device torn down); a closed channel
        // just means the slot leaks along with the rest of the pool.
        let _ = self.free_list.send(self.key);
    }
}

/// An atomically ref-counted, owning reference to a pooled object of type
/// `T`. When the last clone drops, the slot is returned to its pool.
#[derive(Clone)]
pub struct Handle<T> {
    inner: Arc<HandleInner>,
    _marker: std::marker::PhantomData<T>,
}

impl<T> Handle<T> {
    pub fn key(&self) -> PoolKey {
        self.inner.key
    }

    pub fn cookie(&self) -> Cookie {
        self.inner.cookie
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("key", &self.inner.key)
            .field("cookie", &self.inner.cookie)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
    }
}
impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.key.hash(state);
    }
}

/// A thread-safe object pool keyed by generational [`PoolKey`]s. Objects are
/// never actually removed from the backing `SlotMap` by a handle drop;
/// instead the key is pushed onto `free_list` and reclaimed the next time
/// `Pool::drain_free_list` runs (at frame boundaries, under the Device
/// lock), matching the deferred-destruction discipline of §4.2.
pub struct Pool<T> {
    slots: SlotMap<PoolKey, T>,
    free_sender: Sender<PoolKey>,
    free_receiver: Receiver<PoolKey>,
    cookies: crate::cookie::CookieAllocator,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Pool<T> {
    pub fn new() -> Self {
        let (free_sender, free_receiver) = crossbeam_channel::unbounded();
        Pool {
            slots: SlotMap::with_key(),
            free_sender,
            free_receiver,
            cookies: crate::cookie::CookieAllocator::new(),
        }
    }

    /// Inserts `value` and returns a fresh handle. The handle's free-list
    /// sender is cloned from this pool's channel, so handles may outlive
    /// any particular borrow of the pool.
    pub fn insert(&mut self, value: T) -> Handle<T> {
        let key = self.slots.insert(value);
        let cookie = self.cookies.next();
        Handle {
            inner: Arc::new(HandleInner {
                key,
                cookie,
                free_list: self.free_sender.clone(),
            }),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn get(&self, handle: &Handle<T>) -> Option<&T> {
        self.slots.get(handle.inner.key)
    }

    pub fn get_mut(&mut self, handle: &Handle<T>) -> Option<&mut T> {
        self.slots.get_mut(handle.inner.key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drains every key posted by dropped handles since the last call and
    /// removes the corresponding slots, returning the freed values so the
    /// caller can run any teardown (e.g. queue a `VkImage` for
    /// `vkDestroyImage`) before they're dropped for real.
    pub fn drain_free_list(&mut self) -> Vec<T> {
        let mut freed = Vec::new();
        while let Ok(key) = self.free_receiver.try_recv() {
            if let Some(value) = self.slots.remove(key) {
                freed.push(value);
            }
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_drop_returns_slot_to_free_list() {
        let mut pool: Pool<u32> = Pool::new();
        let h = pool.insert(42);
        assert_eq!(pool.get(&h).copied(), Some(42));
        assert_eq!(pool.len(), 1);

        drop(h);
        let freed = pool.drain_free_list();
        assert_eq!(freed, vec![42]);
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn clones_share_one_slot_until_last_drop() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.insert(7);
        let b = a.clone();
        assert_eq!(a.strong_count(), 2);

        drop(a);
        assert!(pool.drain_free_list().is_empty());
        assert_eq!(pool.len(), 1);

        drop(b);
        assert_eq!(pool.drain_free_list(), vec![7]);
    }

    #[test]
    fn cookies_are_unique_per_insert() {
        let mut pool: Pool<u32> = Pool::new();
        let a = pool.insert(1);
        let b = pool.insert(2);
        assert_ne!(a.cookie(), b.cookie());
    }
}
