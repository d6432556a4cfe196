//! Fixed-capacity least-recently-used cache.
//!
//! Slots live in an arena addressed by stable indices with explicit
//! `prev`/`next` links; head is the most recently used slot, tail the least.
//! The index and the recency list sit behind one lock and are only ever
//! mutated together.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use orderhub_core::OrderAggregate;

use super::traits::{CacheStats, OrderCache};

const NIL: usize = usize::MAX;

struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

struct Inner<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    head: usize,
    tail: usize,
}

impl<K: Hash + Eq, V> Inner<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: HashMap::with_capacity(capacity),
            head: NIL,
            tail: NIL,
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.slots[i].prev, self.slots[i].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[i].prev = NIL;
        self.slots[i].next = NIL;
    }

    fn push_front(&mut self, i: usize) {
        self.slots[i].prev = NIL;
        self.slots[i].next = self.head;
        if self.head == NIL {
            self.tail = i;
        } else {
            self.slots[self.head].prev = i;
        }
        self.head = i;
    }

    fn promote(&mut self, i: usize) {
        if self.head != i {
            self.unlink(i);
            self.push_front(i);
        }
    }

    /// Promote `key` if it is still present, returning its slot.
    fn promote_key<Q>(&mut self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let i = self.index.get(key).copied()?;
        self.promote(i);
        Some(i)
    }
}

/// Thread-safe LRU cache of owned values.
///
/// Both `set` and a hitting `get` count as a use. A miss takes only the
/// shared lock and leaves the recency order untouched.
pub struct RecencyCache<K, V> {
    capacity: usize,
    inner: RwLock<Inner<K, V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<K, V> RecencyCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// A capacity of 0 yields a cache that never holds anything.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(Inner::with_capacity(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or overwrite `key` and make it the most recently used entry,
    /// evicting the least recently used one when full.
    pub fn set(&self, key: K, value: V) -> bool {
        if self.capacity == 0 {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        let mut inner = self.write();
        if let Some(&i) = inner.index.get(&key) {
            inner.slots[i].value = value;
            inner.promote(i);
            return true;
        }

        if inner.slots.len() < self.capacity {
            let i = inner.slots.len();
            inner.slots.push(Slot {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            inner.index.insert(key, i);
            inner.push_front(i);
        } else {
            // Reuse the tail slot in place.
            let i = inner.tail;
            inner.unlink(i);
            let evicted = std::mem::replace(&mut inner.slots[i].key, key.clone());
            inner.index.remove(&evicted);
            inner.slots[i].value = value;
            inner.index.insert(key, i);
            inner.push_front(i);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Look up `key`; a hit promotes it to most recently used.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.read().index.contains_key(key) {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.promote_existing(key)
    }

    /// Exclusive half of `get`. The key is looked up again because it may
    /// have been evicted after the shared-lock check; a vanished key is a
    /// miss and leaves the recency order untouched.
    fn promote_existing<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.write();
        match inner.promote_key(key) {
            Some(i) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(inner.slots[i].value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Presence check that does not count as a use.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read().index.contains_key(key)
    }

    /// Keys from most to least recently used.
    pub fn keys_by_recency(&self) -> Vec<K> {
        let inner = self.read();
        let mut keys = Vec::with_capacity(inner.index.len());
        let mut cursor = inner.head;
        while cursor != NIL {
            keys.push(inner.slots[cursor].key.clone());
            cursor = inner.slots[cursor].next;
        }
        keys
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner<K, V>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner<K, V>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OrderCache for RecencyCache<String, OrderAggregate> {
    fn set(&self, order_uid: &str, order: OrderAggregate) -> bool {
        RecencyCache::set(self, order_uid.to_string(), order)
    }

    fn get(&self, order_uid: &str) -> Option<OrderAggregate> {
        RecencyCache::get(self, order_uid)
    }

    fn stats(&self) -> CacheStats {
        RecencyCache::stats(self)
    }
}

// ============================================================================
// TESTS
// ============================================================================
