//! Bounded engine cache
//!
//! Constructed networks hold device memory (on the bridge, server-side GPU
//! memory), so only the most recently used ones are kept.

use std::collections::HashMap;
use std::hash::Hash;

/// Default number of networks kept per dispatcher
pub const DEFAULT_ENGINE_CACHE_CAPACITY: usize = 4;

/// Least-recently-used map with a fixed capacity (at least 1)
#[derive(Debug)]
pub(crate) struct LruCache<K, V> {
    capacity: usize,
    clock: u64,
    entries: HashMap<K, (V, u64)>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Look up `key` and mark it as most recently used
    pub fn get(&mut self, key: &K) -> Option<V> {
        self.clock += 1;
        let now = self.clock;
        self.entries.get_mut(key).map(|(value, used)| {
            *used = now;
            value.clone()
        })
    }

    /// Return the value already cached under `key`, or insert `value`,
    /// evicting the least recently used entries to stay within capacity.
    ///
    /// The second element is the number of evicted entries.
    pub fn get_or_insert(&mut self, key: K, value: V) -> (V, usize) {
        if let Some(existing) = self.get(&key) {
            return (existing, 0);
        }

        let mut evicted = 0;
        while self.entries.len() >= self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    self.entries.remove(&k);
                    evicted += 1;
                }
                None => break,
            }
        }

        self.clock += 1;
        self.entries.insert(key, (value.clone(), self.clock));
        (value, evicted)
    }
}
