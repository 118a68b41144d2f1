//! Sharded in-memory key-value storage.
//!
//! The key space is partitioned across a fixed number of independent
//! shards, each guarding its own map. Operations on different shards
//! never contend; operations on the same shard contend only on that
//! shard's lock. There is no TTL, no size cap and no eviction: entries
//! live until explicitly removed.

use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::RwLock;
use tracing::trace;

/// Concurrent key-value store partitioned across independent shards.
///
/// A given key always routes to the same shard for the lifetime of the
/// cache (the hasher state is fixed at construction), so no entry can
/// ever exist in more than one shard. Cross-run stability of the
/// key-to-shard mapping is not guaranteed and nothing may depend on it.
pub struct ShardedCache {
    shards: Vec<RwLock<HashMap<String, String>>>,
    hasher: RandomState,
}

impl ShardedCache {
    /// Create a cache with `num_shards` empty shards.
    ///
    /// Panics if `num_shards` is zero.
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards > 0, "shard count must be non-zero");
        let shards = (0..num_shards)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
        }
    }

    /// Shard index for a key. Deterministic within this process.
    fn shard_index(&self, key: &str) -> usize {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &str) -> &RwLock<HashMap<String, String>> {
        &self.shards[self.shard_index(key)]
    }

    /// Store a value under a key, replacing any previous value.
    pub fn put(&self, key: &str, value: &str) {
        self.shard(key)
            .write()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        trace!(key, "Entry stored");
    }

    /// Look up a key, returning a copy of the stored value.
    pub fn get(&self, key: &str) -> Option<String> {
        self.shard(key).read().unwrap().get(key).cloned()
    }

    /// Remove a key. Returns true if the key was present.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self.shard(key).write().unwrap().remove(key).is_some();
        if removed {
            trace!(key, "Entry removed");
        }
        removed
    }

    /// All keys across every shard, in no particular order.
    ///
    /// Shards are enumerated one at a time with no snapshot across them:
    /// a key inserted into one shard while another is being walked may or
    /// may not appear.
    pub fn all_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        for shard in &self.shards {
            keys.extend(shard.read().unwrap().keys().cloned());
        }
        keys
    }

    /// Keys held by a single shard.
    ///
    /// Panics if `index` is out of range.
    pub fn keys_for_shard(&self, index: usize) -> Vec<String> {
        self.shards[index].read().unwrap().keys().cloned().collect()
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Total entry count, summing each shard at the instant it is read.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().unwrap().len())
            .sum()
    }

    /// Check whether every shard is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
