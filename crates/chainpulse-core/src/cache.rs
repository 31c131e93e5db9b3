//! Two-tier response cache.
//!
//! L1 is an in-process map for hot entries; L2 is a persistent key-value
//! store that survives restarts. Writes land in L2 first, then L1, under a
//! single write gate, and carry a generation counter so a slow retry from an
//! old fetch can never clobber fresher data.
//!
//! Expired entries are kept until overwritten: the executor serves them as
//! an explicit stale fallback when every live path fails.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use fjall::{Keyspace, PartitionCreateOptions, PartitionHandle};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::NormalizedRecord;

/// One cached fetch result.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub records: Arc<Vec<NormalizedRecord>>,
    pub expires_at_ms: i64,
    /// Monotonic fetch generation; writes with a stale generation are
    /// discarded.
    pub generation: u64,
}

impl StoredEntry {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// On-disk form of [`StoredEntry`].
#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    records: Vec<NormalizedRecord>,
    expires_at_ms: i64,
    generation: u64,
}

impl From<&StoredEntry> for PersistedEntry {
    fn from(entry: &StoredEntry) -> Self {
        Self {
            records: entry.records.as_ref().clone(),
            expires_at_ms: entry.expires_at_ms,
            generation: entry.generation,
        }
    }
}

impl From<PersistedEntry> for StoredEntry {
    fn from(entry: PersistedEntry) -> Self {
        Self {
            records: Arc::new(entry.records),
            expires_at_ms: entry.expires_at_ms,
            generation: entry.generation,
        }
    }
}

/// Backing store for the persistent tier.
///
/// Implementations are infallible at the call site: storage faults are
/// logged and degrade the cache to L1-only behavior rather than failing the
/// fetch that triggered them.
pub trait EntryStore: Send + Sync {
    fn get(&self, key: &str) -> Option<StoredEntry>;
    fn put(&self, key: &str, entry: &StoredEntry);
}

/// Persistent tier backed by a fjall keyspace partition.
pub struct FjallStore {
    _keyspace: Keyspace,
    partition: PartitionHandle,
}

impl FjallStore {
    pub fn open(path: &Path) -> Result<Self, fjall::Error> {
        let keyspace = fjall::Config::new(path).open()?;
        let partition = keyspace.open_partition("fetches", PartitionCreateOptions::default())?;
        Ok(Self {
            _keyspace: keyspace,
            partition,
        })
    }
}

impl EntryStore for FjallStore {
    fn get(&self, key: &str) -> Option<StoredEntry> {
        let bytes = match self.partition.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(error) => {
                warn!(key, %error, "persistent cache read failed");
                return None;
            }
        };

        match serde_json::from_slice::<PersistedEntry>(&bytes) {
            Ok(entry) => Some(entry.into()),
            Err(error) => {
                warn!(key, %error, "persistent cache entry is corrupt, dropping");
                let _ = self.partition.remove(key);
                None
            }
        }
    }

    fn put(&self, key: &str, entry: &StoredEntry) {
        let persisted = PersistedEntry::from(entry);
        match serde_json::to_vec(&persisted) {
            Ok(bytes) => {
                if let Err(error) = self.partition.insert(key, bytes) {
                    warn!(key, %error, "persistent cache write failed");
                }
            }
            Err(error) => warn!(key, %error, "persistent cache serialization failed"),
        }
    }
}

/// In-memory [`EntryStore`] for tests and cache-less deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntryStore for MemoryStore {
    fn get(&self, key: &str) -> Option<StoredEntry> {
        self.entries
            .read()
            .expect("memory store lock is not poisoned")
            .get(key)
            .cloned()
    }

    fn put(&self, key: &str, entry: &StoredEntry) {
        self.entries
            .write()
            .expect("memory store lock is not poisoned")
            .insert(key.to_owned(), entry.clone());
    }
}

/// The two-tier cache itself.
pub struct TieredCache {
    l1: RwLock<HashMap<String, StoredEntry>>,
    l1_capacity: usize,
    store: Arc<dyn EntryStore>,
    /// Serializes the generation check with the L2-then-L1 write.
    write_gate: Mutex<()>,
}

impl TieredCache {
    pub fn new(l1_capacity: usize, store: Arc<dyn EntryStore>) -> Self {
        Self {
            l1: RwLock::new(HashMap::new()),
            l1_capacity: l1_capacity.max(1),
            store,
            write_gate: Mutex::new(()),
        }
    }

    /// Store a fetch result unless a newer generation already landed.
    ///
    /// Returns whether the write was applied. L2 is written before L1 so a
    /// crash between the two never leaves the persistent tier behind the
    /// in-process one.
    pub fn store(
        &self,
        key: &str,
        records: Arc<Vec<NormalizedRecord>>,
        ttl: Duration,
        generation: u64,
        now_ms: i64,
    ) -> bool {
        let _gate = self
            .write_gate
            .lock()
            .expect("cache write gate is not poisoned");

        if let Some(existing) = self.peek(key) {
            if existing.generation >= generation {
                return false;
            }
        }

        let entry = StoredEntry {
            records,
            expires_at_ms: now_ms + ttl.as_millis() as i64,
            generation,
        };

        self.store.put(key, &entry);

        let mut l1 = self.l1.write().expect("cache l1 lock is not poisoned");
        if !l1.contains_key(key) && l1.len() >= self.l1_capacity {
            evict_soonest_to_expire(&mut l1);
        }
        l1.insert(key.to_owned(), entry);
        true
    }

    /// Unexpired entry for `key`, L1 first, populating L1 on an L2 hit.
    pub fn lookup_fresh(&self, key: &str, now_ms: i64) -> Option<StoredEntry> {
        if let Some(entry) = self.l1_get(key) {
            if entry.is_fresh(now_ms) {
                return Some(entry);
            }
        }

        let entry = self.store.get(key)?;
        if !entry.is_fresh(now_ms) {
            return None;
        }

        let mut l1 = self.l1.write().expect("cache l1 lock is not poisoned");
        let keep = l1
            .get(key)
            .map(|existing| existing.generation >= entry.generation)
            .unwrap_or(false);
        if !keep {
            if !l1.contains_key(key) && l1.len() >= self.l1_capacity {
                evict_soonest_to_expire(&mut l1);
            }
            l1.insert(key.to_owned(), entry.clone());
        }
        Some(entry)
    }

    /// Best available entry for `key`, expired or not. Stale fallback path.
    pub fn lookup_any(&self, key: &str) -> Option<StoredEntry> {
        self.peek(key)
    }

    /// Highest-generation entry across both tiers, ignoring freshness.
    fn peek(&self, key: &str) -> Option<StoredEntry> {
        let from_l1 = self.l1_get(key);
        let from_l2 = self.store.get(key);
        match (from_l1, from_l2) {
            (Some(a), Some(b)) => Some(if a.generation >= b.generation { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    fn l1_get(&self, key: &str) -> Option<StoredEntry> {
        self.l1
            .read()
            .expect("cache l1 lock is not poisoned")
            .get(key)
            .cloned()
    }
}

fn evict_soonest_to_expire(l1: &mut HashMap<String, StoredEntry>) {
    let victim = l1
        .iter()
        .min_by_key(|(_, entry)| entry.expires_at_ms)
        .map(|(key, _)| key.clone());
    if let Some(victim) = victim {
        l1.remove(&victim);
    }
}
