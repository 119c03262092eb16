//! Bounded in-memory storage (moka)
//!
//! Fixed-capacity, TTL-evicting map of string keys to encoded values.
//! Capacity is accounted in bytes (key + value). Evicted or expired entries
//! simply behave as misses.

use moka::sync::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{EntryTtl, StoreError};

/// Fraction of the capacity a single entry may use
const MAX_ENTRY_FRACTION: u64 = 1024;

/// Raw key-value backend behind the name store
///
/// Implementations must be safe for concurrent reads and writes of
/// individual keys. Compound read-modify-write is serialized by the caller.
pub trait CacheBackend: Send + Sync {
    /// Get the encoded value of `key`, counting a hit when present
    fn get(&self, key: &str) -> Option<Arc<[u8]>>;

    /// Replace the value of `key`, resetting its expiration to `ttl`
    fn set(&self, key: &str, value: Vec<u8>, ttl: EntryTtl) -> Result<(), StoreError>;

    /// Visit every live entry
    fn for_each(&self, visit: &mut dyn FnMut(&str, &[u8]));

    /// Hits since the last statistics reset
    fn hit_count(&self) -> u64;

    /// Reset hit statistics
    fn reset_statistics(&self);
}

#[derive(Clone)]
struct StoredValue {
    data: Arc<[u8]>,
    ttl: Option<Duration>,
}

/// Every write sets the expiration of the whole entry
struct EntryExpiry;

impl Expiry<String, StoredValue> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// moka-backed storage
pub struct MokaBackend {
    cache: Cache<String, StoredValue>,
    max_entry_bytes: usize,
    hits: AtomicU64,
}

impl MokaBackend {
    /// Create a backend holding at most `capacity_bytes` of keys and values
    pub fn new(capacity_bytes: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity_bytes)
            .weigher(|key: &String, value: &StoredValue| -> u32 {
                (key.len() + value.data.len()).try_into().unwrap_or(u32::MAX)
            })
            .expire_after(EntryExpiry)
            .build();

        let max_entry_bytes = (capacity_bytes / MAX_ENTRY_FRACTION).max(1) as usize;

        debug!(
            "Name store backend: {} bytes, {} bytes per entry",
            capacity_bytes, max_entry_bytes
        );

        Self {
            cache,
            max_entry_bytes,
            hits: AtomicU64::new(0),
        }
    }

    /// Largest accepted entry (key + value)
    pub fn max_entry_bytes(&self) -> usize {
        self.max_entry_bytes
    }
}

impl CacheBackend for MokaBackend {
    fn get(&self, key: &str) -> Option<Arc<[u8]>> {
        let value = self.cache.get(key)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value.data)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: EntryTtl) -> Result<(), StoreError> {
        let size = key.len() + value.len();
        if size > self.max_entry_bytes {
            return Err(StoreError::EntryTooLarge {
                key: key.to_string(),
                size,
                limit: self.max_entry_bytes,
            });
        }

        self.cache.insert(
            key.to_string(),
            StoredValue {
                data: value.into(),
                ttl: ttl.as_duration(),
            },
        );
        Ok(())
    }

    fn for_each(&self, visit: &mut dyn FnMut(&str, &[u8])) {
        for (key, value) in self.cache.iter() {
            visit(key.as_str(), &value.data);
        }
    }

    fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn reset_statistics(&self) {
        self.hits.store(0, Ordering::Relaxed);
    }
}
