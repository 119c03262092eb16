//! Name Store Module
//!
//! Capacity-bounded, TTL-aware map from string keys to ordered lists of
//! strings. Rooms map to node ids, nodes map to address strings. Lists are
//! stored JSON-encoded; every write replaces the whole list and resets the
//! expiration of the entry.

mod storage;

pub use storage::{CacheBackend, MokaBackend};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{StoreStats, NODE_PREFIX, ROOM_PREFIX};

/// Name store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("key not found")]
    NotFound,

    #[error("stored value for {key} is not a list of strings: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode value list: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("entry {key} is {size} bytes, limit is {limit}")]
    EntryTooLarge {
        key: String,
        size: usize,
        limit: usize,
    },
}

/// Expiration of a whole entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryTtl {
    Never,
    After(Duration),
}

impl EntryTtl {
    /// `0` means the entry never expires
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            EntryTtl::Never
        } else {
            EntryTtl::After(Duration::from_secs(secs))
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            EntryTtl::Never => None,
            EntryTtl::After(ttl) => Some(*ttl),
        }
    }
}

/// Shared name store
///
/// Reads go straight to the backend. Writes serialize behind one lock so
/// that read, append, dedup and write happen as a unit.
pub struct NameStore {
    backend: Arc<dyn CacheBackend>,
    write_lock: Mutex<()>,
}

impl NameStore {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Store backed by moka with `capacity_bytes` of room
    pub fn in_memory(capacity_bytes: u64) -> Self {
        Self::new(Arc::new(MokaBackend::new(capacity_bytes)))
    }

    /// Get the list stored under `key`
    pub fn get(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let data = self.backend.get(key).ok_or(StoreError::NotFound)?;
        decode(key, &data)
    }

    /// Replace the list stored under `key`
    pub fn set(&self, key: &str, values: &[String], ttl: EntryTtl) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(values)?;
        let _guard = self.write_lock.lock();
        self.backend.set(key, encoded, ttl)
    }

    /// Append one value to the list under `key`
    pub fn append(&self, key: &str, value: &str, ttl: EntryTtl) -> Result<(), StoreError> {
        self.append_all(key, [value], ttl)
    }

    /// Append values to the list under `key`, dropping duplicates
    ///
    /// Existing order is kept, new values go last. The expiration of the
    /// whole entry is reset to `ttl`.
    pub fn append_all<I, S>(&self, key: &str, values: I, ttl: EntryTtl) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.write_lock.lock();

        let mut list = match self.backend.get(key) {
            Some(data) => decode(key, &data)?,
            None => Vec::new(),
        };
        list.extend(values.into_iter().map(Into::into));
        let list = dedup_preserving_order(list);

        let encoded = serde_json::to_vec(&list)?;
        self.backend.set(key, encoded, ttl)?;

        debug!("Stored {} ({} values)", key, list.len());
        Ok(())
    }

    /// Count rooms, nodes and addresses with a full scan
    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            hit_count: self.backend.hit_count(),
            ..StoreStats::default()
        };

        self.backend.for_each(&mut |key, data| {
            if key.starts_with(ROOM_PREFIX) {
                stats.rooms += 1;
            } else if key.starts_with(NODE_PREFIX) {
                stats.nodes += 1;
                match serde_json::from_slice::<Vec<String>>(data) {
                    Ok(addresses) => stats.addresses += addresses.len() as u64,
                    Err(e) => warn!("Unreadable entry {}: {}", key, e),
                }
            }
        });

        stats
    }

    /// Reset the hit counter
    pub fn reset_statistics(&self) {
        self.backend.reset_statistics();
    }
}

fn decode(key: &str, data: &[u8]) -> Result<Vec<String>, StoreError> {
    serde_json::from_slice(data).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })
}

fn dedup_preserving_order(values: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::with_capacity(values.len());
    values
        .into_iter()
        .filter(|value| seen.insert(value.clone()))
        .collect()
}
