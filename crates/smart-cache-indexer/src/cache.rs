//! Durable key/value cache with per-entry expiry.
//!
//! Values are stored as JSON next to the time they were written. Reads treat a
//! missing, undecodable or expired entry the same way: as a miss. Expired
//! entries are evicted when they are read.

use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
    de::DeserializeOwned,
};
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};
use tracing::{
    debug,
    warn,
};

/// Key holding the [`ProgramAddressSet`](crate::types::ProgramAddressSet).
pub const PROGRAM_ADDRESSES_KEY: &str = "smart_cache_program_addresses";
/// Key holding the [`GasAggregate`](crate::types::GasAggregate).
pub const GAS_AGGREGATE_KEY: &str = "smart_cache_gas_analysis";

/// Default lifetime of a cache entry.
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Sled error")]
    SledError(#[source] std::io::Error),
    #[error("JSON error")]
    JsonError(#[source] serde_json::Error),
}

/// Source of wall-clock time, in milliseconds since the UNIX epoch.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// A cached value and the time it was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub timestamp: u64,
}

/// Storage medium behind the cache.
enum CacheBackend {
    /// Lost when the cache is dropped.
    InMemory(HashMap<String, Vec<u8>>),
    /// Survives restarts.
    Sled(Box<sled::Db>),
}

impl CacheBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match self {
            Self::InMemory(entries) => Ok(entries.get(key).cloned()),
            Self::Sled(db) => {
                db.get(key)
                    .map(|value| value.map(|bytes| bytes.to_vec()))
                    .map_err(CacheError::SledError)
            }
        }
    }

    fn insert(&mut self, key: &str, bytes: Vec<u8>) -> Result<(), CacheError> {
        match self {
            Self::InMemory(entries) => {
                entries.insert(key.to_string(), bytes);
                Ok(())
            }
            Self::Sled(db) => {
                db.insert(key, bytes).map_err(CacheError::SledError)?;
                Ok(())
            }
        }
    }

    fn remove(&mut self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::InMemory(entries) => {
                entries.remove(key);
                Ok(())
            }
            Self::Sled(db) => {
                db.remove(key).map_err(CacheError::SledError)?;
                Ok(())
            }
        }
    }
}

/// Expiring JSON cache shared by the ingestion cycles.
///
/// Only one cycle writes at a time (see
/// [`IncrementalUpdater`](crate::updater::IncrementalUpdater)); the mutex only
/// guards the backend handle.
pub struct LocalCache {
    backend: Mutex<CacheBackend>,
    expiry: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backend_name = match &*self.backend.lock() {
            CacheBackend::InMemory(_) => "InMemory",
            CacheBackend::Sled(_) => "Sled",
        };
        f.debug_struct("LocalCache")
            .field("backend", &backend_name)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl LocalCache {
    /// Cache persisted in the given sled database.
    pub fn new(db: sled::Db, expiry: Duration) -> Self {
        Self::with_backend(CacheBackend::Sled(Box::new(db)), expiry, Arc::new(SystemClock))
    }

    /// Cache that lives only as long as the process.
    #[must_use]
    pub fn new_ephemeral(expiry: Duration) -> Self {
        Self::new_ephemeral_with_clock(expiry, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn new_ephemeral_with_clock(expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(CacheBackend::InMemory(HashMap::new()), expiry, clock)
    }

    pub fn new_with_clock(db: sled::Db, expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_backend(CacheBackend::Sled(Box::new(db)), expiry, clock)
    }

    fn with_backend(backend: CacheBackend, expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: Mutex::new(backend),
            expiry,
            clock,
        }
    }

    /// Read a live entry.
    ///
    /// Returns `None` if the key is absent, the stored bytes do not decode as
    /// `CacheEntry<T>`, the medium fails, or the entry is older than the
    /// expiry window. Expired and undecodable entries are removed.
    pub fn read<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let mut backend = self.backend.lock();

        let bytes = match backend.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(
                    target: "smart_cache_indexer::cache",
                    key,
                    error = ?err,
                    "Cache read failed, treating as miss"
                );
                return None;
            }
        };

        let entry: CacheEntry<T> = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(
                    target: "smart_cache_indexer::cache",
                    key,
                    error = %err,
                    "Discarding corrupt cache entry"
                );
                Self::evict(&mut backend, key);
                return None;
            }
        };

        let age = self.clock.now_millis().saturating_sub(entry.timestamp);
        if u128::from(age) >= self.expiry.as_millis() {
            debug!(
                target: "smart_cache_indexer::cache",
                key,
                age_ms = age,
                "Evicting expired cache entry"
            );
            Self::evict(&mut backend, key);
            return None;
        }

        Some(entry)
    }

    /// Overwrite `key` with `value`, stamped with the current time.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            timestamp: self.clock.now_millis(),
        };
        let bytes = serde_json::to_vec(&entry).map_err(CacheError::JsonError)?;
        self.backend.lock().insert(key, bytes)
    }

    /// Drop `key` if present.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.backend.lock().remove(key)
    }

    /// Store raw bytes under `key`, bypassing serialization.
    #[cfg(any(test, feature = "test"))]
    pub fn write_raw(&self, key: &str, bytes: Vec<u8>) -> Result<(), CacheError> {
        self.backend.lock().insert(key, bytes)
    }

    fn evict(backend: &mut CacheBackend, key: &str) {
        if let Err(err) = backend.remove(key) {
            warn!(
                target: "smart_cache_indexer::cache",
                key,
                error = ?err,
                "Failed to evict cache entry"
            );
        }
    }
}
