//! In-memory TTL cache for API responses

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::debug;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// A cached value with its storage and expiry times
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub data: T,
    pub stored_at: Instant,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

/// Key to entry map with TTL-based expiry.
///
/// The lock is only ever held for synchronous map operations.
pub struct CacheStore<T> {
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
    /// Bumped by every `clear()`
    generation: AtomicU64,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<T: Clone + Send + 'static> CacheStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        // A panic while holding the lock cannot leave a half-written entry,
        // so a poisoned map is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get cached data if present and not expired. Expired entries are
    /// removed on access.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.data.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store data with a TTL. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, data: T, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let stored_at = Instant::now();
        let entry = CacheEntry {
            data,
            stored_at,
            expires_at: stored_at + ttl,
        };
        self.lock().insert(key.into(), entry);
    }

    /// Current clear generation, for use with [`set_in_generation`](Self::set_in_generation)
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store data only if the cache has not been cleared since `generation`
    /// was read. Returns whether the entry was stored.
    pub fn set_in_generation(
        &self,
        generation: u64,
        key: impl Into<String>,
        data: T,
        ttl: Duration,
    ) -> bool {
        if ttl.is_zero() {
            return false;
        }
        let mut entries = self.lock();
        if self.generation() != generation {
            return false;
        }
        let stored_at = Instant::now();
        entries.insert(
            key.into(),
            CacheEntry {
                data,
                stored_at,
                expires_at: stored_at + ttl,
            },
        );
        true
    }

    /// Delete a specific entry by key
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Delete every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        before - entries.len()
    }

    /// Clear all entries, returning how many were removed
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let count = entries.len();
        entries.clear();
        count
    }

    /// Remove expired entries, returning how many were evicted
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.lock();
        let valid = entries.values().filter(|e| e.is_fresh(now)).count();
        CacheStats {
            total_entries: entries.len(),
            valid_entries: valid,
            expired_entries: entries.len() - valid,
        }
    }

    /// Spawn a background task that evicts expired entries every `interval`.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let evicted = store.sweep_expired();
                if evicted > 0 {
                    debug!("Cache sweep evicted {} expired entries", evicted);
                }
            }
        })
    }
}
