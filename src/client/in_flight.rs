//! In-flight request registry for coalescing identical concurrent requests

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

/// A pending operation every coalesced caller can await
pub type PendingOperation<T> = Shared<BoxFuture<'static, T>>;

/// Outcome of [`InFlightRegistry::join_or_start`]
pub struct Joined<T: Clone> {
    pub operation: PendingOperation<T>,
    /// True when this call registered the operation, false when it joined
    /// one already in flight
    pub started: bool,
}

/// Key to pending-operation map.
///
/// At most one operation exists per key. Registration and removal each
/// happen under a single lock acquisition. The operation deregisters itself
/// as it settles, whether it succeeded, failed or panicked.
pub struct InFlightRegistry<T: Clone> {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, (u64, PendingOperation<T>)>>,
}

impl<T: Clone> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> InFlightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, (u64, PendingOperation<T>)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the operation already pending for `key`, or register the one
    /// built by `start`.
    ///
    /// `start` only constructs the future; nothing runs until the returned
    /// operation is polled.
    pub fn join_or_start<F, Fut>(self: &Arc<Self>, key: &str, start: F) -> Joined<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut entries = self.lock();
        if let Some((_, operation)) = entries.get(key) {
            return Joined {
                operation: operation.clone(),
                started: false,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            registry: Arc::clone(self),
            key: key.to_string(),
            id,
        };
        let work = start();
        let operation = async move {
            let outcome = AssertUnwindSafe(work).catch_unwind().await;
            // Deregister before any caller observes the outcome
            drop(registration);
            match outcome {
                Ok(value) => value,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        .boxed()
        .shared();

        entries.insert(key.to_string(), (id, operation.clone()));
        Joined {
            operation,
            started: true,
        }
    }

    /// Whether an operation is pending for `key`
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn remove(&self, key: &str, id: u64) {
        let removed = {
            let mut entries = self.lock();
            match entries.get(key) {
                Some((entry_id, _)) if *entry_id == id => entries.remove(key),
                _ => None,
            }
        };
        // Dropped outside the lock
        drop(removed);
    }
}

/// Removes its registry entry when dropped, but only if the entry is still
/// the one it registered.
///
/// Held by the operation until it settles; also covers the operation being
/// dropped without ever completing.
struct Registration<T>
where
    T: Clone + Send + Sync + 'static,
{
    registry: Arc<InFlightRegistry<T>>,
    key: String,
    id: u64,
}

impl<T> Drop for Registration<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}
