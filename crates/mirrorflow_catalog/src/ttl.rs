//! Time-bounded memoisation with single-flight refresh.
//!
//! Readers take a cheap read lock and clone an `Arc`. When the value is missing
//! or expired, callers queue on one async refresh lock; the first one in
//! recomputes and publishes, everyone behind it re-checks and reuses that value.
//! A value computed across an [`TtlCell::invalidate`] is handed to its caller
//! but never published.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub struct TtlCell<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, Arc<T>)>>,
    /// Bumped by every invalidation
    generation: AtomicU64,
    refresh: tokio::sync::Mutex<()>,
}

impl<T> TtlCell<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Current value if it has not expired.
    pub fn get(&self) -> Option<Arc<T>> {
        let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|(at, _)| at.elapsed() < self.ttl)
            .map(|(_, value)| Arc::clone(value))
    }

    /// Return the cached value, recomputing it at most once when expired.
    pub async fn get_or_refresh<F, Fut>(&self, compute: F) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if let Some(value) = self.get() {
            return value;
        }

        let _refreshing = self.refresh.lock().await;
        if let Some(value) = self.get() {
            return value;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let value = Arc::new(compute().await);

        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) == generation {
            *slot = Some((Instant::now(), Arc::clone(&value)));
        } else {
            debug!("Cached value invalidated while computing, not publishing");
        }
        value
    }

    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        self.generation.fetch_add(1, Ordering::SeqCst);
        *slot = None;
    }
}

/// One [`TtlCell`] per key.
pub struct TtlCache<K, T> {
    ttl: Duration,
    cells: Mutex<HashMap<K, Arc<TtlCell<T>>>>,
}

impl<K: Eq + Hash + Clone, T> TtlCache<K, T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cells: Mutex::new(HashMap::new()),
        }
    }

    fn cell(&self, key: &K) -> Arc<TtlCell<T>> {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            cells
                .entry(key.clone())
                .or_insert_with(|| Arc::new(TtlCell::new(self.ttl))),
        )
    }

    pub async fn get_or_refresh<F, Fut>(&self, key: &K, compute: F) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.cell(key).get_or_refresh(compute).await
    }

    pub fn clear(&self) {
        self.cells.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
