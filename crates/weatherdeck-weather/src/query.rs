//! Keyed in-process query cache.
//!
//! Entries are filled on demand by a fetch function and served until they are
//! invalidated; the next `query` after that re-runs the fetch. Entries never
//! expire on their own.
//! Mutations run through `mutate`, which serializes them per key and fires an
//! `on_success` hook (typically an invalidation) when they succeed.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::QueryError;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Hierarchical cache key, e.g. `["favorites"]` or `["weather", "48.85-2.35"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// True if `prefix` matches the leading segments of this key.
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<&str> for QueryKey {
    fn from(segment: &str) -> Self {
        Self(vec![segment.to_string()])
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Cache change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEvent {
    /// A fresh value was stored for the key.
    Updated(QueryKey),
    /// The key was invalidated; the next query refetches it.
    Invalidated(QueryKey),
}

struct QueryEntry {
    data: Arc<dyn Any + Send + Sync>,
    invalidated: bool,
}

impl QueryEntry {
    fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Self {
            data: Arc::new(value),
            invalidated: false,
        }
    }
}

/// Shared query cache. Clone the `Arc` to share it between consumers.
pub struct QueryClient {
    entries: Mutex<HashMap<QueryKey, QueryEntry>>,
    mutation_locks: Mutex<HashMap<QueryKey, Arc<tokio::sync::Mutex<()>>>>,
    events: broadcast::Sender<QueryEvent>,
    // Bumped on every invalidation; a fetch that started before one is not cached.
    generation: AtomicU64,
}

impl fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryClient")
            .field("entries", &self.entries.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            mutation_locks: Mutex::new(HashMap::new()),
            events,
            generation: AtomicU64::new(0),
        }
    }

    /// Return the cached value for `key`, running `fetch` on a miss or after
    /// invalidation.
    ///
    /// # Errors
    /// Returns `QueryError::TypeMismatch` if a valid entry holds another type.
    pub fn query<T, F>(&self, key: &QueryKey, fetch: F) -> Result<T, QueryError>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(entry) = self.entries.lock().get(key) {
            if !entry.invalidated {
                tracing::debug!("Query cache hit for {}", key);
                return entry
                    .data
                    .downcast_ref::<T>()
                    .cloned()
                    .ok_or_else(|| QueryError::TypeMismatch {
                        key: key.to_string(),
                    });
            }
        }

        tracing::debug!("Query cache miss for {}, fetching", key);
        let generation = self.generation.load(Ordering::SeqCst);
        // fetch runs without the entries lock held
        let value = fetch();

        let stored = {
            let mut entries = self.entries.lock();
            if self.generation.load(Ordering::SeqCst) == generation {
                entries.insert(key.clone(), QueryEntry::new(value.clone()));
                true
            } else {
                false
            }
        };
        if stored {
            let _ = self.events.send(QueryEvent::Updated(key.clone()));
        } else {
            tracing::debug!("Query {} was invalidated during fetch, not caching", key);
        }
        Ok(value)
    }

    /// Cached value for `key` even if invalidated, if present with type `T`.
    pub fn get_query_data<T>(&self, key: &QueryKey) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.entries
            .lock()
            .get(key)
            .and_then(|entry| entry.data.downcast_ref::<T>().cloned())
    }

    /// Store `value` for `key` as a valid entry.
    pub fn set_query_data<T>(&self, key: &QueryKey, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.entries
            .lock()
            .insert(key.clone(), QueryEntry::new(value));
        let _ = self.events.send(QueryEvent::Updated(key.clone()));
    }

    /// Mark every entry whose key starts with `prefix` as invalidated.
    ///
    /// Returns the number of entries affected.
    pub fn invalidate_queries(&self, prefix: &QueryKey) -> usize {
        let invalidated: Vec<QueryKey> = {
            let mut entries = self.entries.lock();
            self.generation.fetch_add(1, Ordering::SeqCst);
            entries
                .iter_mut()
                .filter(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| {
                    entry.invalidated = true;
                    key.clone()
                })
                .collect()
        };

        for key in &invalidated {
            tracing::debug!("Invalidated query {}", key);
            let _ = self.events.send(QueryEvent::Invalidated(key.clone()));
        }
        invalidated.len()
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Run a mutation for `key`, then call `on_success` if it succeeded.
    ///
    /// Mutations sharing a key run one at a time; the future is not polled
    /// until the previous mutation for that key has finished.
    pub async fn mutate<T, E, Fut, S>(&self, key: &QueryKey, mutation: Fut, on_success: S) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        S: FnOnce(&QueryClient, &T),
    {
        let lock = self.mutation_lock(key);
        let _guard = lock.lock().await;

        let result = mutation.await;
        match &result {
            Ok(value) => on_success(self, value),
            Err(_) => tracing::debug!("Mutation for {} failed, skipping success hook", key),
        }
        result
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryEvent> {
        self.events.subscribe()
    }

    fn mutation_lock(&self, key: &QueryKey) -> Arc<tokio::sync::Mutex<()>> {
        self.mutation_locks
            .lock()
            .entry(key.clone())
            .or_default()
            .clone()
    }
}
