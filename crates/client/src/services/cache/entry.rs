//! Cache keys, entries and the shared entry table.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use packup_core::{Document, DocumentId, FilterSet, QueryFingerprint};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::providers::StoreError;

/// Outcome of one remote fetch, shared between de-duplicated waiters.
pub type FetchResult<V> = Result<V, Arc<StoreError>>;

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    /// Never loaded.
    Pending,
    /// Loaded and not invalidated since.
    Fresh,
    /// Holds a value that must be re-fetched before it is served again.
    Stale,
    /// The last fetch failed.
    Error,
}

/// Point-in-time view of an entry, handed to observers.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<V> {
    pub status: EntryStatus,
    pub value: Option<V>,
    pub error: Option<Arc<StoreError>>,
}

/// A key into the document cache.
///
/// Implemented by [`DocumentKey`] (single documents) and [`QueryKey`]
/// (filtered lists); each kind lives in its own table.
pub trait CacheKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    /// What an entry under this key holds.
    type Value: Clone + fmt::Debug + Send + Sync + 'static;

    /// Collection the key belongs to.
    fn collection(&self) -> &str;

    #[doc(hidden)]
    fn table(entries: &mut Entries) -> &mut HashMap<Self, Entry<Self::Value>>;
}

/// One document: `(collection, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentKey {
    pub collection: String,
    pub id: DocumentId,
}

impl DocumentKey {
    #[must_use]
    pub fn new(collection: impl Into<String>, id: DocumentId) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl CacheKey for DocumentKey {
    /// `None` once the store reports the document missing.
    type Value = Option<Document>;

    fn collection(&self) -> &str {
        &self.collection
    }

    fn table(entries: &mut Entries) -> &mut HashMap<Self, Entry<Self::Value>> {
        &mut entries.documents
    }
}

/// A list query: `(collection, fingerprint(filters))`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub collection: String,
    pub fingerprint: QueryFingerprint,
}

impl QueryKey {
    #[must_use]
    pub fn new(collection: impl Into<String>, filters: &FilterSet) -> Self {
        let collection = collection.into();
        let fingerprint = filters.fingerprint(&collection);
        Self {
            collection,
            fingerprint,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}?{}", self.collection, self.fingerprint)
    }
}

impl CacheKey for QueryKey {
    type Value = Vec<Document>;

    fn collection(&self) -> &str {
        &self.collection
    }

    fn table(entries: &mut Entries) -> &mut HashMap<Self, Entry<Self::Value>> {
        &mut entries.queries
    }
}

/// A fetch in progress. Waiters clone `fetch` and await the same result.
pub struct InFlight<V> {
    pub id: u64,
    /// Entry generation when the fetch started; a result is only applied if
    /// nothing wrote to the entry meanwhile.
    pub generation: u64,
    pub fetch: Shared<BoxFuture<'static, FetchResult<V>>>,
}

/// The single push channel of a document entry.
pub struct RealtimeChannel {
    pub task: JoinHandle<()>,
    pub subscribers: usize,
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct Entry<V> {
    pub value: Option<V>,
    pub status: EntryStatus,
    pub error: Option<Arc<StoreError>>,
    pub in_flight: Option<InFlight<V>>,
    /// Bumped by every write and push.
    pub generation: u64,
    pub subscribers: usize,
    pub idle_since: Option<Instant>,
    pub realtime: Option<RealtimeChannel>,
    watch: watch::Sender<EntrySnapshot<V>>,
}

impl<V: Clone> Entry<V> {
    pub fn new(now: Instant) -> Self {
        let (watch, _) = watch::channel(EntrySnapshot {
            status: EntryStatus::Pending,
            value: None,
            error: None,
        });
        Self {
            value: None,
            status: EntryStatus::Pending,
            error: None,
            in_flight: None,
            generation: 0,
            subscribers: 0,
            idle_since: Some(now),
            realtime: None,
            watch,
        }
    }

    pub fn snapshot(&self) -> EntrySnapshot<V> {
        EntrySnapshot {
            status: self.status,
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }

    /// Publish the current state to observers.
    pub fn notify(&self) {
        self.watch.send_replace(self.snapshot());
    }

    pub fn watch(&self) -> watch::Receiver<EntrySnapshot<V>> {
        self.watch.subscribe()
    }

    pub fn store_value(&mut self, value: V) {
        self.value = Some(value);
        self.status = EntryStatus::Fresh;
        self.error = None;
    }

    /// Force the next read to go to the store. Entries without a value are
    /// already re-fetched on read.
    pub fn mark_stale(&mut self) {
        if self.value.is_some() {
            self.status = EntryStatus::Stale;
        }
    }

    pub fn add_subscriber(&mut self) {
        self.subscribers += 1;
        self.idle_since = None;
    }

    pub fn remove_subscriber(&mut self, now: Instant) {
        self.subscribers = self.subscribers.saturating_sub(1);
        if self.subscribers == 0 {
            self.idle_since = Some(now);
        }
    }

    fn is_evictable(&self, now: Instant, ttl: Duration) -> bool {
        self.subscribers == 0
            && self.in_flight.is_none()
            && self.realtime.is_none()
            && self
                .idle_since
                .is_some_and(|since| now.saturating_duration_since(since) >= ttl)
    }
}

/// Both entry tables. Guarded by one mutex; never held across an await.
#[derive(Default)]
pub struct Entries {
    documents: HashMap<DocumentKey, Entry<Option<Document>>>,
    queries: HashMap<QueryKey, Entry<Vec<Document>>>,
}

impl Entries {
    /// Entry for `key`, created on first use.
    pub fn entry<K: CacheKey>(&mut self, key: &K) -> &mut Entry<K::Value> {
        K::table(self)
            .entry(key.clone())
            .or_insert_with(|| Entry::new(Instant::now()))
    }

    pub fn get_mut<K: CacheKey>(&mut self, key: &K) -> Option<&mut Entry<K::Value>> {
        K::table(self).get_mut(key)
    }

    /// Mark every list entry of `collection` stale and discard list fetches
    /// already in progress.
    pub fn invalidate_queries(&mut self, collection: &str) {
        for (key, entry) in &mut self.queries {
            if key.collection == collection {
                entry.mark_stale();
                entry.generation += 1;
                entry.notify();
                debug!(key = %key, "Invalidated list entry");
            }
        }
    }

    /// Apply a realtime push. Remote state wins over any local write.
    pub fn apply_push(&mut self, key: &DocumentKey, document: Option<Document>) {
        if let Some(entry) = self.documents.get_mut(key) {
            entry.store_value(document);
            entry.generation += 1;
            entry.notify();
            debug!(key = %key, "Applied realtime update");
        }
    }

    /// Drop unobserved entries idle for at least `ttl`.
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> usize {
        let before = self.len();
        self.documents.retain(|_, entry| !entry.is_evictable(now, ttl));
        self.queries.retain(|_, entry| !entry.is_evictable(now, ttl));
        before - self.len()
    }

    pub fn len(&self) -> usize {
        self.documents.len() + self.queries.len()
    }
}

/// Lock the entry table. A panic while holding the lock cannot leave an
/// entry half-written, so poisoning is ignored.
pub fn lock(entries: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    entries.lock().unwrap_or_else(PoisonError::into_inner)
}
