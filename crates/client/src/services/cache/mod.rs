//! Keyed cache of remote documents and list queries.
//!
//! - Reads are served from `Fresh` entries; anything else is fetched, and
//!   concurrent reads of one key share a single outstanding fetch.
//! - `update` is optimistic (see [`OptimisticUpdate`]).
//! - Writes invalidate every list entry of the written collection and are
//!   stamped with `createdAt` / `updatedAt`.
//! - Realtime pushes overwrite the entry unconditionally.
//! - Entries nobody observes are evicted after an idle period.

mod entry;
mod subscription;
mod transaction;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use futures::StreamExt;
use futures::future::{BoxFuture, FutureExt};
use packup_core::{Document, DocumentId, FilterSet};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

pub use entry::{CacheKey, DocumentKey, EntrySnapshot, EntryStatus, QueryKey};
pub use subscription::{EntrySubscription, RealtimeSubscription};
pub use transaction::OptimisticUpdate;

use entry::{Entries, FetchResult, InFlight, RealtimeChannel, lock};

use crate::providers::{DocumentStore, StoreError};

const REALTIME_RETRY_INITIAL: Duration = Duration::from_millis(500);
const REALTIME_RETRY_MAX: Duration = Duration::from_secs(30);

/// Stamped on created documents unless the payload carries its own.
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Stamped on every update.
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Errors returned by cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store failed. Shared so every de-duplicated waiter gets the same
    /// error.
    #[error("document store error: {0}")]
    Store(Arc<StoreError>),

    /// A cached document did not match the requested record type.
    #[error("failed to decode {collection} document: {source}")]
    Decode {
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    /// A record could not be turned into a document body.
    #[error("failed to encode document: {0}")]
    Encode(#[source] serde_json::Error),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        Self::Store(Arc::new(err))
    }
}

// =============================================================================
// DocumentCache
// =============================================================================

/// Process-wide cache in front of a [`DocumentStore`].
pub struct DocumentCache<D> {
    store: Arc<D>,
    entries: Arc<Mutex<Entries>>,
    next_fetch_id: Arc<AtomicU64>,
    idle_ttl: Duration,
}

impl<D> Clone for DocumentCache<D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            entries: Arc::clone(&self.entries),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
            idle_ttl: self.idle_ttl,
        }
    }
}

impl<D: DocumentStore> DocumentCache<D> {
    /// Create a cache that evicts unobserved entries after `idle_ttl`.
    #[must_use]
    pub fn new(store: Arc<D>, idle_ttl: Duration) -> Self {
        Self {
            store,
            entries: Arc::new(Mutex::new(Entries::default())),
            next_fetch_id: Arc::new(AtomicU64::new(1)),
            idle_ttl,
        }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<D> {
        &self.store
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one document; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the store's error, shared with every concurrent reader of the
    /// same key.
    pub async fn read_one(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<Document>, CacheError> {
        let key = DocumentKey::new(collection, id.clone());
        let store = Arc::clone(&self.store);
        let (collection, id) = (collection.to_owned(), id.clone());

        self.read(key, move || {
            async move { store.get_document(&collection, &id).await.map_err(Arc::new) }.boxed()
        })
        .await
    }

    /// Read every document of `collection` matching `filters`.
    ///
    /// Filter sets that differ only in construction order share one entry.
    ///
    /// # Errors
    ///
    /// Returns the store's error, shared with every concurrent reader of the
    /// same query.
    pub async fn read_many(
        &self,
        collection: &str,
        filters: &FilterSet,
    ) -> Result<Vec<Document>, CacheError> {
        let key = QueryKey::new(collection, filters);
        let store = Arc::clone(&self.store);
        let (collection, filters) = (collection.to_owned(), filters.clone());

        self.read(key, move || {
            async move {
                store
                    .list_documents(&collection, &filters)
                    .await
                    .map_err(Arc::new)
            }
            .boxed()
        })
        .await
    }

    /// Read one document and decode it into `T`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the document does not decode.
    pub async fn read_record<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &DocumentId,
    ) -> Result<Option<T>, CacheError> {
        self.read_one(collection, id)
            .await?
            .map(|document| {
                document.decode().map_err(|source| CacheError::Decode {
                    collection: collection.to_owned(),
                    source,
                })
            })
            .transpose()
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn read<K: CacheKey>(
        &self,
        key: K,
        fetch: impl FnOnce() -> BoxFuture<'static, FetchResult<K::Value>>,
    ) -> Result<K::Value, CacheError> {
        let (fetch_id, fetch) = {
            let mut table = lock(&self.entries);
            let evicted = table.evict_idle(Instant::now(), self.idle_ttl);
            if evicted > 0 {
                debug!(evicted, "Evicted idle cache entries");
            }

            let entry = table.entry(&key);
            if entry.status == EntryStatus::Fresh
                && let Some(value) = &entry.value
            {
                debug!("Cache hit");
                return Ok(value.clone());
            }

            if let Some(in_flight) = &entry.in_flight {
                debug!(fetch_id = in_flight.id, "Joining in-flight fetch");
                (in_flight.id, in_flight.fetch.clone())
            } else {
                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let shared = fetch().shared();
                entry.in_flight = Some(InFlight {
                    id,
                    generation: entry.generation,
                    fetch: shared.clone(),
                });
                entry.notify();
                debug!(fetch_id = id, "Cache miss, fetching");
                (id, shared)
            }
        };

        let result = fetch.await;
        self.settle(&key, fetch_id, &result);
        result.map_err(CacheError::Store)
    }

    /// Record a fetch result. Only the first waiter to get here applies it,
    /// and only if the entry was not written since the fetch started.
    fn settle<K: CacheKey>(&self, key: &K, fetch_id: u64, result: &FetchResult<K::Value>) {
        let mut table = lock(&self.entries);
        let Some(entry) = table.get_mut(key) else {
            return;
        };
        let Some(in_flight) = entry.in_flight.take_if(|f| f.id == fetch_id) else {
            return;
        };

        if in_flight.generation != entry.generation {
            debug!(key = %key, "Discarding fetch result superseded by a newer write");
        } else {
            match result {
                Ok(value) => entry.store_value(value.clone()),
                Err(err) => {
                    entry.status = EntryStatus::Error;
                    entry.error = Some(Arc::clone(err));
                }
            }
        }
        entry.notify();
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create (or replace) a document, then cache the written value.
    ///
    /// The payload gets a `createdAt` timestamp if it has none.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the cache is left untouched in that case.
    #[instrument(skip(self, payload))]
    pub async fn create(
        &self,
        collection: &str,
        id: &DocumentId,
        payload: &Map<String, Value>,
    ) -> Result<Document, CacheError> {
        let mut payload = payload.clone();
        payload
            .entry(CREATED_AT_FIELD)
            .or_insert_with(timestamp);
        self.store.set_document(collection, id, &payload).await?;

        let document = Document::new(id.clone(), payload);
        {
            let mut table = lock(&self.entries);
            let entry = table.entry(&DocumentKey::new(collection, id.clone()));
            entry.store_value(Some(document.clone()));
            entry.generation += 1;
            entry.notify();
            table.invalidate_queries(collection);
        }
        debug!("Created document");
        Ok(document)
    }

    /// Serialise `record` and [`create`](Self::create) it.
    ///
    /// # Errors
    ///
    /// Returns an error if `record` is not an object or the write fails.
    pub async fn create_record<T: Serialize + Sync>(
        &self,
        collection: &str,
        id: &DocumentId,
        record: &T,
    ) -> Result<Document, CacheError> {
        let document = Document::from_value(id.clone(), record).map_err(CacheError::Encode)?;
        self.create(collection, id, &document.fields).await
    }

    /// Patch a document optimistically.
    ///
    /// The patch is stamped with `updatedAt`, and the merged value is visible
    /// to readers before the store answers. On failure the entry is rolled
    /// back to its previous value. Either way the collection's list entries
    /// are invalidated.
    ///
    /// # Errors
    ///
    /// Returns the store's error after rolling back.
    #[instrument(skip(self, patch))]
    pub async fn update(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        let mut patch = patch.clone();
        patch.insert(UPDATED_AT_FIELD.to_owned(), timestamp());

        let update = self.begin_update(collection, id, &patch);
        let result = self.store.patch_document(collection, id, &patch).await;

        match &result {
            Ok(()) => update.commit(),
            Err(err) => {
                warn!(error = %err, "Update rejected, rolling back");
                update.rollback();
            }
        }
        lock(&self.entries).invalidate_queries(collection);

        result.map_err(CacheError::from)
    }

    /// Apply `patch` locally and return the transaction that settles it.
    pub fn begin_update(
        &self,
        collection: &str,
        id: &DocumentId,
        patch: &Map<String, Value>,
    ) -> OptimisticUpdate {
        OptimisticUpdate::begin(
            Arc::clone(&self.entries),
            DocumentKey::new(collection, id.clone()),
            patch,
        )
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Observe an entry without fetching it.
    #[must_use]
    pub fn observe<K: CacheKey>(&self, key: K) -> EntrySubscription<K> {
        EntrySubscription::new(&self.entries, key)
    }

    /// Keep a document in sync with the store's push channel.
    ///
    /// One channel serves every realtime subscriber of the document. Broken
    /// channels are reopened with capped exponential backoff.
    #[must_use]
    pub fn subscribe_realtime(&self, collection: &str, id: &DocumentId) -> RealtimeSubscription {
        let key = DocumentKey::new(collection, id.clone());
        let subscription = RealtimeSubscription::new(self.observe(key.clone()));

        let mut table = lock(&self.entries);
        let entry = table.entry(&key);
        if let Some(channel) = entry.realtime.as_mut() {
            channel.subscribers += 1;
        } else {
            let task = tokio::spawn(pump_realtime(
                Arc::clone(&self.store),
                Arc::downgrade(&self.entries),
                key.clone(),
            ));
            entry.realtime = Some(RealtimeChannel {
                task,
                subscribers: 1,
            });
            info!(key = %key, "Opened realtime channel");
        }
        subscription
    }

    /// Current state of an entry, if cached.
    #[must_use]
    pub fn snapshot<K: CacheKey>(&self, key: &K) -> Option<EntrySnapshot<K::Value>> {
        lock(&self.entries).get_mut(key).map(|entry| entry.snapshot())
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict unobserved entries idle for longer than the configured TTL.
    pub fn evict_idle(&self) -> usize {
        lock(&self.entries).evict_idle(Instant::now(), self.idle_ttl)
    }

    /// Drop every entry and close every realtime channel.
    ///
    /// Used on sign-out: cached data belongs to the previous identity.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *lock(&self.entries));
        info!(entries = dropped.len(), "Cleared document cache");
    }
}

fn timestamp() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Forward pushes for `key` into the entry table until the cache goes away.
async fn pump_realtime<D: DocumentStore>(
    store: Arc<D>,
    entries: Weak<Mutex<Entries>>,
    key: DocumentKey,
) {
    let mut backoff = REALTIME_RETRY_INITIAL;
    loop {
        let mut updates = store.subscribe(&key.collection, &key.id);
        while let Some(update) = updates.next().await {
            let Some(shared) = entries.upgrade() else {
                return;
            };
            match update {
                Ok(document) => {
                    lock(&shared).apply_push(&key, document);
                    backoff = REALTIME_RETRY_INITIAL;
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "Realtime channel failed");
                    break;
                }
            }
        }

        if entries.strong_count() == 0 {
            return;
        }
        debug!(key = %key, delay_ms = backoff.as_millis(), "Resubscribing realtime channel");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(REALTIME_RETRY_MAX);
    }
}
