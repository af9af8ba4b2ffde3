//! Reference-counted handles on cache entries.

use std::sync::{Arc, Mutex, Weak};

use packup_core::Document;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::info;

use super::entry::{CacheKey, DocumentKey, Entries, Entry, EntrySnapshot, lock};

/// Keeps an entry alive and reports its changes.
///
/// Entries with at least one subscription are never evicted. Dropping the
/// subscription releases it; [`release`](Self::release) is idempotent.
pub struct EntrySubscription<K: CacheKey> {
    entries: Weak<Mutex<Entries>>,
    key: K,
    rx: watch::Receiver<EntrySnapshot<K::Value>>,
    released: bool,
}

impl<K: CacheKey> EntrySubscription<K> {
    pub(super) fn new(entries: &Arc<Mutex<Entries>>, key: K) -> Self {
        let rx = {
            let mut table = lock(entries);
            let entry = table.entry(&key);
            entry.add_subscriber();
            entry.watch()
        };
        Self {
            entries: Arc::downgrade(entries),
            key,
            rx,
            released: false,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Current state of the entry.
    #[must_use]
    pub fn snapshot(&self) -> EntrySnapshot<K::Value> {
        self.rx.borrow().clone()
    }

    /// Wait for the next change. `None` once released or the cache was
    /// cleared.
    pub async fn changed(&mut self) -> Option<EntrySnapshot<K::Value>> {
        if self.released {
            return None;
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stop observing the entry.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(entries) = self.entries.upgrade() {
            let mut table = lock(&entries);
            if let Some(entry) = owned_entry(&mut table, &self.key, &self.rx) {
                entry.remove_subscriber(Instant::now());
            }
        }
    }
}

impl<K: CacheKey> Drop for EntrySubscription<K> {
    fn drop(&mut self) {
        self.release();
    }
}

/// The entry this subscription was issued for, unless it has been replaced
/// since (the cache was cleared and the key reused).
pub(super) fn owned_entry<'a, K: CacheKey>(
    table: &'a mut Entries,
    key: &K,
    rx: &watch::Receiver<EntrySnapshot<K::Value>>,
) -> Option<&'a mut Entry<K::Value>> {
    table
        .get_mut(key)
        .filter(|entry| entry.watch().same_channel(rx))
}

/// An [`EntrySubscription`] on a document that also holds its realtime
/// push channel open.
///
/// The cache runs one channel per document no matter how many realtime
/// subscriptions exist; the last one to be released closes it.
pub struct RealtimeSubscription {
    entry: EntrySubscription<DocumentKey>,
    released: bool,
}

impl RealtimeSubscription {
    pub(super) const fn new(entry: EntrySubscription<DocumentKey>) -> Self {
        Self {
            entry,
            released: false,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &DocumentKey {
        self.entry.key()
    }

    #[must_use]
    pub fn snapshot(&self) -> EntrySnapshot<Option<Document>> {
        self.entry.snapshot()
    }

    pub async fn changed(&mut self) -> Option<EntrySnapshot<Option<Document>>> {
        self.entry.changed().await
    }

    /// Release the subscription, closing the channel if it was the last.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Some(entries) = self.entry.entries.upgrade() {
            let mut table = lock(&entries);
            if let Some(entry) = owned_entry(&mut table, &self.entry.key, &self.entry.rx)
                && let Some(channel) = entry.realtime.as_mut()
            {
                channel.subscribers = channel.subscribers.saturating_sub(1);
                if channel.subscribers == 0 {
                    entry.realtime = None;
                    info!(key = %self.entry.key, "Closed realtime channel");
                }
            }
        }
        self.entry.release();
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
