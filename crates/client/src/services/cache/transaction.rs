//! Optimistic document updates.

use std::sync::{Arc, Mutex};

use packup_core::Document;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{DocumentKey, Entries, EntrySnapshot, EntryStatus, lock};
use super::subscription::owned_entry;
use crate::providers::StoreError;

/// What the entry looked like before the patch was applied.
struct Snapshot {
    value: Option<Option<Document>>,
    status: EntryStatus,
    error: Option<Arc<StoreError>>,
}

/// A local write applied ahead of the remote call.
///
/// [`begin`](Self::begin) snapshots the entry and applies the patch; the
/// caller then settles the transaction with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Both only touch the entry if no newer write
/// or realtime push landed in between; otherwise the newer state is kept.
/// A transaction dropped unsettled marks the entry stale.
#[must_use = "settle the update with commit() or rollback()"]
pub struct OptimisticUpdate {
    entries: Arc<Mutex<Entries>>,
    key: DocumentKey,
    /// Identifies the entry the patch went into.
    channel: watch::Receiver<EntrySnapshot<Option<Document>>>,
    snapshot: Snapshot,
    /// Whether the patch was merged into a cached document.
    applied: bool,
    generation: u64,
    settled: bool,
}

enum Outcome {
    Commit,
    Rollback,
    Abandon,
}

impl OptimisticUpdate {
    pub(super) fn begin(
        entries: Arc<Mutex<Entries>>,
        key: DocumentKey,
        patch: &Map<String, Value>,
    ) -> Self {
        let (snapshot, applied, generation, channel) = {
            let mut table = lock(&entries);
            let entry = table.entry(&key);
            let snapshot = Snapshot {
                value: entry.value.clone(),
                status: entry.status,
                error: entry.error.clone(),
            };

            let applied = if let Some(Some(document)) = &entry.value {
                let merged = document.merged(patch);
                entry.store_value(Some(merged));
                true
            } else {
                false
            };
            // Also discards a fetch that started before this write.
            entry.generation += 1;
            entry.add_subscriber();
            entry.notify();
            (snapshot, applied, entry.generation, entry.watch())
        };
        debug!(key = %key, applied, "Applied optimistic update");

        Self {
            entries,
            key,
            channel,
            snapshot,
            applied,
            generation,
            settled: false,
        }
    }

    /// Key of the updated document.
    #[must_use]
    pub const fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// Keep the local write; the store accepted it.
    pub fn commit(mut self) {
        self.settle(Outcome::Commit);
    }

    /// Restore the snapshot; the store rejected the write.
    pub fn rollback(mut self) {
        self.settle(Outcome::Rollback);
    }

    fn settle(&mut self, outcome: Outcome) {
        if self.settled {
            return;
        }
        self.settled = true;

        let mut table = lock(&self.entries);
        // A cleared and recreated entry is not ours to touch.
        let Some(entry) = owned_entry(&mut table, &self.key, &self.channel) else {
            return;
        };
        entry.remove_subscriber(Instant::now());

        let superseded = entry.generation != self.generation;
        match outcome {
            Outcome::Commit => {
                // Nothing was merged, so the cached value predates the write.
                if !superseded && !self.applied {
                    entry.mark_stale();
                }
            }
            Outcome::Rollback if !superseded => {
                entry.value = self.snapshot.value.take();
                entry.status = self.snapshot.status;
                entry.error = self.snapshot.error.take();
                debug!(key = %self.key, "Rolled back optimistic update");
            }
            Outcome::Rollback | Outcome::Abandon => entry.mark_stale(),
        }
        entry.notify();
    }
}

impl Drop for OptimisticUpdate {
    fn drop(&mut self) {
        self.settle(Outcome::Abandon);
    }
}
