//! Watch-driven cache synchronization.
//!
//! A sync turns the raw watch stream of a key prefix into typed, ordered
//! [`SyncEvent`]s. It always starts by replaying the current contents as a
//! list (`ListStart`, one `List` per record, `ListEnd`) so the receiver can
//! prune anything it holds that no longer exists, then streams live changes
//! until cancelled.
//!
//! Live changes are delivered a commit at a time: the events of one
//! multi-key commit reach the receiver together, so nothing waiting on that
//! commit's revision can observe only part of it.
//!
//! Records that fail to decode never stop the sync. A corrupt snapshot
//! record is skipped; a corrupt live record still advances the revision
//! through `RevOnly` so revision waiters are released.

use crate::cache::EntityCache;
use crate::cancel::CancelToken;
use crate::error::{StoreError, StoreResult};
use crate::object::{decode_obj, key_from_db_key, Entity};
use crate::store::ObjectStore;
use edgesync_kv::{EventKind, KvRecord, KvStore, Revision, WatchEvent};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A typed change delivered to a [`Cacher`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent<T: Entity> {
    /// A list replay is starting.
    ListStart,
    /// An object present at the list revision.
    List {
        /// The object.
        obj: T,
        /// The list revision.
        rev: Revision,
    },
    /// The list replay finished. Objects not listed since `ListStart` are gone.
    ListEnd {
        /// The list revision.
        rev: Revision,
    },
    /// An object was created or changed.
    Update {
        /// The new value.
        obj: T,
        /// Revision of the change.
        rev: Revision,
    },
    /// An object was deleted.
    Delete {
        /// Key of the deleted object.
        key: T::Key,
        /// Revision of the delete.
        rev: Revision,
    },
    /// The store advanced but the change could not be decoded.
    RevOnly {
        /// Revision of the change.
        rev: Revision,
    },
}

/// Receives the typed events of a sync.
pub trait Cacher<T: Entity>: Send + Sync {
    /// Applies one event.
    fn apply(&self, event: SyncEvent<T>);

    /// Applies the live events of one commit, in order.
    ///
    /// The default applies them one by one. Receivers that expose a
    /// revision should apply them as a unit.
    fn apply_commit(&self, events: Vec<SyncEvent<T>>) {
        for event in events {
            self.apply(event);
        }
    }

    /// Called once when the sync feeding this cacher exits.
    fn sync_stopped(&self) {}
}

/// State of a running sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Replaying the current contents.
    Bootstrapping,
    /// Applying live changes.
    Streaming,
    /// Stopped on request.
    Cancelled,
    /// Stopped because the backend failed.
    Failed,
}

impl SyncState {
    /// Returns true while the sync is running.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Bootstrapping | SyncState::Streaming)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Bootstrapping => "bootstrapping",
            SyncState::Streaming => "streaming",
            SyncState::Cancelled => "cancelled",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Shared, observable [`SyncState`].
#[derive(Debug, Clone)]
pub struct SyncStatus {
    state: Arc<RwLock<SyncState>>,
}

impl SyncStatus {
    /// Creates a status in the `Bootstrapping` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(SyncState::Bootstrapping)),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub fn get(&self) -> SyncState {
        *self.state.read()
    }

    fn set(&self, state: SyncState) {
        let mut cur = self.state.write();
        if *cur != state {
            debug!(from = %*cur, to = %state, "sync state");
            *cur = state;
        }
    }
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receives raw watch traffic from [`drive_watch`].
pub(crate) trait WatchSink {
    fn list_start(&self);
    fn list_record(&self, record: &KvRecord, rev: Revision);
    fn list_end(&self, rev: Revision);
    /// Receives every event of one commit, in commit order.
    fn commit(&self, events: &[WatchEvent]);
}

/// Runs the watch protocol on `prefix` until cancelled or the stream fails.
pub(crate) fn drive_watch(
    kv: &dyn KvStore,
    prefix: &str,
    sink: &dyn WatchSink,
    cancel: &CancelToken,
    poll_interval: Duration,
    status: &SyncStatus,
) -> StoreResult<()> {
    status.set(SyncState::Bootstrapping);
    let mut stream = match kv.watch(prefix) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(prefix, error = %err, "sync failed to start watch");
            status.set(SyncState::Failed);
            return Err(err.into());
        }
    };

    let list_rev = stream.snapshot_revision();
    let records = stream.take_snapshot();
    info!(prefix, records = records.len(), rev = %list_rev, "sync list");
    sink.list_start();
    for record in &records {
        sink.list_record(record, list_rev);
    }
    // Set before ListEnd releases any initial-sync waiter.
    status.set(SyncState::Streaming);
    sink.list_end(list_rev);

    let mut batch: Vec<WatchEvent> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            info!(prefix, "sync cancelled");
            status.set(SyncState::Cancelled);
            return Ok(());
        }
        match stream.recv_timeout(poll_interval) {
            Ok(Some(event)) => {
                let more = event.more_events;
                batch.push(event);
                if !more {
                    sink.commit(&batch);
                    batch.clear();
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(prefix, error = %err, "sync watch lost");
                status.set(SyncState::Failed);
                return Err(err.into());
            }
        }
    }
}

/// Decodes a snapshot record of `T`.
///
/// # Errors
///
/// Returns `Corrupt` if the value does not decode.
pub fn decode_record<T: Entity>(record: &KvRecord) -> StoreResult<T> {
    decode_obj(&record.key, &record.value)
}

/// Classifies a live watch event of `T`.
///
/// Puts become `Update` and deletes become `Delete`, with the key parsed
/// from the store key. Anything that fails to decode is logged and becomes
/// `RevOnly`.
pub fn decode_event<T: Entity>(event: &WatchEvent) -> SyncEvent<T> {
    let rev = event.revision;
    let decoded = match event.kind {
        EventKind::Put => {
            decode_obj::<T>(&event.key, &event.value).map(|obj| SyncEvent::Update { obj, rev })
        }
        EventKind::Delete => {
            key_from_db_key::<T>(&event.key).map(|key| SyncEvent::Delete { key, rev })
        }
    };
    decoded.unwrap_or_else(|err| {
        warn!(key = %event.key, %rev, error = %err, "undecodable sync event");
        SyncEvent::RevOnly { rev }
    })
}

/// Adapts a typed [`Cacher`] to raw watch traffic.
pub(crate) struct TypedSink<'a, T: Entity> {
    pub(crate) cacher: &'a dyn Cacher<T>,
}

impl<T: Entity> WatchSink for TypedSink<'_, T> {
    fn list_start(&self) {
        self.cacher.apply(SyncEvent::ListStart);
    }

    fn list_record(&self, record: &KvRecord, rev: Revision) {
        match decode_record::<T>(record) {
            Ok(obj) => self.cacher.apply(SyncEvent::List { obj, rev }),
            Err(err) => warn!(key = %record.key, error = %err, "skipping corrupt record"),
        }
    }

    fn list_end(&self, rev: Revision) {
        self.cacher.apply(SyncEvent::ListEnd { rev });
    }

    fn commit(&self, events: &[WatchEvent]) {
        self.cacher
            .apply_commit(events.iter().map(decode_event::<T>).collect());
    }
}

/// A background thread syncing one [`EntityCache`] from its store.
///
/// Dropping the runner cancels and joins the thread.
pub struct SyncRunner {
    type_name: &'static str,
    cancel: CancelToken,
    status: SyncStatus,
    handle: Option<JoinHandle<StoreResult<()>>>,
}

impl SyncRunner {
    /// Spawns a sync of `store` into `cache`.
    ///
    /// Returns immediately. Use [`EntityCache::wait_initial_sync_done`] to
    /// wait for the first list replay.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the thread cannot be spawned.
    pub fn start<T: Entity>(store: ObjectStore<T>, cache: EntityCache<T>) -> StoreResult<Self> {
        let cancel = CancelToken::new();
        let status = SyncStatus::new();
        let handle = {
            let cancel = cancel.clone();
            let status = status.clone();
            thread::Builder::new()
                .name(format!("sync-{}", T::TYPE_NAME))
                .spawn(move || store.sync_with_status(&cache, &cancel, &status))
                .map_err(|e| StoreError::unavailable(format!("spawn sync thread: {e}")))?
        };
        debug!(type_name = T::TYPE_NAME, "sync runner started");
        Ok(Self {
            type_name: T::TYPE_NAME,
            cancel,
            status,
            handle: Some(handle),
        })
    }

    /// Returns the current state of the sync.
    #[must_use]
    pub fn state(&self) -> SyncState {
        self.status.get()
    }

    /// Cancels the sync and waits for the thread to exit.
    ///
    /// # Errors
    ///
    /// Returns the error the sync stopped with, if any.
    pub fn done(mut self) -> StoreResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> StoreResult<()> {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(StoreError::unavailable(format!(
                    "{} sync thread panicked",
                    self.type_name
                ))),
            },
            None => Ok(()),
        }
    }
}

impl Drop for SyncRunner {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            debug!(type_name = self.type_name, error = %err, "sync ended with error");
        }
    }
}
