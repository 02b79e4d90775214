//! Single-watch sync of many entity caches.
//!
//! A [`SyncHub`] watches the whole keyspace from one thread and routes each
//! change to the cache registered for its type name. Because one thread
//! applies every change in commit order, a handler reacting to one type can
//! rely on caches of other types being at least as current.

use crate::cache::SyncedCache;
use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::object::parse_db_key;
use crate::stm::{apply_stm, Stm};
use crate::sync::{drive_watch, SyncState, SyncStatus, WatchSink};
use edgesync_kv::{KvRecord, KvStore, Revision, WatchEvent};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

struct HubState {
    revision: Revision,
    init_wait: bool,
    sync_done: bool,
}

struct HubInner {
    kv: Arc<dyn KvStore>,
    config: StoreConfig,
    caches: RwLock<HashMap<&'static str, Arc<dyn SyncedCache>>>,
    state: Mutex<HubState>,
    cond: Condvar,
}

impl HubInner {
    fn cache_for(&self, db_key: &str) -> Option<Arc<dyn SyncedCache>> {
        let Some((type_name, _)) = parse_db_key(db_key) else {
            debug!(key = db_key, "unparseable store key");
            return None;
        };
        let cache = self.caches.read().get(type_name).cloned();
        if cache.is_none() {
            debug!(type_name, "no cache for type");
        }
        cache
    }

    fn all_caches(&self) -> Vec<Arc<dyn SyncedCache>> {
        self.caches.read().values().cloned().collect()
    }

    fn advance(&self, rev: Revision, list_end: bool) {
        let mut state = self.state.lock();
        if rev > state.revision {
            state.revision = rev;
        }
        if list_end {
            state.init_wait = false;
        }
        self.cond.notify_all();
    }

    fn finish(&self) {
        for cache in self.all_caches() {
            cache.sync_stopped();
        }
        let mut state = self.state.lock();
        state.sync_done = true;
        self.cond.notify_all();
    }

    fn wait_until<P>(&self, timeout: Duration, what: &str, done: P) -> StoreResult<()>
    where
        P: Fn(&HubState) -> bool,
    {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();
        loop {
            if done(&state) {
                return Ok(());
            }
            if state.sync_done {
                return Err(StoreError::unavailable("sync hub stopped"));
            }
            let Some(deadline) = deadline else {
                self.cond.wait(&mut state);
                continue;
            };
            if self.cond.wait_until(&mut state, deadline).timed_out() && !done(&state) {
                return Err(StoreError::timeout(format!("sync hub waiting for {what}")));
            }
        }
    }
}

impl WatchSink for HubInner {
    fn list_start(&self) {
        for cache in self.all_caches() {
            cache.sync_list_start();
        }
    }

    fn list_record(&self, record: &KvRecord, rev: Revision) {
        if let Some(cache) = self.cache_for(&record.key) {
            cache.sync_list_record(record, rev);
        }
    }

    fn list_end(&self, rev: Revision) {
        for cache in self.all_caches() {
            cache.sync_list_end(rev);
        }
        self.advance(rev, true);
    }

    fn commit(&self, events: &[WatchEvent]) {
        let Some(last) = events.last() else {
            return;
        };
        let mut routed: Vec<(Arc<dyn SyncedCache>, Vec<&WatchEvent>)> = Vec::new();
        for event in events {
            let Some(cache) = self.cache_for(&event.key) else {
                continue;
            };
            match routed
                .iter_mut()
                .find(|(c, _)| c.type_name() == cache.type_name())
            {
                Some((_, batch)) => batch.push(event),
                None => routed.push((cache, vec![event])),
            }
        }
        for (cache, batch) in &routed {
            cache.sync_commit(batch);
        }
        // Every cache holds the whole commit before its revision is published.
        self.advance(last.revision, false);
    }
}

/// Syncs every registered cache from one watch over the whole keyspace.
///
/// Register every cache before calling [`SyncHub::start`]. Dropping the hub
/// stops the sync.
pub struct SyncHub {
    inner: Arc<HubInner>,
    cancel: CancelToken,
    status: SyncStatus,
    handle: Mutex<Option<JoinHandle<StoreResult<()>>>>,
}

impl SyncHub {
    /// Creates a hub with the default configuration.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_config(kv, StoreConfig::default())
    }

    /// Creates a hub with a custom configuration.
    pub fn with_config(kv: Arc<dyn KvStore>, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                kv,
                config,
                caches: RwLock::new(HashMap::new()),
                state: Mutex::new(HubState {
                    revision: Revision::ZERO,
                    init_wait: true,
                    sync_done: false,
                }),
                cond: Condvar::new(),
            }),
            cancel: CancelToken::new(),
            status: SyncStatus::new(),
            handle: Mutex::new(None),
        }
    }

    /// Returns the backing key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.inner.kv
    }

    /// Registers a cache for its type name, replacing any previous one.
    pub fn register<C: SyncedCache + 'static>(&self, cache: C) {
        let type_name = cache.type_name();
        self.inner.caches.write().insert(type_name, Arc::new(cache));
        debug!(type_name, "cache registered");
    }

    /// Starts the sync thread and blocks until every cache holds the
    /// initial list.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if already started, `Timeout` if the initial list
    /// does not finish within `timeout` and `Unavailable` if the sync fails.
    pub fn start(&self, timeout: Duration) -> StoreResult<()> {
        {
            let mut handle = self.handle.lock();
            if handle.is_some() {
                return Err(StoreError::invalid("sync hub already started"));
            }
            let inner = Arc::clone(&self.inner);
            let cancel = self.cancel.clone();
            let status = self.status.clone();
            let spawned = thread::Builder::new()
                .name("sync-hub".into())
                .spawn(move || {
                    let result = drive_watch(
                        inner.kv.as_ref(),
                        "",
                        inner.as_ref(),
                        &cancel,
                        inner.config.sync.poll_interval,
                        &status,
                    );
                    inner.finish();
                    result
                })
                .map_err(|e| StoreError::unavailable(format!("spawn sync hub: {e}")))?;
            *handle = Some(spawned);
        }
        info!(caches = self.inner.caches.read().len(), "sync hub started");
        self.inner
            .wait_until(timeout, "initial sync", |state| !state.init_wait)
    }

    /// Returns the revision of the last change the hub applied.
    pub fn revision(&self) -> Revision {
        self.inner.state.lock().revision
    }

    /// Returns the state of the sync thread.
    pub fn state(&self) -> SyncState {
        self.status.get()
    }

    /// Blocks until the hub has applied revision `rev`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` elapses first and `Unavailable` if the
    /// sync stops while waiting.
    pub fn sync_wait(&self, rev: Revision, timeout: Duration) -> StoreResult<()> {
        debug!(cur = %self.revision(), wait = %rev, "sync wait");
        self.inner
            .wait_until(timeout, &rev.to_string(), |state| state.revision >= rev)
    }

    /// Runs a transaction, then waits until its result is in the caches.
    ///
    /// # Errors
    ///
    /// Returns whatever [`apply_stm`] or [`SyncHub::sync_wait`] return.
    pub fn apply_stm_wait<F>(&self, apply: F) -> StoreResult<Revision>
    where
        F: FnMut(&mut Stm<'_>) -> StoreResult<()>,
    {
        let rev = apply_stm(self.inner.kv.as_ref(), &self.inner.config.stm, apply)?;
        self.sync_wait(rev, self.inner.config.sync.wait_timeout)?;
        Ok(rev)
    }

    /// Returns the sorted type names of caches referencing organization `org`.
    pub fn uses_org(&self, org: &str) -> Vec<String> {
        let mut used_by: Vec<String> = self
            .inner
            .all_caches()
            .iter()
            .filter(|cache| cache.uses_org(org))
            .map(|cache| cache.type_name().to_string())
            .collect();
        used_by.sort();
        used_by
    }

    /// Stops the sync thread and waits for it to exit.
    ///
    /// # Errors
    ///
    /// Returns the error the sync stopped with, if any.
    pub fn done(&self) -> StoreResult<()> {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(StoreError::unavailable("sync hub thread panicked"))),
            None => Ok(()),
        }
    }
}

impl Drop for SyncHub {
    fn drop(&mut self) {
        if let Err(err) = self.done() {
            debug!(error = %err, "sync hub ended with error");
        }
    }
}
