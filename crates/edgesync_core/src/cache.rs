//! In-memory entity cache fed by a sync.
//!
//! The cache is the read side of the store: API handlers read it, and only
//! the sync thread writes it. All state lives in one `SyncedState` behind
//! one mutex, paired with a condvar that is broadcast on every revision
//! change so callers can wait for their own writes to arrive.
//!
//! Callbacks and key watchers always run after the mutex is released, so
//! they may freely read the cache.

use crate::error::{StoreError, StoreResult};
use crate::object::Entity;
use crate::sync::{decode_event, decode_record, Cacher, SyncEvent};
use edgesync_kv::{KvRecord, Revision, WatchEvent};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A cached object and the revision of its last change.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
    /// The object.
    pub value: T,
    /// Revision of the change that produced `value`.
    pub revision: Revision,
}

type UpdatedCb<T> = Arc<dyn Fn(Option<&T>, &T) + Send + Sync>;
type DeletedCb<T> = Arc<dyn Fn(&T) + Send + Sync>;
type KeyCb<K> = Arc<dyn Fn(&K) + Send + Sync>;

struct KeyWatcher<K> {
    id: u64,
    cb: KeyCb<K>,
}

struct SyncedState<T: Entity> {
    objs: HashMap<T::Key, CacheEntry<T>>,
    revision: Revision,
    /// Keys seen since `ListStart`, while a list replay is in progress.
    list: Option<HashSet<T::Key>>,
    init_done: bool,
    sync_stopped: bool,
    watchers: HashMap<T::Key, Vec<KeyWatcher<T::Key>>>,
    next_watch_id: u64,
}

impl<T: Entity> SyncedState<T> {
    fn new() -> Self {
        Self {
            objs: HashMap::new(),
            revision: Revision::ZERO,
            list: None,
            init_done: false,
            sync_stopped: false,
            watchers: HashMap::new(),
            next_watch_id: 0,
        }
    }

    fn advance(&mut self, rev: Revision) {
        if rev > self.revision {
            self.revision = rev;
        }
    }

    fn key_callbacks(&self, key: &T::Key) -> Vec<KeyCb<T::Key>> {
        self.watchers
            .get(key)
            .map(|ws| ws.iter().map(|w| Arc::clone(&w.cb)).collect())
            .unwrap_or_default()
    }
}

struct Inner<T: Entity> {
    state: Mutex<SyncedState<T>>,
    cond: Condvar,
    updated_cb: RwLock<Option<UpdatedCb<T>>>,
    deleted_cb: RwLock<Option<DeletedCb<T>>>,
}

/// Notifications collected under the lock and fired after it is released.
struct Pending<T: Entity> {
    updated: Vec<(Option<T>, T, Vec<KeyCb<T::Key>>)>,
    deleted: Vec<(T, Vec<KeyCb<T::Key>>)>,
}

impl<T: Entity> Pending<T> {
    fn new() -> Self {
        Self {
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

/// A synchronized in-memory copy of every object of one entity type.
///
/// Cloning is cheap; clones share the same cache.
///
/// # Example
///
/// ```rust
/// use edgesync_core::entities::{Flavor, FlavorKey};
/// use edgesync_core::EntityCache;
/// use edgesync_kv::Revision;
/// use std::time::Duration;
///
/// let cache = EntityCache::<Flavor>::new();
/// let flavor = Flavor { key: FlavorKey { name: "x1".into() }, ..Flavor::default() };
/// cache.apply_update(flavor.clone(), Revision::new(3));
///
/// cache.wait_for_revision(Revision::new(3), Duration::from_secs(1)).unwrap();
/// assert_eq!(cache.get(&flavor.key), Some(flavor));
/// ```
pub struct EntityCache<T: Entity> {
    inner: Arc<Inner<T>>,
}

impl<T: Entity> Clone for EntityCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Entity> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityCache<T> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SyncedState::new()),
                cond: Condvar::new(),
                updated_cb: RwLock::new(None),
                deleted_cb: RwLock::new(None),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncedState<T>> {
        self.inner.state.lock()
    }

    /// Returns a copy of the object with `key`.
    pub fn get(&self, key: &T::Key) -> Option<T> {
        self.lock().objs.get(key).map(|e| e.value.clone())
    }

    /// Returns a copy of the entry with `key`, including its revision.
    pub fn get_entry(&self, key: &T::Key) -> Option<CacheEntry<T>> {
        self.lock().objs.get(key).cloned()
    }

    /// Returns true if an object with `key` is cached.
    pub fn has_key(&self, key: &T::Key) -> bool {
        self.lock().objs.contains_key(key)
    }

    /// Returns every cached key, sorted.
    pub fn keys(&self) -> Vec<T::Key> {
        let mut keys: Vec<T::Key> = self.lock().objs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Adds every cached key to `out`.
    pub fn get_all_keys(&self, out: &mut HashSet<T::Key>) {
        out.extend(self.lock().objs.keys().cloned());
    }

    /// Returns the number of cached objects.
    pub fn count(&self) -> usize {
        self.lock().objs.len()
    }

    /// Returns the revision of the last change applied.
    pub fn revision(&self) -> Revision {
        self.lock().revision
    }

    /// Returns true once the first list replay has finished.
    pub fn is_init_done(&self) -> bool {
        self.lock().init_done
    }

    /// Calls `cb` with every object matching `filter`, in key order.
    ///
    /// `cb` runs on a snapshot taken under the lock, so it may read the
    /// cache. Stops at the first error.
    ///
    /// # Errors
    ///
    /// Returns the error returned by `cb`.
    pub fn show<F>(&self, filter: &T, mut cb: F) -> StoreResult<()>
    where
        F: FnMut(&T) -> StoreResult<()>,
    {
        let mut matched: Vec<T> = self
            .lock()
            .objs
            .values()
            .filter(|e| e.value.matches(filter))
            .map(|e| e.value.clone())
            .collect();
        matched.sort_by(|a, b| a.key().cmp(b.key()));
        for obj in &matched {
            cb(obj)?;
        }
        Ok(())
    }

    /// Stores `obj` as of `rev`.
    pub fn apply_update(&self, obj: T, rev: Revision) {
        let key = obj.key().clone();
        self.apply_update_with(&key, rev, move |_| Some(obj));
    }

    /// Stores the value produced by `modify` from the current value.
    ///
    /// `modify` runs under the lock. Returning `None` means "unchanged" and
    /// skips the write entirely, including the revision bump and callbacks.
    pub fn apply_update_with<F>(&self, key: &T::Key, rev: Revision, modify: F)
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            if !Self::update_locked(&mut state, key, rev, modify, &mut pending) {
                return;
            }
            state.advance(rev);
            self.inner.cond.notify_all();
        }
        self.fire(pending);
    }

    fn update_locked<F>(
        state: &mut SyncedState<T>,
        key: &T::Key,
        rev: Revision,
        modify: F,
        pending: &mut Pending<T>,
    ) -> bool
    where
        F: FnOnce(Option<&T>) -> Option<T>,
    {
        let old = state.objs.get(key).map(|e| e.value.clone());
        let Some(mut new) = modify(old.as_ref()) else {
            return false;
        };
        if new.key() != key {
            new.set_key(key.clone());
        }
        new.clear_fields();
        state.objs.insert(
            key.clone(),
            CacheEntry {
                value: new.clone(),
                revision: rev,
            },
        );
        pending
            .updated
            .push((old, new, state.key_callbacks(key)));
        true
    }

    fn remove_locked(state: &mut SyncedState<T>, key: &T::Key, pending: &mut Pending<T>) {
        if let Some(old) = state.objs.remove(key) {
            let cbs = state.key_callbacks(key);
            pending.deleted.push((old.value, cbs));
        }
    }

    /// Removes the object with `key` as of `rev`.
    pub fn apply_delete(&self, key: &T::Key, rev: Revision) {
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            Self::remove_locked(&mut state, key, &mut pending);
            state.advance(rev);
            self.inner.cond.notify_all();
        }
        self.fire(pending);
    }

    /// Applies the live changes of one commit as a unit.
    ///
    /// Every change is stored before the revision moves, so a revision
    /// waiter never sees part of a commit. Callbacks fire afterwards, in
    /// order. List events have no place in a commit and are ignored.
    pub fn apply_commit(&self, events: Vec<SyncEvent<T>>) {
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            let mut last = None;
            for event in events {
                match event {
                    SyncEvent::Update { obj, rev } => {
                        let key = obj.key().clone();
                        let store = move |_: Option<&T>| Some(obj);
                        Self::update_locked(&mut state, &key, rev, store, &mut pending);
                        last = Some(rev);
                    }
                    SyncEvent::Delete { key, rev } => {
                        Self::remove_locked(&mut state, &key, &mut pending);
                        last = Some(rev);
                    }
                    SyncEvent::RevOnly { rev } => last = Some(rev),
                    SyncEvent::ListStart | SyncEvent::List { .. } | SyncEvent::ListEnd { .. } => {
                        warn!(type_name = T::TYPE_NAME, "list event inside a commit ignored");
                    }
                }
            }
            let Some(rev) = last else {
                return;
            };
            state.advance(rev);
            self.inner.cond.notify_all();
        }
        self.fire(pending);
    }

    /// Starts a list replay.
    pub fn apply_list_start(&self) {
        let mut state = self.lock();
        state.list = Some(HashSet::new());
        state.sync_stopped = false;
    }

    /// Stores a listed object and marks its key as seen.
    ///
    /// The cache revision moves only at [`EntityCache::apply_list_end`].
    pub fn apply_list(&self, obj: T, rev: Revision) {
        let key = obj.key().clone();
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            if let Some(list) = state.list.as_mut() {
                list.insert(key.clone());
            }
            Self::update_locked(&mut state, &key, rev, move |_| Some(obj), &mut pending);
        }
        self.fire(pending);
    }

    /// Finishes a list replay, pruning every object not listed since
    /// [`EntityCache::apply_list_start`].
    pub fn apply_list_end(&self, rev: Revision) {
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            if let Some(seen) = state.list.take() {
                Self::prune_locked(&mut state, &seen, &mut pending);
            }
            state.advance(rev);
            if !state.init_done {
                debug!(type_name = T::TYPE_NAME, %rev, "initial sync done");
            }
            state.init_done = true;
            self.inner.cond.notify_all();
        }
        self.fire(pending);
    }

    /// Advances the revision without changing any object.
    pub fn apply_rev_only(&self, rev: Revision) {
        let mut state = self.lock();
        state.advance(rev);
        self.inner.cond.notify_all();
    }

    /// Removes every object whose key is not in `valid`.
    ///
    /// Fires delete notifications for each removed object. The revision is
    /// left unchanged.
    pub fn prune(&self, valid: &HashSet<T::Key>) {
        let mut pending = Pending::new();
        {
            let mut state = self.lock();
            Self::prune_locked(&mut state, valid, &mut pending);
        }
        self.fire(pending);
    }

    fn prune_locked(state: &mut SyncedState<T>, valid: &HashSet<T::Key>, pending: &mut Pending<T>) {
        let stale: Vec<T::Key> = state
            .objs
            .keys()
            .filter(|k| !valid.contains(*k))
            .cloned()
            .collect();
        if stale.is_empty() {
            return;
        }
        info!(type_name = T::TYPE_NAME, count = stale.len(), "pruning stale objects");
        for key in stale {
            Self::remove_locked(state, &key, pending);
        }
    }

    /// Marks the sync feeding this cache as stopped.
    ///
    /// Pending and future revision waits fail with `Unavailable` until the
    /// next list replay starts.
    pub fn mark_sync_stopped(&self) {
        let mut state = self.lock();
        state.sync_stopped = true;
        self.inner.cond.notify_all();
        debug!(type_name = T::TYPE_NAME, "cache sync stopped");
    }

    /// Blocks until the cache has applied revision `rev`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` elapses first and `Unavailable` if the
    /// sync stops while waiting.
    pub fn wait_for_revision(&self, rev: Revision, timeout: Duration) -> StoreResult<()> {
        self.wait_until(timeout, |state| state.revision >= rev)
            .map_err(|err| match err {
                StoreError::Timeout { .. } => {
                    StoreError::timeout(format!("{} cache waiting for {rev}", T::TYPE_NAME))
                }
                other => other,
            })
    }

    /// Blocks until the first list replay has finished.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if `timeout` elapses first and `Unavailable` if the
    /// sync stops while waiting.
    pub fn wait_initial_sync_done(&self, timeout: Duration) -> StoreResult<()> {
        self.wait_until(timeout, |state| state.init_done)
            .map_err(|err| match err {
                StoreError::Timeout { .. } => StoreError::timeout(format!(
                    "{} cache waiting for initial sync",
                    T::TYPE_NAME
                )),
                other => other,
            })
    }

    fn wait_until<P>(&self, timeout: Duration, done: P) -> StoreResult<()>
    where
        P: Fn(&SyncedState<T>) -> bool,
    {
        // A timeout too large for an `Instant` means no deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if done(&state) {
                return Ok(());
            }
            if state.sync_stopped {
                return Err(StoreError::unavailable(format!(
                    "{} sync stopped",
                    T::TYPE_NAME
                )));
            }
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut state, deadline).timed_out() {
                        if done(&state) {
                            return Ok(());
                        }
                        return Err(StoreError::timeout(T::TYPE_NAME));
                    }
                }
                None => self.inner.cond.wait(&mut state),
            }
        }
    }

    /// Registers `cb` to run after every change to the object with `key`.
    ///
    /// The watcher stays registered until [`WatchHandle::cancel`] is called.
    pub fn watch_key<F>(&self, key: &T::Key, cb: F) -> WatchHandle<T>
    where
        F: Fn(&T::Key) + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = state.next_watch_id;
        state.next_watch_id += 1;
        state
            .watchers
            .entry(key.clone())
            .or_default()
            .push(KeyWatcher {
                id,
                cb: Arc::new(cb),
            });
        WatchHandle {
            inner: Arc::downgrade(&self.inner),
            key: key.clone(),
            id,
        }
    }

    /// Returns the number of watchers registered on `key`.
    pub fn watcher_count(&self, key: &T::Key) -> usize {
        self.lock().watchers.get(key).map_or(0, Vec::len)
    }

    /// Sets the callback run after every stored update.
    ///
    /// The callback receives the previous value, if any, and the new one.
    pub fn set_updated_cb<F>(&self, cb: F)
    where
        F: Fn(Option<&T>, &T) + Send + Sync + 'static,
    {
        *self.inner.updated_cb.write() = Some(Arc::new(cb));
    }

    /// Sets the callback run after every removed object.
    pub fn set_deleted_cb<F>(&self, cb: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        *self.inner.deleted_cb.write() = Some(Arc::new(cb));
    }

    /// Returns true if any cached object references organization `org`.
    pub fn uses_org(&self, org: &str) -> bool {
        self.lock().objs.values().any(|e| e.value.uses_org(org))
    }

    fn fire(&self, pending: Pending<T>) {
        let updated_cb = self.inner.updated_cb.read().clone();
        let deleted_cb = self.inner.deleted_cb.read().clone();

        for (old, new, key_cbs) in pending.updated {
            if let Some(cb) = &updated_cb {
                cb(old.as_ref(), &new);
            }
            for cb in key_cbs {
                cb(new.key());
            }
        }
        for (old, key_cbs) in pending.deleted {
            if let Some(cb) = &deleted_cb {
                cb(&old);
            }
            for cb in key_cbs {
                cb(old.key());
            }
        }
    }
}

impl<T: Entity> Cacher<T> for EntityCache<T> {
    fn apply(&self, event: SyncEvent<T>) {
        match event {
            SyncEvent::ListStart => self.apply_list_start(),
            SyncEvent::List { obj, rev } => self.apply_list(obj, rev),
            SyncEvent::ListEnd { rev } => self.apply_list_end(rev),
            SyncEvent::Update { obj, rev } => self.apply_update(obj, rev),
            SyncEvent::Delete { key, rev } => self.apply_delete(&key, rev),
            SyncEvent::RevOnly { rev } => self.apply_rev_only(rev),
        }
    }

    fn apply_commit(&self, events: Vec<SyncEvent<T>>) {
        EntityCache::apply_commit(self, events);
    }

    fn sync_stopped(&self) {
        self.mark_sync_stopped();
    }
}

/// A type-erased cache fed raw watch traffic by a [`SyncHub`](crate::SyncHub).
pub trait SyncedCache: Send + Sync {
    /// Type name whose store keys this cache accepts.
    fn type_name(&self) -> &'static str;

    /// Starts a list replay.
    fn sync_list_start(&self);

    /// Decodes and stores a listed record. Corrupt records are skipped.
    fn sync_list_record(&self, record: &KvRecord, rev: Revision);

    /// Finishes a list replay.
    fn sync_list_end(&self, rev: Revision);

    /// Decodes and applies the events of one commit as a unit.
    fn sync_commit(&self, events: &[&WatchEvent]);

    /// Called when the feeding sync exits.
    fn sync_stopped(&self);

    /// Returns true if any cached object references organization `org`.
    fn uses_org(&self, org: &str) -> bool;
}

impl<T: Entity> SyncedCache for EntityCache<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn sync_list_start(&self) {
        self.apply_list_start();
    }

    fn sync_list_record(&self, record: &KvRecord, rev: Revision) {
        match decode_record::<T>(record) {
            Ok(obj) => self.apply_list(obj, rev),
            Err(err) => warn!(key = %record.key, error = %err, "skipping corrupt record"),
        }
    }

    fn sync_list_end(&self, rev: Revision) {
        self.apply_list_end(rev);
    }

    fn sync_commit(&self, events: &[&WatchEvent]) {
        self.apply_commit(events.iter().map(|event| decode_event::<T>(event)).collect());
    }

    fn sync_stopped(&self) {
        self.mark_sync_stopped();
    }

    fn uses_org(&self, org: &str) -> bool {
        EntityCache::uses_org(self, org)
    }
}

/// Handle to a key watcher registered with [`EntityCache::watch_key`].
pub struct WatchHandle<T: Entity> {
    inner: Weak<Inner<T>>,
    key: T::Key,
    id: u64,
}

impl<T: Entity> WatchHandle<T> {
    /// Returns the watched key.
    pub fn key(&self) -> &T::Key {
        &self.key
    }

    /// Removes the watcher. Does nothing if the cache is gone.
    pub fn cancel(self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut state = inner.state.lock();
        if let Some(list) = state.watchers.get_mut(&self.key) {
            if let Some(idx) = list.iter().position(|w| w.id == self.id) {
                list.swap_remove(idx);
            }
            if list.is_empty() {
                state.watchers.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Flavor, FlavorKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn key(name: &str) -> FlavorKey {
        FlavorKey { name: name.into() }
    }

    fn flavor(name: &str, ram: u64) -> Flavor {
        Flavor {
            key: key(name),
            ram,
            ..Flavor::default()
        }
    }

    #[test]
    fn update_and_get() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("a", 1), Revision::new(2));
        assert_eq!(cache.get(&key("a")).unwrap().ram, 1);
        assert_eq!(cache.revision(), Revision::new(2));
        assert_eq!(cache.get_entry(&key("a")).unwrap().revision, Revision::new(2));
        assert!(cache.has_key(&key("a")));
        assert!(!cache.has_key(&key("b")));
        assert_eq!(cache.count(), 1);
    }

    #[test]
    fn unchanged_modify_is_skipped() {
        let cache = EntityCache::<Flavor>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let calls = Arc::clone(&calls);
            cache.set_updated_cb(move |_, _| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        cache.apply_update(flavor("a", 1), Revision::new(2));
        cache.apply_update_with(&key("a"), Revision::new(3), |_| None);

        assert_eq!(cache.revision(), Revision::new(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn modify_sees_old_value() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("a", 1), Revision::new(2));
        cache.apply_update_with(&key("a"), Revision::new(3), |old| {
            let mut new = old.cloned().unwrap_or_default();
            new.ram += 10;
            Some(new)
        });
        assert_eq!(cache.get(&key("a")).unwrap().ram, 11);
    }

    #[test]
    fn updated_cb_receives_old_and_new() {
        let cache = EntityCache::<Flavor>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            cache.set_updated_cb(move |old, new| {
                seen.lock().push((old.map(|o| o.ram), new.ram));
            });
        }
        cache.apply_update(flavor("a", 1), Revision::new(2));
        cache.apply_update(flavor("a", 5), Revision::new(3));
        assert_eq!(*seen.lock(), vec![(None, 1), (Some(1), 5)]);
    }

    #[test]
    fn delete_fires_callbacks_once() {
        let cache = EntityCache::<Flavor>::new();
        let deleted = Arc::new(AtomicUsize::new(0));
        {
            let deleted = Arc::clone(&deleted);
            cache.set_deleted_cb(move |_| {
                deleted.fetch_add(1, Ordering::SeqCst);
            });
        }
        cache.apply_update(flavor("a", 1), Revision::new(2));
        cache.apply_delete(&key("a"), Revision::new(3));
        cache.apply_delete(&key("a"), Revision::new(4));

        assert_eq!(deleted.load(Ordering::SeqCst), 1);
        assert!(cache.get(&key("a")).is_none());
        assert_eq!(cache.revision(), Revision::new(4));
    }

    #[test]
    fn list_end_prunes_unlisted() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("stale", 1), Revision::new(1));
        cache.apply_update(flavor("kept", 1), Revision::new(2));
        let pruned = Arc::new(Mutex::new(Vec::new()));
        {
            let pruned = Arc::clone(&pruned);
            cache.set_deleted_cb(move |obj| pruned.lock().push(obj.key.name.clone()));
        }

        cache.apply_list_start();
        cache.apply_list(flavor("kept", 2), Revision::new(10));
        cache.apply_list(flavor("new", 3), Revision::new(10));
        assert_eq!(cache.revision(), Revision::new(2));
        cache.apply_list_end(Revision::new(10));

        assert_eq!(cache.keys(), vec![key("kept"), key("new")]);
        assert_eq!(*pruned.lock(), vec!["stale".to_string()]);
        assert!(cache.is_init_done());
        assert_eq!(cache.revision(), Revision::new(10));
    }

    #[test]
    fn explicit_prune_keeps_revision() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("a", 1), Revision::new(1));
        cache.apply_update(flavor("b", 1), Revision::new(2));
        let valid: HashSet<FlavorKey> = [key("b")].into_iter().collect();
        cache.prune(&valid);

        assert_eq!(cache.keys(), vec![key("b")]);
        assert_eq!(cache.revision(), Revision::new(2));
    }

    #[test]
    fn rev_only_advances_revision() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_rev_only(Revision::new(9));
        assert_eq!(cache.revision(), Revision::new(9));
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn wait_for_revision_wakes_on_update() {
        let cache = EntityCache::<Flavor>::new();
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cache.apply_update(flavor("a", 1), Revision::new(5));
            })
        };
        cache
            .wait_for_revision(Revision::new(5), Duration::from_secs(5))
            .unwrap();
        assert!(cache.has_key(&key("a")));
        writer.join().unwrap();
    }

    #[test]
    fn unbounded_wait_does_not_overflow() {
        let cache = EntityCache::<Flavor>::new();
        let writer = {
            let cache = cache.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cache.apply_update(flavor("a", 1), Revision::new(5));
            })
        };
        cache
            .wait_for_revision(Revision::new(5), Duration::MAX)
            .unwrap();
        writer.join().unwrap();

        cache.apply_list_end(Revision::new(6));
        cache.wait_initial_sync_done(Duration::MAX).unwrap();
    }

    #[test]
    fn commit_is_stored_before_revision_moves() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("c", 1), Revision::new(2));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        {
            let reader = cache.clone();
            let seen_b = Arc::clone(&seen_b);
            cache.set_updated_cb(move |_, new| {
                seen_b.lock().push((new.key.name.clone(), reader.has_key(&key("b"))));
            });
        }

        let waiter = {
            let cache = cache.clone();
            thread::spawn(move || {
                cache
                    .wait_for_revision(Revision::new(5), Duration::from_secs(5))
                    .unwrap();
                (cache.has_key(&key("a")), cache.has_key(&key("b")), cache.has_key(&key("c")))
            })
        };
        cache.apply_commit(vec![
            SyncEvent::Update {
                obj: flavor("a", 1),
                rev: Revision::new(5),
            },
            SyncEvent::Delete {
                key: key("c"),
                rev: Revision::new(5),
            },
            SyncEvent::Update {
                obj: flavor("b", 2),
                rev: Revision::new(5),
            },
        ]);

        assert_eq!(waiter.join().unwrap(), (true, true, false));
        assert_eq!(cache.revision(), Revision::new(5));
        assert_eq!(
            *seen_b.lock(),
            vec![("a".to_string(), true), ("b".to_string(), true)]
        );
    }

    #[test]
    fn empty_commit_keeps_revision() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("a", 1), Revision::new(2));
        cache.apply_commit(Vec::new());
        assert_eq!(cache.revision(), Revision::new(2));
    }

    #[test]
    fn wait_for_revision_times_out() {
        let cache = EntityCache::<Flavor>::new();
        let result = cache.wait_for_revision(Revision::new(5), Duration::from_millis(20));
        assert!(matches!(result, Err(StoreError::Timeout { .. })));
    }

    #[test]
    fn wait_fails_after_sync_stopped() {
        let cache = EntityCache::<Flavor>::new();
        cache.mark_sync_stopped();
        assert!(matches!(
            cache.wait_initial_sync_done(Duration::from_secs(1)),
            Err(StoreError::Unavailable { .. })
        ));

        cache.apply_list_start();
        cache.apply_list_end(Revision::new(1));
        cache
            .wait_initial_sync_done(Duration::from_millis(10))
            .unwrap();
    }

    #[test]
    fn key_watcher_fires_until_cancelled() {
        let cache = EntityCache::<Flavor>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = Arc::clone(&hits);
            cache.watch_key(&key("a"), move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        let other = cache.watch_key(&key("a"), |_| {});
        assert_eq!(cache.watcher_count(&key("a")), 2);

        cache.apply_update(flavor("a", 1), Revision::new(1));
        cache.apply_update(flavor("b", 1), Revision::new(2));
        cache.apply_delete(&key("a"), Revision::new(3));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        handle.cancel();
        assert_eq!(cache.watcher_count(&key("a")), 1);
        cache.apply_update(flavor("a", 2), Revision::new(4));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        other.cancel();
        assert_eq!(cache.watcher_count(&key("a")), 0);
    }

    #[test]
    fn callbacks_may_read_the_cache() {
        let cache = EntityCache::<Flavor>::new();
        let observed = Arc::new(AtomicUsize::new(0));
        {
            let reader = cache.clone();
            let observed = Arc::clone(&observed);
            cache.set_updated_cb(move |_, new| {
                if reader.get(new.key()).is_some() {
                    observed.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        cache.apply_update(flavor("a", 1), Revision::new(1));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn show_filters_and_sorts() {
        let cache = EntityCache::<Flavor>::new();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            cache.apply_update(flavor(name, 1), Revision::new(i as u64 + 1));
        }

        let mut all = Vec::new();
        cache
            .show(&Flavor::default(), |f| {
                all.push(f.key.name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let mut one = Vec::new();
        cache
            .show(&flavor("b", 0), |f| {
                one.push(f.key.name.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(one, vec!["b"]);

        let mut visited = 0;
        let result = cache.show(&Flavor::default(), |_| {
            visited += 1;
            Err(StoreError::Cancelled)
        });
        assert_eq!(result, Err(StoreError::Cancelled));
        assert_eq!(visited, 1);
    }

    #[test]
    fn get_all_keys_merges() {
        let cache = EntityCache::<Flavor>::new();
        cache.apply_update(flavor("a", 1), Revision::new(1));
        let mut keys = HashSet::new();
        keys.insert(key("z"));
        cache.get_all_keys(&mut keys);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn stored_objects_have_no_fields() {
        let cache = EntityCache::<Flavor>::new();
        let mut obj = flavor("a", 1);
        obj.fields = vec![Flavor::FIELD_RAM.to_string()];
        cache.apply_update(obj, Revision::new(1));
        assert!(cache.get(&key("a")).unwrap().fields.is_empty());
    }
}
