//! In-memory key-value backend.

use crate::backend::{KvEntry, KvRecord, KvStore, TxnRequest, TxnWrite};
use crate::error::{KvError, KvResult};
use crate::types::Revision;
use crate::watch::{WatchEvent, WatchStream};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct StoredValue {
    value: Vec<u8>,
    mod_revision: Revision,
    create_revision: Revision,
    version: u64,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    tx: Sender<WatchEvent>,
}

#[derive(Debug, Default)]
struct MemState {
    data: BTreeMap<String, StoredValue>,
    revision: Revision,
    watchers: Vec<Watcher>,
    closed: bool,
}

impl MemState {
    fn ensure_open(&self) -> KvResult<()> {
        if self.closed {
            Err(KvError::unavailable("store is closed"))
        } else {
            Ok(())
        }
    }

    fn mod_revision(&self, key: &str) -> Revision {
        self.data
            .get(key)
            .map(|v| v.mod_revision)
            .unwrap_or(Revision::ZERO)
    }

    fn bump(&mut self) -> Revision {
        self.revision = self.revision.next();
        self.revision
    }

    fn write(&mut self, key: &str, value: Vec<u8>, rev: Revision) -> WatchEvent {
        match self.data.get_mut(key) {
            Some(stored) => {
                stored.value = value.clone();
                stored.mod_revision = rev;
                stored.version += 1;
            }
            None => {
                self.data.insert(
                    key.to_string(),
                    StoredValue {
                        value: value.clone(),
                        mod_revision: rev,
                        create_revision: rev,
                        version: 1,
                    },
                );
            }
        }
        WatchEvent::put(key, value, rev)
    }

    fn remove(&mut self, key: &str, rev: Revision) -> Option<WatchEvent> {
        self.data
            .remove(key)
            .map(|_| WatchEvent::delete(key, rev))
    }

    /// Sends the events of one commit to matching watchers, dropping those
    /// whose receiver is gone.
    ///
    /// Each watcher sees its share of the commit with `more_events` set on
    /// every event but the last.
    fn publish(&mut self, events: &[WatchEvent]) {
        self.watchers.retain(|w| {
            let mut matching = events
                .iter()
                .filter(|e| e.key.starts_with(&w.prefix))
                .peekable();
            while let Some(event) = matching.next() {
                let event = event.clone().with_more_events(matching.peek().is_some());
                trace!(key = %event.key, rev = %event.revision, kind = ?event.kind, "watch event");
                if w.tx.send(event).is_err() {
                    return false;
                }
            }
            true
        });
    }
}

/// An in-memory, linearizable key-value store.
///
/// All operations are serialized under a single mutex, which makes the store
/// trivially linearizable. Watch events are sent while the mutex is held, so
/// subscribers observe commits in revision order.
///
/// Suitable for:
/// - Unit and integration tests
/// - Single-process deployments
///
/// # Example
///
/// ```rust
/// use edgesync_kv::{KvStore, MemoryKvStore, Revision};
///
/// let kv = MemoryKvStore::new();
/// let r1 = kv.put("Flavor/x1.small", b"a".to_vec()).unwrap();
/// let r2 = kv.update("Flavor/x1.small", b"b".to_vec(), r1).unwrap();
/// assert!(r2 > r1);
/// assert!(kv.update("Flavor/x1.small", b"c".to_vec(), r1).is_err());
/// ```
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    state: Mutex<MemState>,
}

impl MemoryKvStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    /// Returns true if the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Returns the number of live watch subscriptions.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Closes the store.
    ///
    /// Every later call fails with `Unavailable` and all watch streams are
    /// disconnected. Used to simulate losing the backend.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.watchers.clear();
        debug!("memory kv store closed");
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> KvResult<Option<KvEntry>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.data.get(key).map(|stored| KvEntry {
            value: stored.value.clone(),
            mod_revision: stored.mod_revision,
            create_revision: stored.create_revision,
            version: stored.version,
        }))
    }

    fn create(&self, key: &str, value: Vec<u8>) -> KvResult<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if state.data.contains_key(key) {
            return Err(KvError::already_exists(key));
        }
        let rev = state.bump();
        let event = state.write(key, value, rev);
        state.publish(&[event]);
        debug!(key, %rev, "created");
        Ok(rev)
    }

    fn update(&self, key: &str, value: Vec<u8>, expected: Revision) -> KvResult<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let current = match state.data.get(key) {
            Some(stored) => stored.mod_revision,
            None => return Err(KvError::not_found(key)),
        };
        if !expected.is_zero() && current != expected {
            return Err(KvError::conflict(format!(
                "key {key} is at {current}, expected {expected}"
            )));
        }
        let rev = state.bump();
        let event = state.write(key, value, rev);
        state.publish(&[event]);
        debug!(key, %rev, "updated");
        Ok(rev)
    }

    fn put(&self, key: &str, value: Vec<u8>) -> KvResult<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let rev = state.bump();
        let event = state.write(key, value, rev);
        state.publish(&[event]);
        debug!(key, %rev, "put");
        Ok(rev)
    }

    fn delete(&self, key: &str) -> KvResult<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if !state.data.contains_key(key) {
            return Err(KvError::not_found(key));
        }
        let rev = state.bump();
        if let Some(event) = state.remove(key, rev) {
            state.publish(&[event]);
        }
        debug!(key, %rev, "deleted");
        Ok(rev)
    }

    fn list(&self, prefix: &str) -> KvResult<Vec<KvRecord>> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| KvRecord {
                key: key.clone(),
                value: stored.value.clone(),
                mod_revision: stored.mod_revision,
            })
            .collect())
    }

    fn watch(&self, prefix: &str) -> KvResult<WatchStream> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        let snapshot: Vec<KvRecord> = state
            .data
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, stored)| KvRecord {
                key: key.clone(),
                value: stored.value.clone(),
                mod_revision: stored.mod_revision,
            })
            .collect();
        let (tx, rx) = mpsc::channel();
        state.watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        debug!(prefix, records = snapshot.len(), rev = %state.revision, "watch started");
        Ok(WatchStream::new(snapshot, state.revision, rx))
    }

    fn commit_txn(&self, txn: &TxnRequest) -> KvResult<Revision> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        if txn.writes.is_empty() {
            return Ok(state.revision);
        }

        for (key, observed) in &txn.reads {
            let current = state.mod_revision(key);
            if current != *observed {
                return Err(KvError::conflict(format!(
                    "read key {key} moved from {observed} to {current}"
                )));
            }
        }
        if let Some(snapshot) = txn.snapshot {
            for write in &txn.writes {
                if txn.reads.iter().any(|(key, _)| key == write.key()) {
                    continue;
                }
                let current = state.mod_revision(write.key());
                if current > snapshot {
                    return Err(KvError::conflict(format!(
                        "write key {} modified at {current} after snapshot {snapshot}",
                        write.key()
                    )));
                }
            }
        }

        let prev = state.revision;
        let rev = state.bump();
        let mut events = Vec::with_capacity(txn.writes.len());
        for write in &txn.writes {
            match write {
                TxnWrite::Put { key, value } => {
                    events.push(state.write(key, value.clone(), rev));
                }
                TxnWrite::Delete { key } => events.extend(state.remove(key, rev)),
            }
        }
        // Deletes of absent keys change nothing and take no revision.
        if events.is_empty() {
            state.revision = prev;
            return Ok(prev);
        }
        state.publish(&events);
        debug!(writes = events.len(), %rev, "transaction committed");
        Ok(rev)
    }

    fn current_revision(&self) -> KvResult<Revision> {
        let state = self.state.lock();
        state.ensure_open()?;
        Ok(state.revision)
    }
}
