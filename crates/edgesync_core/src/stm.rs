//! Optimistic software transactional memory over a [`KvStore`].
//!
//! A transaction is a closure run against an [`Stm`] handle. Reads go
//! through to the store and record the revision they observed; writes are
//! buffered. At the end of the closure the buffered writes are submitted as
//! one conditional commit that succeeds only if nothing read has moved. On
//! conflict the whole closure runs again from scratch.
//!
//! Because the closure may run several times, it must not have side effects
//! outside the handle.

use crate::config::RetryConfig;
use crate::error::{StoreError, StoreResult};
use edgesync_kv::{KvError, KvStore, Revision, TxnRequest, TxnWrite};
use std::collections::{BTreeMap, HashMap};
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct ReadEntry {
    value: Option<Vec<u8>>,
    revision: Revision,
}

/// The handle a transaction closure reads and writes through.
pub struct Stm<'a> {
    kv: &'a dyn KvStore,
    snapshot: Revision,
    reads: HashMap<String, ReadEntry>,
    /// `None` marks a delete.
    writes: BTreeMap<String, Option<Vec<u8>>>,
}

impl<'a> Stm<'a> {
    /// Starts a transaction at the store's current revision.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn begin(kv: &'a dyn KvStore) -> StoreResult<Self> {
        Ok(Self {
            kv,
            snapshot: kv.current_revision()?,
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        })
    }

    /// Reads a key.
    ///
    /// Buffered writes are visible to later reads in the same transaction.
    /// The first store read of a key records its revision for the commit
    /// check; later reads return the recorded value.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        if let Some(read) = self.reads.get(key) {
            return Ok(read.value.clone());
        }
        let entry = self.kv.get(key)?;
        let read = match entry {
            Some(entry) => ReadEntry {
                value: Some(entry.value),
                revision: entry.mod_revision,
            },
            None => ReadEntry {
                value: None,
                revision: Revision::ZERO,
            },
        };
        let value = read.value.clone();
        self.reads.insert(key.to_string(), read);
        Ok(value)
    }

    /// Returns the mod revision observed for `key`.
    ///
    /// Returns zero if the key was not read or was absent.
    #[must_use]
    pub fn rev(&self, key: &str) -> Revision {
        self.reads
            .get(key)
            .map(|read| read.revision)
            .unwrap_or(Revision::ZERO)
    }

    /// Buffers a write.
    pub fn put(&mut self, key: impl Into<String>, value: Vec<u8>) {
        self.writes.insert(key.into(), Some(value));
    }

    /// Buffers a delete.
    pub fn del(&mut self, key: impl Into<String>) {
        self.writes.insert(key.into(), None);
    }

    /// Returns the revision the transaction started at.
    #[must_use]
    pub fn snapshot(&self) -> Revision {
        self.snapshot
    }

    fn into_txn(self) -> TxnRequest {
        TxnRequest {
            reads: self
                .reads
                .into_iter()
                .map(|(key, read)| (key, read.revision))
                .collect(),
            snapshot: Some(self.snapshot),
            writes: self
                .writes
                .into_iter()
                .map(|(key, value)| match value {
                    Some(value) => TxnWrite::Put { key, value },
                    None => TxnWrite::Delete { key },
                })
                .collect(),
        }
    }
}

/// Runs `apply` as an optimistic transaction, retrying on conflict.
///
/// Returns the commit revision, or the current revision if the buffered
/// writes change nothing. Errors returned by `apply` abort without retry.
///
/// # Errors
///
/// Returns `Conflict` once `retry.attempts()` attempts have all conflicted,
/// or whatever `apply` or the store returned.
pub fn apply_stm<F>(kv: &dyn KvStore, retry: &RetryConfig, mut apply: F) -> StoreResult<Revision>
where
    F: FnMut(&mut Stm<'_>) -> StoreResult<()>,
{
    let attempts = retry.attempts();
    let mut last_conflict = String::new();

    for attempt in 0..attempts {
        let delay = retry.delay_for_attempt(attempt);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let mut stm = Stm::begin(kv)?;
        apply(&mut stm)?;

        match kv.commit_txn(&stm.into_txn()) {
            Ok(rev) => return Ok(rev),
            Err(KvError::Conflict { message }) => {
                debug!(attempt, %message, "stm conflict, retrying");
                last_conflict = message;
            }
            Err(err) => return Err(err.into()),
        }
    }

    warn!(attempts, conflict = %last_conflict, "stm gave up");
    Err(StoreError::conflict(format!(
        "transaction failed after {attempts} attempts: {last_conflict}"
    )))
}
