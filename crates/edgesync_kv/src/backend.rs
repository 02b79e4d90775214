//! Key-value backend trait definition.

use crate::error::KvResult;
use crate::types::Revision;
use crate::watch::WatchStream;

/// A stored value together with its revision metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    /// The stored bytes.
    pub value: Vec<u8>,
    /// Revision of the last write to this key.
    pub mod_revision: Revision,
    /// Revision at which this key was created.
    pub create_revision: Revision,
    /// Number of writes since creation (starts at 1).
    pub version: u64,
}

/// A key and its value as returned by `list` and watch snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvRecord {
    /// The full key.
    pub key: String,
    /// The stored bytes.
    pub value: Vec<u8>,
    /// Revision of the last write to this key.
    pub mod_revision: Revision,
}

/// A buffered write inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnWrite {
    /// Insert or overwrite a key.
    Put {
        /// Target key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// Remove a key. Removing an absent key is a no-op.
    Delete {
        /// Target key.
        key: String,
    },
}

impl TxnWrite {
    /// Returns the key this write targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            TxnWrite::Put { key, .. } | TxnWrite::Delete { key } => key,
        }
    }
}

/// A conditional multi-key commit.
///
/// The commit succeeds iff every key in `reads` still has the observed
/// mod revision (`Revision::ZERO` for "absent"), and, when `snapshot` is
/// set, no key in `writes` that is not also in `reads` was modified after
/// that revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxnRequest {
    /// Keys read by the transaction and the mod revision observed.
    pub reads: Vec<(String, Revision)>,
    /// Store revision at the time of the first read.
    pub snapshot: Option<Revision>,
    /// Writes to apply atomically, in order.
    pub writes: Vec<TxnWrite>,
}

/// A revisioned key-value store.
///
/// # Invariants
///
/// - Every successful mutation returns a revision strictly greater than any
///   previously returned revision
/// - All writes of one `commit_txn` share one revision
/// - `watch` delivers a snapshot consistent with its revision, then every
///   later change under the prefix in commit order
/// - The watch events of one commit are consecutive, and only the last of
///   them has `more_events` unset
/// - Implementations must be `Send + Sync`
pub trait KvStore: Send + Sync {
    /// Reads a key.
    ///
    /// Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached.
    fn get(&self, key: &str) -> KvResult<Option<KvEntry>>;

    /// Creates a key.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the key is present.
    fn create(&self, key: &str, value: Vec<u8>) -> KvResult<Revision>;

    /// Overwrites an existing key if its mod revision equals `expected`.
    ///
    /// Passing `Revision::ZERO` skips the revision check.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent and `Conflict` if the key was
    /// modified since `expected`.
    fn update(&self, key: &str, value: Vec<u8>, expected: Revision) -> KvResult<Revision>;

    /// Writes a key unconditionally.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached.
    fn put(&self, key: &str, value: Vec<u8>) -> KvResult<Revision>;

    /// Deletes a key.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the key is absent.
    fn delete(&self, key: &str) -> KvResult<Revision>;

    /// Lists all records whose key starts with `prefix`, in key order.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached.
    fn list(&self, prefix: &str) -> KvResult<Vec<KvRecord>>;

    /// Subscribes to all changes under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached.
    fn watch(&self, prefix: &str) -> KvResult<WatchStream>;

    /// Commits a conditional transaction.
    ///
    /// A transaction with no writes, or whose writes only delete absent
    /// keys, commits nothing and returns the current revision.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a read key changed or a blind-written key moved
    /// past the snapshot revision.
    fn commit_txn(&self, txn: &TxnRequest) -> KvResult<Revision>;

    /// Returns the latest committed revision.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the backend cannot be reached.
    fn current_revision(&self) -> KvResult<Revision>;
}
