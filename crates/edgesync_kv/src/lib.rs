//! # EdgeSync KV
//!
//! Key-value backend abstraction for EdgeSync.
//!
//! This crate is the lowest layer of the stack. Backends are revisioned
//! byte stores with string keys: every committed write is assigned a
//! store-wide [`Revision`], and a prefix watch replays a consistent
//! snapshot followed by every later change in commit order.
//!
//! ## Design Principles
//!
//! - Backends do not interpret values
//! - Every write advances one global revision counter
//! - Watches never skip or reorder events
//! - Transactions are optimistic: commit fails if a read key moved
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Backends
//!
//! - [`MemoryKvStore`] - linearizable in-process store for tests and embedding
//!
//! ## Example
//!
//! ```rust
//! use edgesync_kv::{KvStore, MemoryKvStore};
//!
//! let kv = MemoryKvStore::new();
//! let rev = kv.create("App/a", b"hello".to_vec()).unwrap();
//! let entry = kv.get("App/a").unwrap().unwrap();
//! assert_eq!(entry.value, b"hello");
//! assert_eq!(entry.mod_revision, rev);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod memory;
mod types;
mod watch;

pub use backend::{KvEntry, KvRecord, KvStore, TxnRequest, TxnWrite};
pub use error::{KvError, KvResult};
pub use memory::MemoryKvStore;
pub use types::Revision;
pub use watch::{EventKind, WatchEvent, WatchStream};
