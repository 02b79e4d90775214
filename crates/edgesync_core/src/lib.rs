//! # EdgeSync Core
//!
//! Typed entity storage, caching and transactions over a revisioned
//! key-value backend.
//!
//! This crate provides:
//! - A field-mask engine for partial updates ([`FieldMap`])
//! - A typed object store with create/update/put/delete ([`ObjectStore`])
//! - Optimistic multi-key transactions with retry ([`apply_stm`])
//! - Watch-driven caches that mirror the store ([`EntityCache`])
//! - A single-watch dispatcher for many caches ([`SyncHub`])
//! - Unique id and DNS label reservation ([`AppInstIdStore`], [`dnslabel`])
//!
//! ## Store layout
//!
//! An entity of type `T` is stored under `"<T::TYPE_NAME>/<key-string>"`,
//! where the key string is the key rendered as JSON. Values are CBOR.
//!
//! ## Example
//!
//! ```rust
//! use edgesync_core::entities::{Flavor, FlavorKey};
//! use edgesync_core::{EntityCache, FieldMap, ObjectStore};
//! use edgesync_kv::MemoryKvStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let store = ObjectStore::<Flavor>::new(Arc::new(MemoryKvStore::new()));
//! let cache = EntityCache::<Flavor>::new();
//!
//! let flavor = Flavor {
//!     key: FlavorKey { name: "x1.small".into() },
//!     ram: 1024,
//!     ..Flavor::default()
//! };
//! let rev = store.create(&flavor, None).unwrap();
//!
//! let (loaded, _) = store.load_one(&flavor.key).unwrap();
//! cache.apply_update(loaded, rev);
//! cache.wait_for_revision(rev, Duration::from_secs(1)).unwrap();
//! assert_eq!(cache.get(&flavor.key).unwrap().ram, 1024);
//!
//! let mut change = flavor.clone();
//! change.ram = 2048;
//! store.update(&change, &FieldMap::from_fields([Flavor::FIELD_RAM]), None).unwrap();
//! assert_eq!(store.load_one(&flavor.key).unwrap().0.ram, 2048);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod cancel;
mod config;
pub mod dnslabel;
pub mod entities;
mod error;
pub mod fieldmask;
mod hub;
mod idstore;
mod object;
mod stm;
mod store;
mod sync;

pub use cache::{CacheEntry, EntityCache, SyncedCache, WatchHandle};
pub use cancel::CancelToken;
pub use config::{RetryConfig, StoreConfig, SyncConfig, DEFAULT_STM_ATTEMPTS, MIN_STM_ATTEMPTS};
pub use dnslabel::{
    set_app_inst_dns_label, set_cloudlet_dns_label, CloudletDnsLabelStore,
    CloudletObjectDnsLabelStore,
};
pub use error::{StoreError, StoreResult};
pub use fieldmask::{FieldMap, FieldPath, MaskedFields};
pub use hub::SyncHub;
pub use idstore::{app_inst_id, set_app_inst_unique_id, AppInstIdStore, APP_INST_ID_TYPE};
pub use object::{
    db_key, decode_obj, encode_obj, key_from_db_key, mask_for, parse_db_key, type_prefix, Entity,
    ObjKey,
};
pub use stm::{apply_stm, Stm};
pub use store::{ObjectStore, WaitFn};
pub use sync::{
    decode_event, decode_record, Cacher, SyncEvent, SyncRunner, SyncState, SyncStatus,
};
