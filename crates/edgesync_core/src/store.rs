//! Typed object store.

use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::fieldmask::{FieldMap, FieldPath};
use crate::object::{db_key, decode_obj, encode_obj, type_prefix, Entity, ObjKey};
use crate::stm::Stm;
use crate::sync::{drive_watch, Cacher, SyncStatus, TypedSink};
use edgesync_kv::{KvStore, Revision};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Called with the revision of a successful mutation.
///
/// Typically waits for a cache to catch up with the write.
pub type WaitFn<'a> = Option<&'a dyn Fn(Revision)>;

/// Typed CRUD access to every object of one entity type.
///
/// Objects of `T` live under `"<TYPE_NAME>/<key string>"`. Values are
/// stored without their `fields` attribute.
///
/// # Example
///
/// ```rust
/// use edgesync_core::entities::{Flavor, FlavorKey};
/// use edgesync_core::{FieldMap, ObjectStore};
/// use edgesync_kv::MemoryKvStore;
/// use std::sync::Arc;
///
/// let store = ObjectStore::<Flavor>::new(Arc::new(MemoryKvStore::new()));
/// let mut flavor = Flavor {
///     key: FlavorKey { name: "x1.small".into() },
///     ram: 1024,
///     ..Flavor::default()
/// };
/// store.create(&flavor, None).unwrap();
///
/// flavor.ram = 2048;
/// store
///     .update(&flavor, &FieldMap::from_fields([Flavor::FIELD_RAM]), None)
///     .unwrap();
/// let (loaded, _) = store.load_one(&flavor.key).unwrap();
/// assert_eq!(loaded.ram, 2048);
/// ```
pub struct ObjectStore<T: Entity> {
    kv: Arc<dyn KvStore>,
    config: StoreConfig,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for ObjectStore<T> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            config: self.config.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Entity> ObjectStore<T> {
    /// Creates a store with the default configuration.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_config(kv, StoreConfig::default())
    }

    /// Creates a store with a custom configuration.
    pub fn with_config(kv: Arc<dyn KvStore>, config: StoreConfig) -> Self {
        Self {
            kv,
            config,
            _marker: PhantomData,
        }
    }

    /// Returns the backing key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates a new object.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if validation fails and `AlreadyExists` if the key
    /// is taken.
    pub fn create(&self, obj: &T, wait: WaitFn<'_>) -> StoreResult<Revision> {
        obj.validate(&FieldMap::all::<T>())?;
        let key = db_key::<T>(obj.key())?;
        let rev = self.kv.create(&key, encode_obj(obj)?)?;
        debug!(type_name = T::TYPE_NAME, %key, %rev, "create");
        notify(wait, rev);
        Ok(rev)
    }

    /// Updates the masked fields of an existing object.
    ///
    /// The write is conditioned on the revision read, so a concurrent
    /// writer makes this call fail with `Conflict` rather than being
    /// silently overwritten.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if validation fails, `NotFound` if the object does
    /// not exist and `Conflict` if it changed since it was read.
    pub fn update(&self, obj: &T, mask: &FieldMap, wait: WaitFn<'_>) -> StoreResult<Revision> {
        obj.validate(mask)?;
        let key = db_key::<T>(obj.key())?;
        let entry = self
            .kv
            .get(&key)?
            .ok_or_else(|| StoreError::not_found(key.clone()))?;
        let mut cur: T = decode_obj(&key, &entry.value)?;
        let changed = cur.copy_in_fields(obj, mask, &FieldPath::root());
        cur.clear_fields();
        let rev = self.kv.update(&key, encode_obj(&cur)?, entry.mod_revision)?;
        debug!(type_name = T::TYPE_NAME, %key, %rev, changed, "update");
        notify(wait, rev);
        Ok(rev)
    }

    /// Writes the masked fields of an object, creating it if absent.
    ///
    /// An absent object is built from `T::default()` with only the masked
    /// fields and the key set. The last writer wins.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if validation fails.
    pub fn put(&self, obj: &T, mask: &FieldMap, wait: WaitFn<'_>) -> StoreResult<Revision> {
        obj.validate(mask)?;
        let key = db_key::<T>(obj.key())?;
        let mut cur = match self.kv.get(&key)? {
            Some(entry) => decode_obj::<T>(&key, &entry.value)?,
            None => {
                let mut fresh = T::default();
                fresh.set_key(obj.key().clone());
                fresh
            }
        };
        cur.copy_in_fields(obj, mask, &FieldPath::root());
        cur.clear_fields();
        let rev = self.kv.put(&key, encode_obj(&cur)?)?;
        debug!(type_name = T::TYPE_NAME, %key, %rev, "put");
        notify(wait, rev);
        Ok(rev)
    }

    /// Deletes an object. Only its key is inspected.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if the key is invalid and `NotFound` if the object
    /// does not exist.
    pub fn delete(&self, obj: &T, wait: WaitFn<'_>) -> StoreResult<Revision> {
        obj.key().validate_key()?;
        let key = db_key::<T>(obj.key())?;
        let rev = self.kv.delete(&key)?;
        debug!(type_name = T::TYPE_NAME, %key, %rev, "delete");
        notify(wait, rev);
        Ok(rev)
    }

    /// Calls `cb` with every stored object of `T`, in key order.
    ///
    /// Records that fail to decode are logged and skipped. Stops at the
    /// first error returned by `cb`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached, or the error
    /// returned by `cb`.
    pub fn load_all<F>(&self, mut cb: F) -> StoreResult<()>
    where
        F: FnMut(T, Revision) -> StoreResult<()>,
    {
        for record in self.kv.list(&type_prefix::<T>())? {
            match decode_obj::<T>(&record.key, &record.value) {
                Ok(obj) => cb(obj, record.mod_revision)?,
                Err(err) => warn!(key = %record.key, error = %err, "skipping corrupt record"),
            }
        }
        Ok(())
    }

    /// Loads one object and the revision of its last write.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the object does not exist and `Corrupt` if it
    /// does not decode.
    pub fn load_one(&self, key: &T::Key) -> StoreResult<(T, Revision)> {
        let db_key = db_key::<T>(key)?;
        let entry = self
            .kv
            .get(&db_key)?
            .ok_or_else(|| StoreError::not_found(db_key.clone()))?;
        Ok((decode_obj(&db_key, &entry.value)?, entry.mod_revision))
    }

    /// Reads an object inside a transaction.
    ///
    /// A stored value that fails to decode is logged and reported as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn stm_get(&self, stm: &mut Stm<'_>, key: &T::Key) -> StoreResult<Option<T>> {
        let db_key = db_key::<T>(key)?;
        let Some(bytes) = stm.get(&db_key)? else {
            return Ok(None);
        };
        match decode_obj::<T>(&db_key, &bytes) {
            Ok(obj) => Ok(Some(obj)),
            Err(err) => {
                warn!(key = %db_key, error = %err, "corrupt record read in transaction");
                Ok(None)
            }
        }
    }

    /// Buffers a write of `obj` inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the object cannot be encoded.
    pub fn stm_put(&self, stm: &mut Stm<'_>, obj: &T) -> StoreResult<()> {
        stm.put(db_key::<T>(obj.key())?, encode_obj(obj)?);
        Ok(())
    }

    /// Buffers a delete inside a transaction.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the key cannot be encoded.
    pub fn stm_del(&self, stm: &mut Stm<'_>, key: &T::Key) -> StoreResult<()> {
        stm.del(db_key::<T>(key)?);
        Ok(())
    }

    /// Runs a sync of every `T` into `cacher` until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the watch cannot be started or is lost.
    pub fn sync(&self, cacher: &dyn Cacher<T>, cancel: &CancelToken) -> StoreResult<()> {
        self.sync_with_status(cacher, cancel, &SyncStatus::new())
    }

    /// Like [`ObjectStore::sync`], publishing state transitions to `status`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the watch cannot be started or is lost.
    pub fn sync_with_status(
        &self,
        cacher: &dyn Cacher<T>,
        cancel: &CancelToken,
        status: &SyncStatus,
    ) -> StoreResult<()> {
        let sink = TypedSink { cacher };
        let result = drive_watch(
            self.kv.as_ref(),
            &type_prefix::<T>(),
            &sink,
            cancel,
            self.config.sync.poll_interval,
            status,
        );
        cacher.sync_stopped();
        result
    }
}

fn notify(wait: WaitFn<'_>, rev: Revision) {
    if let Some(wait) = wait {
        wait(rev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::entities::{App, AppKey, DeveloperKey, Flavor, FlavorKey};
    use crate::stm::apply_stm;
    use edgesync_kv::MemoryKvStore;
    use std::cell::Cell;

    fn store<T: Entity>() -> ObjectStore<T> {
        ObjectStore::new(Arc::new(MemoryKvStore::new()))
    }

    fn app() -> App {
        App {
            key: AppKey {
                developer_key: DeveloperKey {
                    name: "acme".into(),
                },
                name: "face".into(),
                version: "1.0".into(),
            },
            image_path: "docker.io/acme/face:1.0".into(),
            ..App::default()
        }
    }

    #[test]
    fn create_then_load() {
        let store = store::<App>();
        let rev = store.create(&app(), None).unwrap();
        let (loaded, loaded_rev) = store.load_one(&app().key).unwrap();
        assert_eq!(loaded, app());
        assert_eq!(loaded_rev, rev);
    }

    #[test]
    fn create_duplicate_fails() {
        let store = store::<App>();
        store.create(&app(), None).unwrap();
        assert!(matches!(
            store.create(&app(), None),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn create_invalid_key_fails() {
        let store = store::<App>();
        let bad = App::default();
        assert!(matches!(
            store.create(&bad, None),
            Err(StoreError::Invalid { .. })
        ));
        assert!(store.kv().list("").unwrap().is_empty());
    }

    #[test]
    fn update_missing_fails() {
        let store = store::<App>();
        let mask = FieldMap::from_fields([App::FIELD_IMAGE_PATH]);
        assert!(matches!(
            store.update(&app(), &mask, None),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn update_merges_only_masked_fields() {
        let store = store::<App>();
        let mut orig = app();
        orig.tags = vec!["prod".into()];
        store.create(&orig, None).unwrap();

        let mut change = app();
        change.image_path = "docker.io/acme/face:2.0".into();
        change.tags = vec!["other".into()];
        change.fields = vec![App::FIELD_IMAGE_PATH.to_string()];
        store
            .update(&change, &FieldMap::from_fields(&change.fields), None)
            .unwrap();

        let (loaded, _) = store.load_one(&orig.key).unwrap();
        assert_eq!(loaded.image_path, "docker.io/acme/face:2.0");
        assert_eq!(loaded.tags, vec!["prod".to_string()]);
        assert!(loaded.fields.is_empty());
    }

    #[test]
    fn put_creates_from_default_with_masked_fields() {
        let store = store::<App>();
        let mut obj = app();
        obj.tags = vec!["ignored".into()];
        store
            .put(&obj, &FieldMap::from_fields([App::FIELD_IMAGE_PATH]), None)
            .unwrap();

        let (loaded, _) = store.load_one(&obj.key).unwrap();
        assert_eq!(loaded.key, obj.key);
        assert_eq!(loaded.image_path, obj.image_path);
        assert!(loaded.tags.is_empty());
    }

    #[test]
    fn put_overwrites_without_revision_check() {
        let store = store::<Flavor>();
        let key = FlavorKey { name: "x1".into() };
        let mut flavor = Flavor {
            key: key.clone(),
            ram: 1,
            vcpus: 1,
            ..Flavor::default()
        };
        store.create(&flavor, None).unwrap();

        flavor.ram = 8;
        flavor.vcpus = 99;
        store
            .put(&flavor, &FieldMap::from_fields([Flavor::FIELD_RAM]), None)
            .unwrap();
        let (loaded, _) = store.load_one(&key).unwrap();
        assert_eq!(loaded.ram, 8);
        assert_eq!(loaded.vcpus, 1);
    }

    #[test]
    fn delete_missing_fails_and_wait_is_called() {
        let store = store::<Flavor>();
        let flavor = Flavor {
            key: FlavorKey { name: "x1".into() },
            ..Flavor::default()
        };
        assert!(matches!(
            store.delete(&flavor, None),
            Err(StoreError::NotFound { .. })
        ));

        let seen = Cell::new(Revision::ZERO);
        let wait = |rev: Revision| seen.set(rev);
        let created = store.create(&flavor, Some(&wait)).unwrap();
        assert_eq!(seen.get(), created);
        let deleted = store.delete(&flavor, Some(&wait)).unwrap();
        assert_eq!(seen.get(), deleted);
        assert!(deleted > created);
    }

    #[test]
    fn load_all_skips_corrupt_records() {
        let store = store::<Flavor>();
        for name in ["a", "b"] {
            store
                .create(
                    &Flavor {
                        key: FlavorKey { name: name.into() },
                        ..Flavor::default()
                    },
                    None,
                )
                .unwrap();
        }
        store
            .kv()
            .put(r#"Flavor/{"name":"c"}"#, vec![0xde, 0xad])
            .unwrap();

        let mut names = Vec::new();
        store
            .load_all(|obj, _| {
                names.push(obj.key.name);
                Ok(())
            })
            .unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn stm_helpers_round_trip() {
        let store = store::<Flavor>();
        let key = FlavorKey { name: "x1".into() };
        let retry = RetryConfig::default();

        apply_stm(store.kv().as_ref(), &retry, |stm| {
            assert!(store.stm_get(stm, &key)?.is_none());
            store.stm_put(
                stm,
                &Flavor {
                    key: key.clone(),
                    disk: 40,
                    ..Flavor::default()
                },
            )
        })
        .unwrap();
        assert_eq!(store.load_one(&key).unwrap().0.disk, 40);

        apply_stm(store.kv().as_ref(), &retry, |stm| {
            let cur = store.stm_get(stm, &key)?;
            assert_eq!(cur.map(|f| f.disk), Some(40));
            store.stm_del(stm, &key)
        })
        .unwrap();
        assert!(matches!(
            store.load_one(&key),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn stm_get_treats_corrupt_as_absent() {
        let store = store::<Flavor>();
        let key = FlavorKey { name: "bad".into() };
        store
            .kv()
            .put(&db_key::<Flavor>(&key).unwrap(), vec![0xff])
            .unwrap();
        apply_stm(store.kv().as_ref(), &RetryConfig::default(), |stm| {
            assert!(store.stm_get(stm, &key)?.is_none());
            Ok(())
        })
        .unwrap();
    }
}
