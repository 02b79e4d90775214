//! Test fixtures.
//!
//! A [`TestEnv`] owns one in-memory backend. Typed stores and running syncs
//! are created against it, so several entity types can share a keyspace the
//! way they do in a deployment.

use edgesync_core::entities::{
    App, AppInst, AppInstKey, AppKey, Cloudlet, CloudletKey, DeveloperKey, Flavor, FlavorKey,
    OperatorKey,
};
use edgesync_core::{
    Entity, EntityCache, ObjectStore, RetryConfig, StoreConfig, SyncConfig, SyncRunner,
};
use edgesync_kv::{KvStore, MemoryKvStore, Revision};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long fixtures wait for a sync to catch up.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Retry settings with short delays for tests.
pub fn fast_retry() -> RetryConfig {
    RetryConfig::new(10)
        .with_initial_delay(Duration::from_micros(100))
        .with_max_delay(Duration::from_millis(2))
}

/// Store settings with short delays for tests.
pub fn test_config() -> StoreConfig {
    StoreConfig::new().with_stm(fast_retry()).with_sync(
        SyncConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_wait_timeout(WAIT_TIMEOUT),
    )
}

/// A shared in-memory backend.
#[derive(Clone)]
pub struct TestEnv {
    /// The backend.
    pub kv: Arc<MemoryKvStore>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Creates an empty backend.
    pub fn new() -> Self {
        crate::logging::init_test_logging();
        Self {
            kv: Arc::new(MemoryKvStore::new()),
        }
    }

    /// Returns the backend as a trait object.
    pub fn kv_dyn(&self) -> Arc<dyn KvStore> {
        Arc::clone(&self.kv) as Arc<dyn KvStore>
    }

    /// Returns a store for `T` with test settings.
    pub fn store<T: Entity>(&self) -> ObjectStore<T> {
        ObjectStore::with_config(self.kv_dyn(), test_config())
    }

    /// Starts a sync for `T` and waits for its initial list.
    pub fn synced<T: Entity>(&self) -> Synced<T> {
        let store = self.store::<T>();
        let cache = EntityCache::<T>::new();
        let runner =
            SyncRunner::start(store.clone(), cache.clone()).expect("failed to start sync");
        cache
            .wait_initial_sync_done(WAIT_TIMEOUT)
            .expect("initial sync did not finish");
        Synced {
            store,
            cache,
            runner: Some(runner),
        }
    }
}

/// A store with a cache kept current by a running sync.
pub struct Synced<T: Entity> {
    /// The store.
    pub store: ObjectStore<T>,
    /// The cache fed by the sync.
    pub cache: EntityCache<T>,
    runner: Option<SyncRunner>,
}

impl<T: Entity> Synced<T> {
    /// Waits until the cache has applied `rev`.
    pub fn wait(&self, rev: Revision) {
        self.cache
            .wait_for_revision(rev, WAIT_TIMEOUT)
            .expect("cache did not reach revision");
    }

    /// Stops the sync and waits for its thread.
    pub fn stop(mut self) {
        if let Some(runner) = self.runner.take() {
            runner.done().expect("sync exited with an error");
        }
    }
}

/// Builds an app key.
pub fn sample_app_key(dev: &str, name: &str, version: &str) -> AppKey {
    AppKey {
        developer_key: DeveloperKey { name: dev.into() },
        name: name.into(),
        version: version.into(),
    }
}

/// Builds an app with an image path.
pub fn sample_app(dev: &str, name: &str, version: &str) -> App {
    App {
        key: sample_app_key(dev, name, version),
        image_path: format!("docker.io/{dev}/{name}:{version}"),
        ..App::default()
    }
}

/// Builds a flavor.
pub fn sample_flavor(name: &str, ram: u64) -> Flavor {
    Flavor {
        key: FlavorKey { name: name.into() },
        ram,
        vcpus: 2,
        disk: 20,
        ..Flavor::default()
    }
}

/// Builds a cloudlet key.
pub fn sample_cloudlet_key(operator: &str, name: &str) -> CloudletKey {
    CloudletKey {
        operator_key: OperatorKey {
            name: operator.into(),
        },
        name: name.into(),
    }
}

/// Builds a cloudlet.
pub fn sample_cloudlet(operator: &str, name: &str) -> Cloudlet {
    Cloudlet {
        key: sample_cloudlet_key(operator, name),
        ..Cloudlet::default()
    }
}

/// Builds an instance of `app` on `cloudlet`.
pub fn sample_app_inst(app: &AppKey, cloudlet: &CloudletKey) -> AppInst {
    AppInst {
        key: AppInstKey {
            app_key: app.clone(),
            cloudlet_key: cloudlet.clone(),
        },
        ..AppInst::default()
    }
}

/// Polls `cond` until it holds or [`WAIT_TIMEOUT`] passes.
///
/// Cache callbacks run after waiters are woken, so a test that counts
/// callbacks polls instead of asserting straight after a wait.
pub fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Waits until `cache` has applied `rev`, tolerating a sync that is still
/// restarting.
pub fn wait_restarted<T: Entity>(cache: &EntityCache<T>, rev: Revision) {
    let ok = eventually(|| {
        cache
            .wait_for_revision(rev, Duration::from_millis(50))
            .is_ok()
    });
    assert!(ok, "cache did not reach {rev}");
}

/// Writes `value` under `db_key` as raw CBOR, bypassing the typed store.
///
/// Used to plant records of the wrong shape.
pub fn put_raw<V: Serialize + ?Sized>(kv: &dyn KvStore, db_key: &str, value: &V) -> Revision {
    let bytes = edgesync_codec::to_bytes(value).expect("encode failed");
    kv.put(db_key, bytes).expect("raw put failed")
}
