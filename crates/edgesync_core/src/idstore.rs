//! Region-wide reservation of application instance ids.

use crate::dnslabel::dns_sanitize;
use crate::entities::AppInst;
use crate::error::{StoreError, StoreResult};
use crate::stm::Stm;
use tracing::debug;

/// Type prefix of id reservations.
pub const APP_INST_ID_TYPE: &str = "AppInstId";

/// Candidates tried before giving up on a unique id.
const MAX_ID_ATTEMPTS: usize = 10;

/// Reserves instance ids under `AppInstId/<id>`.
///
/// All access goes through an [`Stm`], so checking and reserving an id
/// commit together with the instance that claims it.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppInstIdStore;

impl AppInstIdStore {
    /// Returns the store key reserving `id`.
    #[must_use]
    pub fn db_key(id: &str) -> String {
        format!("{APP_INST_ID_TYPE}/{id}")
    }

    /// Returns true if `id` is reserved.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the store cannot be reached.
    pub fn stm_has(&self, stm: &mut Stm<'_>, id: &str) -> StoreResult<bool> {
        Ok(stm.get(&Self::db_key(id))?.is_some())
    }

    /// Reserves `id`.
    pub fn stm_put(&self, stm: &mut Stm<'_>, id: &str) {
        stm.put(Self::db_key(id), id.as_bytes().to_vec());
    }

    /// Releases `id`.
    pub fn stm_del(&self, stm: &mut Stm<'_>, id: &str) {
        stm.del(Self::db_key(id));
    }
}

/// Builds the candidate id of an instance.
///
/// The id joins the sanitized developer, app and version with the cloudlet
/// and operator, plus `salt` when non-empty. It contains no `.`.
#[must_use]
pub fn app_inst_id(inst: &AppInst, salt: &str) -> String {
    let app = &inst.key.app_key;
    let cloudlet = &inst.key.cloudlet_key;
    let mut parts = vec![
        format!(
            "{}{}{}",
            dns_sanitize(&app.developer_key.name),
            dns_sanitize(&app.name),
            dns_sanitize(&app.version)
        ),
        dns_sanitize(&cloudlet.name),
        dns_sanitize(&cloudlet.operator_key.name),
    ];
    if !salt.is_empty() {
        parts.push(dns_sanitize(salt));
    }
    parts.join("-")
}

/// Picks an unreserved id for `inst`, sets `inst.unique_id` and reserves it.
///
/// # Errors
///
/// Returns `Invalid` if every candidate is taken, or `Unavailable` if the
/// store cannot be reached.
pub fn set_app_inst_unique_id(
    stm: &mut Stm<'_>,
    store: &AppInstIdStore,
    inst: &mut AppInst,
) -> StoreResult<()> {
    inst.unique_id.clear();
    for attempt in 0..MAX_ID_ATTEMPTS {
        let salt = if attempt == 0 {
            String::new()
        } else {
            attempt.to_string()
        };
        let id = app_inst_id(inst, &salt);
        if store.stm_has(stm, &id)? {
            debug!(%id, "app inst id taken");
            continue;
        }
        store.stm_put(stm, &id);
        inst.unique_id = id;
        return Ok(());
    }
    Err(StoreError::invalid(
        "unable to compute unique app inst id, please change key values",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::entities::{AppInstKey, AppKey, CloudletKey, DeveloperKey, OperatorKey};
    use crate::stm::apply_stm;
    use edgesync_kv::{KvStore, MemoryKvStore};

    fn inst() -> AppInst {
        AppInst {
            key: AppInstKey {
                app_key: AppKey {
                    developer_key: DeveloperKey {
                        name: "Acme_Inc".into(),
                    },
                    name: "Face Detect".into(),
                    version: "1.0".into(),
                },
                cloudlet_key: CloudletKey {
                    operator_key: OperatorKey {
                        name: "TMUS".into(),
                    },
                    name: "sea.1".into(),
                },
            },
            ..AppInst::default()
        }
    }

    #[test]
    fn id_is_sanitized() {
        assert_eq!(app_inst_id(&inst(), ""), "acme-incfacedetect10-sea1-tmus");
        assert_eq!(app_inst_id(&inst(), "3"), "acme-incfacedetect10-sea1-tmus-3");
    }

    #[test]
    fn has_put_del() {
        let kv = MemoryKvStore::new();
        let store = AppInstIdStore;
        apply_stm(&kv, &RetryConfig::default(), |stm| {
            assert!(!store.stm_has(stm, "a")?);
            store.stm_put(stm, "a");
            assert!(store.stm_has(stm, "a")?);
            Ok(())
        })
        .unwrap();
        assert_eq!(kv.get("AppInstId/a").unwrap().unwrap().value, b"a".to_vec());

        apply_stm(&kv, &RetryConfig::default(), |stm| {
            store.stm_del(stm, "a");
            Ok(())
        })
        .unwrap();
        assert!(kv.get("AppInstId/a").unwrap().is_none());
    }

    #[test]
    fn collisions_get_salted() {
        let kv = MemoryKvStore::new();
        let store = AppInstIdStore;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut inst = inst();
            apply_stm(&kv, &RetryConfig::default(), |stm| {
                set_app_inst_unique_id(stm, &store, &mut inst)
            })
            .unwrap();
            ids.push(inst.unique_id);
        }
        assert_eq!(
            ids,
            vec![
                "acme-incfacedetect10-sea1-tmus",
                "acme-incfacedetect10-sea1-tmus-1",
                "acme-incfacedetect10-sea1-tmus-2",
            ]
        );
    }

    #[test]
    fn exhausted_candidates_fail() {
        let kv = MemoryKvStore::new();
        let store = AppInstIdStore;
        let base = inst();
        for attempt in 0..MAX_ID_ATTEMPTS {
            let salt = if attempt == 0 {
                String::new()
            } else {
                attempt.to_string()
            };
            let id = app_inst_id(&base, &salt);
            kv.put(&AppInstIdStore::db_key(&id), id.into_bytes()).unwrap();
        }
        let mut inst = inst();
        let result = apply_stm(&kv, &RetryConfig::default(), |stm| {
            set_app_inst_unique_id(stm, &store, &mut inst)
        });
        assert!(matches!(result, Err(StoreError::Invalid { .. })));
        assert!(inst.unique_id.is_empty());
    }
}
