//! Several entity types synced through one hub.

use edgesync_core::entities::{App, AppInst, Cloudlet, Flavor, Operator, OperatorKey, Settings};
use edgesync_core::{EntityCache, SyncHub, SyncState};
use edgesync_testkit::prelude::*;

struct Caches {
    apps: EntityCache<App>,
    insts: EntityCache<AppInst>,
    cloudlets: EntityCache<Cloudlet>,
    flavors: EntityCache<Flavor>,
    operators: EntityCache<Operator>,
    settings: EntityCache<Settings>,
}

fn start_hub(env: &TestEnv) -> (SyncHub, Caches) {
    let caches = Caches {
        apps: EntityCache::new(),
        insts: EntityCache::new(),
        cloudlets: EntityCache::new(),
        flavors: EntityCache::new(),
        operators: EntityCache::new(),
        settings: EntityCache::new(),
    };
    let hub = SyncHub::with_config(env.kv_dyn(), test_config());
    hub.register(caches.apps.clone());
    hub.register(caches.insts.clone());
    hub.register(caches.cloudlets.clone());
    hub.register(caches.flavors.clone());
    hub.register(caches.operators.clone());
    hub.register(caches.settings.clone());
    hub.start(WAIT_TIMEOUT).unwrap();
    (hub, caches)
}

#[test]
fn hub_routes_each_type_to_its_cache() {
    let env = TestEnv::new();
    env.store::<Flavor>()
        .create(&sample_flavor("x1.small", 1024), None)
        .unwrap();
    let (hub, caches) = start_hub(&env);
    assert_eq!(caches.flavors.count(), 1);
    assert!(caches.flavors.is_init_done());
    assert!(caches.apps.is_init_done());
    assert!(eventually(|| hub.state() == SyncState::Streaming));

    let app = sample_app("acme", "face", "1.0");
    let cloudlet = sample_cloudlet("tmus", "sea");
    let inst = sample_app_inst(&app.key, &cloudlet.key);
    let apps = env.store::<App>();
    let cloudlets = env.store::<Cloudlet>();
    let insts = env.store::<AppInst>();
    let rev = hub
        .apply_stm_wait(|stm| {
            apps.stm_put(stm, &app)?;
            cloudlets.stm_put(stm, &cloudlet)?;
            insts.stm_put(stm, &inst)
        })
        .unwrap();

    assert!(hub.revision() >= rev);
    assert_eq!(caches.apps.get(&app.key), Some(app.clone()));
    assert_eq!(caches.cloudlets.get(&cloudlet.key), Some(cloudlet.clone()));
    assert_eq!(caches.insts.get(&inst.key), Some(inst.clone()));

    // One commit, one revision across types.
    assert_eq!(caches.apps.get_entry(&app.key).unwrap().revision, rev);
    assert_eq!(caches.insts.get_entry(&inst.key).unwrap().revision, rev);

    hub.done().unwrap();
}

#[test]
fn hub_reports_org_usage() {
    let env = TestEnv::new();
    let (hub, caches) = start_hub(&env);

    let app = sample_app("acme", "face", "1.0");
    let cloudlet = sample_cloudlet("tmus", "sea");
    let operator = Operator {
        key: OperatorKey {
            name: "tmus".into(),
        },
        ..Operator::default()
    };
    hub.sync_wait(env.store::<App>().create(&app, None).unwrap(), WAIT_TIMEOUT)
        .unwrap();
    hub.sync_wait(
        env.store::<Cloudlet>().create(&cloudlet, None).unwrap(),
        WAIT_TIMEOUT,
    )
    .unwrap();
    hub.sync_wait(
        env.store::<Operator>().create(&operator, None).unwrap(),
        WAIT_TIMEOUT,
    )
    .unwrap();

    assert_eq!(hub.uses_org("acme"), vec!["App".to_string()]);
    assert_eq!(
        hub.uses_org("tmus"),
        vec!["Cloudlet".to_string(), "Operator".to_string()]
    );
    assert!(hub.uses_org("nobody").is_empty());

    let inst = sample_app_inst(&app.key, &cloudlet.key);
    hub.sync_wait(
        env.store::<AppInst>().create(&inst, None).unwrap(),
        WAIT_TIMEOUT,
    )
    .unwrap();
    assert_eq!(
        hub.uses_org("acme"),
        vec!["App".to_string(), "AppInst".to_string()]
    );
    assert_eq!(caches.insts.count(), 1);
    hub.done().unwrap();
}

#[test]
fn settings_singleton_through_the_hub() {
    let env = TestEnv::new();
    let (hub, caches) = start_hub(&env);
    let store = env.store::<Settings>();

    let rev = store.create(&Settings::with_defaults(), None).unwrap();
    hub.sync_wait(rev, WAIT_TIMEOUT).unwrap();

    let mut change = Settings::with_defaults();
    change.shepherd_health_check_retries = 7;
    change.fields = vec![Settings::FIELD_SHEPHERD_HEALTH_CHECK_RETRIES.to_string()];
    let rev = store
        .update(
            &change,
            &edgesync_core::mask_for(&change),
            None,
        )
        .unwrap();
    hub.sync_wait(rev, WAIT_TIMEOUT).unwrap();

    let cached = caches
        .settings
        .get(&edgesync_core::entities::SettingsKey)
        .unwrap();
    assert_eq!(cached.shepherd_health_check_retries, 7);
    assert_eq!(cached.load_balancer_max_port_range, 50);
    assert_eq!(caches.settings.count(), 1);
    hub.done().unwrap();
}

#[test]
fn unregistered_types_still_advance_the_hub() {
    let env = TestEnv::new();
    let hub = SyncHub::with_config(env.kv_dyn(), test_config());
    let flavors = EntityCache::<Flavor>::new();
    hub.register(flavors.clone());
    hub.start(WAIT_TIMEOUT).unwrap();

    let rev = env
        .store::<App>()
        .create(&sample_app("acme", "face", "1.0"), None)
        .unwrap();
    hub.sync_wait(rev, WAIT_TIMEOUT).unwrap();
    assert_eq!(flavors.count(), 0);
    assert!(hub.start(WAIT_TIMEOUT).is_err());
    hub.done().unwrap();
}
