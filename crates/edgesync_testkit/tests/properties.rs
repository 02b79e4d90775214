//! Property tests over the field-mask engine, the store and the cache.

use edgesync_core::entities::{App, AppKey, Cloudlet, Flavor};
use edgesync_core::fieldmask::{FieldPath, MaskedFields};
use edgesync_core::{Entity, EntityCache, FieldMap, ObjKey};
use edgesync_kv::Revision;
use edgesync_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn closure_contains_every_ancestor(mask in field_mask_strategy::<App>()) {
        let map = FieldMap::from_fields(&mask);
        for path in &mask {
            let parts: Vec<&str> = path.split('.').collect();
            for end in 1..=parts.len() {
                let prefix = parts[..end].join(".");
                prop_assert!(map.has(&prefix), "{} missing from closure of {}", prefix, path);
            }
        }
    }

    #[test]
    fn update_is_idempotent(
        base in app_strategy(),
        change in app_strategy(),
        mask in non_key_mask_strategy::<App>(),
    ) {
        let env = TestEnv::new();
        let store = env.store::<App>();
        store.create(&base, None).unwrap();

        let mut change = change;
        change.key = base.key.clone();
        let map = FieldMap::from_fields(&mask);

        store.update(&change, &map, None).unwrap();
        let (once, _) = store.load_one(&base.key).unwrap();
        store.update(&change, &map, None).unwrap();
        let (twice, _) = store.load_one(&base.key).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn update_touches_only_masked_leaves(
        base in app_strategy(),
        change in app_strategy(),
        mask in non_key_mask_strategy::<App>(),
    ) {
        let mut merged = base.clone();
        merged.copy_in_fields(&change, &FieldMap::from_fields(&mask), &FieldPath::root());

        let masked: HashSet<&str> = mask.iter().map(String::as_str).collect();
        let pick = |path: &str| masked.contains(path);

        let expect_path = if pick(App::FIELD_IMAGE_PATH) {
            &change.image_path
        } else {
            &base.image_path
        };
        prop_assert_eq!(&merged.image_path, expect_path);
        let expect_type = if pick(App::FIELD_IMAGE_TYPE) {
            change.image_type
        } else {
            base.image_type
        };
        prop_assert_eq!(merged.image_type, expect_type);
        let expect_tags = if pick(App::FIELD_TAGS) { &change.tags } else { &base.tags };
        prop_assert_eq!(&merged.tags, expect_tags);
        let expect_flavor = if pick(App::FIELD_DEFAULT_FLAVOR_NAME) {
            &change.default_flavor
        } else {
            &base.default_flavor
        };
        prop_assert_eq!(&merged.default_flavor, expect_flavor);
        prop_assert_eq!(merged.key, base.key);
    }

    #[test]
    fn zero_filter_matches_everything(key in app_key_strategy()) {
        prop_assert!(key.matches(&AppKey::default()));
    }

    #[test]
    fn filter_matches_exactly_on_set_fields(
        key in app_key_strategy(),
        filter in app_key_filter_strategy(),
    ) {
        let expected = (filter.developer_key.name.is_empty()
            || filter.developer_key.name == key.developer_key.name)
            && (filter.name.is_empty() || filter.name == key.name)
            && (filter.version.is_empty() || filter.version == key.version);
        prop_assert_eq!(key.matches(&filter), expected);
    }

    #[test]
    fn non_key_filter_matches_exact_values(
        apps in prop::collection::vec(app_strategy(), 1..8),
        pick in any::<prop::sample::Index>(),
    ) {
        let cache = EntityCache::<App>::new();
        for (i, app) in apps.iter().enumerate() {
            cache.apply_update(app.clone(), Revision::new(i as u64 + 1));
        }
        let wanted = apps[pick.index(apps.len())].image_path.clone();
        let filter = App {
            image_path: wanted.clone(),
            ..App::default()
        };

        let mut shown = Vec::new();
        cache
            .show(&filter, |app| {
                shown.push(app.key.clone());
                Ok(())
            })
            .unwrap();
        let mut expected: Vec<AppKey> = cache
            .keys()
            .into_iter()
            .filter(|key| {
                let app = cache.get(key).unwrap();
                wanted.is_empty() || app.image_path == wanted
            })
            .collect();
        shown.sort();
        expected.sort();
        prop_assert_eq!(shown, expected);
    }

    #[test]
    fn prune_keeps_exactly_the_listed_keys(
        flavors in prop::collection::vec(flavor_strategy(), 1..12),
        keep_mask in prop::collection::vec(any::<bool>(), 12),
    ) {
        let cache = EntityCache::<Flavor>::new();
        let mut all = HashSet::new();
        for (i, flavor) in flavors.iter().enumerate() {
            cache.apply_update(flavor.clone(), Revision::new(i as u64 + 1));
            all.insert(flavor.key.clone());
        }

        let deleted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&deleted);
        cache.set_deleted_cb(move |obj: &Flavor| sink.lock().unwrap().push(obj.key.clone()));

        let listed: HashSet<_> = all
            .iter()
            .zip(keep_mask.iter())
            .filter(|(_, keep)| **keep)
            .map(|(key, _)| key.clone())
            .collect();

        cache.apply_list_start();
        for key in &listed {
            let obj = cache.get(key).unwrap();
            cache.apply_list(obj, Revision::new(100));
        }
        cache.apply_list_end(Revision::new(100));

        let remaining: HashSet<_> = cache.keys().into_iter().collect();
        prop_assert_eq!(&remaining, &listed);

        let dropped: HashSet<_> = deleted.lock().unwrap().iter().cloned().collect();
        let expected: HashSet<_> = all.difference(&listed).cloned().collect();
        prop_assert_eq!(dropped, expected);
        prop_assert_eq!(deleted.lock().unwrap().len(), all.len() - listed.len());
    }
}

#[test]
fn prune_scenario_k1_k2_k3() {
    let cache = EntityCache::<Flavor>::new();
    for (i, name) in ["k1", "k2", "k3"].iter().enumerate() {
        cache.apply_update(sample_flavor(name, 1), Revision::new(i as u64 + 1));
    }
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deleted);
    cache.set_deleted_cb(move |obj: &Flavor| sink.lock().unwrap().push(obj.key.name.clone()));

    cache.apply_list_start();
    cache.apply_list(sample_flavor("k1", 1), Revision::new(9));
    cache.apply_list(sample_flavor("k2", 1), Revision::new(9));
    cache.apply_list_end(Revision::new(9));

    let names: Vec<String> = cache.keys().into_iter().map(|k| k.name).collect();
    assert_eq!(names, vec!["k1", "k2"]);
    assert_eq!(*deleted.lock().unwrap(), vec!["k3".to_string()]);
    assert!(cache.is_init_done());
}

#[test]
fn show_filters_by_key_fields() {
    let cache = EntityCache::<App>::new();
    let apps = [
        sample_app("acme", "face", "1.0"),
        sample_app("acme", "face", "2.0"),
        sample_app("globex", "face", "1.0"),
    ];
    for (i, app) in apps.iter().enumerate() {
        cache.apply_update(app.clone(), Revision::new(i as u64 + 1));
    }

    let mut filter = App::default();
    filter.key.developer_key.name = "acme".into();
    let mut shown = Vec::new();
    cache
        .show(&filter, |app| {
            shown.push(app.key.version.clone());
            Ok(())
        })
        .unwrap();
    assert_eq!(shown, vec!["1.0", "2.0"]);

    let mut count = 0;
    cache
        .show(&App::default(), |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
    assert_eq!(count, apps.len());
    assert!(apps.iter().all(|a| a.matches(&App::default())));
}

#[test]
fn show_filters_by_non_key_fields() {
    let cache = EntityCache::<App>::new();
    let mut a = sample_app("acme", "a", "1.0");
    a.image_path = "img/a".into();
    let mut b = sample_app("acme", "b", "1.0");
    b.image_path = "img/b".into();
    cache.apply_update(a, Revision::new(1));
    cache.apply_update(b, Revision::new(2));

    let filter = App {
        image_path: "img/a".into(),
        ..App::default()
    };
    let mut shown = Vec::new();
    cache
        .show(&filter, |app| {
            shown.push(app.key.name.clone());
            Ok(())
        })
        .unwrap();
    assert_eq!(shown, vec!["a"]);

    let big = sample_flavor("big", 8192);
    let small = sample_flavor("small", 1024);
    let ram_filter = Flavor {
        ram: 8192,
        ..Flavor::default()
    };
    assert!(big.matches(&ram_filter));
    assert!(!small.matches(&ram_filter));

    let mut cloudlet = sample_cloudlet("tmus", "seattle");
    cloudlet.access_uri = "https://seattle.tmus".into();
    let mut uri_filter = Cloudlet {
        access_uri: "https://elsewhere".into(),
        ..Cloudlet::default()
    };
    assert!(!cloudlet.matches(&uri_filter));
    uri_filter.access_uri = cloudlet.access_uri.clone();
    assert!(cloudlet.matches(&uri_filter));
}
