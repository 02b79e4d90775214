//! Property-based test generators using proptest.
//!
//! Names are drawn from small alphabets so generated keys collide often
//! enough to exercise filters and overwrites.

use edgesync_core::entities::{App, AppKey, DeveloperKey, Flavor, FlavorKey, ImageType};
use edgesync_core::Entity;
use proptest::prelude::*;

/// Strategy for organization names.
pub fn org_name_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["acme", "globex", "initech", "tmus"]).prop_map(String::from)
}

/// Strategy for app and flavor names, including characters that need
/// sanitizing in DNS labels.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9_ .]{0,11}").expect("Invalid regex")
}

/// Strategy for version strings.
pub fn version_strategy() -> impl Strategy<Value = String> {
    (0u8..3, 0u8..10).prop_map(|(major, minor)| format!("{major}.{minor}"))
}

/// Strategy for valid app keys.
pub fn app_key_strategy() -> impl Strategy<Value = AppKey> {
    (org_name_strategy(), name_strategy(), version_strategy()).prop_map(|(dev, name, version)| {
        AppKey {
            developer_key: DeveloperKey { name: dev },
            name,
            version,
        }
    })
}

/// Strategy for app key filters: each field is either empty or a value.
pub fn app_key_filter_strategy() -> impl Strategy<Value = AppKey> {
    (
        prop::option::of(org_name_strategy()),
        prop::option::of(name_strategy()),
        prop::option::of(version_strategy()),
    )
        .prop_map(|(dev, name, version)| AppKey {
            developer_key: DeveloperKey {
                name: dev.unwrap_or_default(),
            },
            name: name.unwrap_or_default(),
            version: version.unwrap_or_default(),
        })
}

fn image_type_strategy() -> impl Strategy<Value = ImageType> {
    prop::sample::select(vec![ImageType::Unknown, ImageType::Docker, ImageType::Qcow])
}

/// Strategy for valid apps.
pub fn app_strategy() -> impl Strategy<Value = App> {
    (
        app_key_strategy(),
        "[a-z/:.0-9]{0,24}",
        image_type_strategy(),
        prop::collection::vec("[a-z]{1,6}", 0..4),
        prop::option::of("[a-z0-9.]{1,10}"),
    )
        .prop_map(|(key, image_path, image_type, tags, flavor)| App {
            key,
            image_path,
            image_type,
            tags,
            default_flavor: FlavorKey {
                name: flavor.unwrap_or_default(),
            },
            ..App::default()
        })
}

/// Strategy for valid flavors.
pub fn flavor_strategy() -> impl Strategy<Value = Flavor> {
    ("[a-z][a-z0-9.]{0,9}", 0u64..65536, 0u64..64, 0u64..1024).prop_map(
        |(name, ram, vcpus, disk)| Flavor {
            key: FlavorKey { name },
            ram,
            vcpus,
            disk,
            ..Flavor::default()
        },
    )
}

/// Strategy for non-empty subsets of the leaf paths of `T`.
pub fn field_mask_strategy<T: Entity>() -> impl Strategy<Value = Vec<String>> {
    let all = T::all_fields();
    let len = all.len();
    prop::sample::subsequence(all, 1..=len)
}

/// Strategy for masks of `T` that leave the key untouched.
pub fn non_key_mask_strategy<T: Entity>() -> impl Strategy<Value = Vec<String>> {
    let fields: Vec<String> = T::all_fields()
        .into_iter()
        .filter(|f| !f.starts_with("2.") && f != "2")
        .collect();
    let len = fields.len();
    prop::sample::subsequence(fields, 1..=len)
}
