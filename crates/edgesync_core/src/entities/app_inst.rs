use super::field_matches;
use crate::entities::{AppKey, CloudletKey, FlavorKey, Loc};
use crate::error::StoreResult;
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies an application instance by app and cloudlet.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInstKey {
    /// The deployed application.
    pub app_key: AppKey,
    /// Where it is deployed.
    pub cloudlet_key: CloudletKey,
}

crate::masked_fields!(AppInstKey {
    1 => app_key: AppKey,
    2 => cloudlet_key: CloudletKey,
});

impl ObjKey for AppInstKey {
    fn validate_key(&self) -> StoreResult<()> {
        self.app_key.validate_key()?;
        self.cloudlet_key.validate_key()
    }

    fn matches(&self, filter: &Self) -> bool {
        self.app_key.matches(&filter.app_key) && self.cloudlet_key.matches(&filter.cloudlet_key)
    }
}

/// How the instance's liveness is known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Liveness {
    /// Not known.
    #[default]
    Unknown,
    /// Created and owned by the controller.
    Static,
    /// Created on demand, may be reclaimed.
    Dynamic,
}

/// An application deployed on a cloudlet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInst {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: AppInstKey,
    /// Location of the hosting cloudlet.
    pub cloudlet_loc: Loc,
    /// Address clients connect to.
    pub uri: String,
    /// Compute size of the instance.
    pub flavor: FlavorKey,
    /// DNS label reserved for the instance within its cloudlet.
    pub dns_label: String,
    /// Globally unique id derived from the key.
    pub unique_id: String,
    /// Liveness state.
    pub liveness: Liveness,
}

crate::masked_fields!(AppInst {
    2 => key: AppInstKey,
    3 => cloudlet_loc: Loc,
    4 => uri,
    5 => flavor: FlavorKey,
    6 => dns_label,
    7 => unique_id,
    8 => liveness,
});

impl AppInst {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the app developer name inside the key.
    pub const FIELD_KEY_APP_KEY_DEVELOPER_NAME: &'static str = "2.1.1.2";
    /// Path of the cloudlet operator name inside the key.
    pub const FIELD_KEY_CLOUDLET_KEY_OPERATOR_NAME: &'static str = "2.2.1.1";
    /// Path of `cloudlet_loc`.
    pub const FIELD_CLOUDLET_LOC: &'static str = "3";
    /// Path of `uri`.
    pub const FIELD_URI: &'static str = "4";
    /// Path of the flavor name.
    pub const FIELD_FLAVOR_NAME: &'static str = "5.1";
    /// Path of `dns_label`.
    pub const FIELD_DNS_LABEL: &'static str = "6";
    /// Path of `unique_id`.
    pub const FIELD_UNIQUE_ID: &'static str = "7";
    /// Path of `liveness`.
    pub const FIELD_LIVENESS: &'static str = "8";
}

impl Entity for AppInst {
    type Key = AppInstKey;
    const TYPE_NAME: &'static str = "AppInst";

    fn key(&self) -> &AppInstKey {
        &self.key
    }

    fn set_key(&mut self, key: AppInstKey) {
        self.key = key;
    }

    fn validate(&self, _fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && self.cloudlet_loc.matches(&filter.cloudlet_loc)
            && field_matches(&self.uri, &filter.uri)
            && self.flavor.matches(&filter.flavor)
            && field_matches(&self.dns_label, &filter.dns_label)
            && field_matches(&self.unique_id, &filter.unique_id)
            && field_matches(&self.liveness, &filter.liveness)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }

    fn uses_org(&self, org: &str) -> bool {
        self.key.app_key.developer_key.name == org
            || self.key.cloudlet_key.operator_key.name == org
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{DeveloperKey, OperatorKey};

    fn inst() -> AppInst {
        AppInst {
            key: AppInstKey {
                app_key: AppKey {
                    developer_key: DeveloperKey {
                        name: "acme".into(),
                    },
                    name: "face".into(),
                    version: "1.0".into(),
                },
                cloudlet_key: CloudletKey {
                    operator_key: OperatorKey {
                        name: "tmus".into(),
                    },
                    name: "sea".into(),
                },
            },
            ..AppInst::default()
        }
    }

    #[test]
    fn uses_developer_and_operator() {
        let inst = inst();
        assert!(inst.uses_org("acme"));
        assert!(inst.uses_org("tmus"));
        assert!(!inst.uses_org("att"));
    }

    #[test]
    fn validate_requires_both_parent_keys() {
        let mut inst = inst();
        assert!(inst.validate(&FieldMap::default()).is_ok());
        inst.key.cloudlet_key.name.clear();
        assert!(inst.validate(&FieldMap::default()).is_err());
    }

    #[test]
    fn filter_by_cloudlet_only() {
        let filter = AppInstKey {
            cloudlet_key: inst().key.cloudlet_key,
            ..AppInstKey::default()
        };
        assert!(inst().key.matches(&filter));
    }

    #[test]
    fn deep_key_paths_are_leaves() {
        let all = AppInst::all_fields();
        assert!(all.contains(&AppInst::FIELD_KEY_APP_KEY_DEVELOPER_NAME.to_string()));
        assert!(all.contains(&AppInst::FIELD_KEY_CLOUDLET_KEY_OPERATOR_NAME.to_string()));
        assert!(all.contains(&AppInst::FIELD_FLAVOR_NAME.to_string()));
    }
}
