use super::{field_matches, require};
use crate::error::StoreResult;
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies a controller process by its API address.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerKey {
    /// API address, `host:port`.
    pub addr: String,
}

crate::masked_fields!(ControllerKey { 1 => addr });

impl ObjKey for ControllerKey {
    fn validate_key(&self) -> StoreResult<()> {
        require(&self.addr, "controller address")
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.addr, &filter.addr)
    }
}

/// A registered controller and its build information.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controller {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: ControllerKey,
    /// Build master revision.
    pub build_master: String,
    /// Build head revision.
    pub build_head: String,
    /// Build author.
    pub build_author: String,
    /// Host the controller runs on.
    pub hostname: String,
}

crate::masked_fields!(Controller {
    2 => key: ControllerKey,
    4 => build_master,
    5 => build_head,
    6 => build_author,
    7 => hostname,
});

impl Controller {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of `build_master`.
    pub const FIELD_BUILD_MASTER: &'static str = "4";
    /// Path of `build_head`.
    pub const FIELD_BUILD_HEAD: &'static str = "5";
    /// Path of `build_author`.
    pub const FIELD_BUILD_AUTHOR: &'static str = "6";
    /// Path of `hostname`.
    pub const FIELD_HOSTNAME: &'static str = "7";
}

impl Entity for Controller {
    type Key = ControllerKey;
    const TYPE_NAME: &'static str = "Controller";

    fn key(&self) -> &ControllerKey {
        &self.key
    }

    fn set_key(&mut self, key: ControllerKey) {
        self.key = key;
    }

    fn validate(&self, _fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && field_matches(&self.build_master, &filter.build_master)
            && field_matches(&self.build_head, &filter.build_head)
            && field_matches(&self.build_author, &filter.build_author)
            && field_matches(&self.hostname, &filter.hostname)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }
}
