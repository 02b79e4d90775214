use super::{field_matches, require};
use crate::error::StoreResult;
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies an operator organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorKey {
    /// Organization name.
    pub name: String,
}

crate::masked_fields!(OperatorKey { 1 => name });

impl ObjKey for OperatorKey {
    fn validate_key(&self) -> StoreResult<()> {
        require(&self.name, "operator name")
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.name, &filter.name)
    }
}

/// A network operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Operator {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: OperatorKey,
}

crate::masked_fields!(Operator { 2 => key: OperatorKey });

impl Operator {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the operator name.
    pub const FIELD_KEY_NAME: &'static str = "2.1";
}

impl Entity for Operator {
    type Key = OperatorKey;
    const TYPE_NAME: &'static str = "Operator";

    fn key(&self) -> &OperatorKey {
        &self.key
    }

    fn set_key(&mut self, key: OperatorKey) {
        self.key = key;
    }

    fn validate(&self, _fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }

    fn uses_org(&self, org: &str) -> bool {
        self.key.name == org
    }
}
