use super::{field_matches, require};
use crate::entities::OperatorKey;
use crate::error::{StoreError, StoreResult};
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies a cloudlet by operator and name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudletKey {
    /// Owning operator.
    pub operator_key: OperatorKey,
    /// Cloudlet name.
    pub name: String,
}

crate::masked_fields!(CloudletKey {
    1 => operator_key: OperatorKey,
    2 => name,
});

impl ObjKey for CloudletKey {
    fn validate_key(&self) -> StoreResult<()> {
        self.operator_key.validate_key()?;
        require(&self.name, "cloudlet name")
    }

    fn matches(&self, filter: &Self) -> bool {
        self.operator_key.matches(&filter.operator_key) && field_matches(&self.name, &filter.name)
    }
}

/// A geographic location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Loc {
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Meters above sea level.
    pub altitude: f64,
}

crate::masked_fields!(Loc {
    1 => latitude,
    2 => longitude,
    3 => altitude,
});

impl Loc {
    /// Returns true if every non-zero coordinate of `filter` is equal here.
    pub fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.latitude, &filter.latitude)
            && field_matches(&self.longitude, &filter.longitude)
            && field_matches(&self.altitude, &filter.altitude)
    }

    fn validate(&self) -> StoreResult<()> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(StoreError::invalid(format!(
                "invalid latitude {}",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(StoreError::invalid(format!(
                "invalid longitude {}",
                self.longitude
            )));
        }
        Ok(())
    }
}

/// An edge site run by an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cloudlet {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: CloudletKey,
    /// Address of the cloudlet's API endpoint.
    pub access_uri: String,
    /// Physical location.
    pub location: Loc,
    /// DNS label reserved for the cloudlet. Assigned on create.
    pub dns_label: String,
}

crate::masked_fields!(Cloudlet {
    2 => key: CloudletKey,
    4 => access_uri,
    5 => location: Loc,
    6 => dns_label,
});

impl Cloudlet {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the operator name inside the key.
    pub const FIELD_KEY_OPERATOR_NAME: &'static str = "2.1.1";
    /// Path of the cloudlet name inside the key.
    pub const FIELD_KEY_NAME: &'static str = "2.2";
    /// Path of `access_uri`.
    pub const FIELD_ACCESS_URI: &'static str = "4";
    /// Path of `location`.
    pub const FIELD_LOCATION: &'static str = "5";
    /// Path of the latitude.
    pub const FIELD_LOCATION_LATITUDE: &'static str = "5.1";
    /// Path of the longitude.
    pub const FIELD_LOCATION_LONGITUDE: &'static str = "5.2";
    /// Path of the altitude.
    pub const FIELD_LOCATION_ALTITUDE: &'static str = "5.3";
    /// Path of `dns_label`.
    pub const FIELD_DNS_LABEL: &'static str = "6";
}

impl Entity for Cloudlet {
    type Key = CloudletKey;
    const TYPE_NAME: &'static str = "Cloudlet";

    fn key(&self) -> &CloudletKey {
        &self.key
    }

    fn set_key(&mut self, key: CloudletKey) {
        self.key = key;
    }

    fn validate(&self, fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()?;
        if fields.has(Self::FIELD_LOCATION) {
            self.location.validate()?;
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && field_matches(&self.access_uri, &filter.access_uri)
            && self.location.matches(&filter.location)
            && field_matches(&self.dns_label, &filter.dns_label)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }

    fn uses_org(&self, org: &str) -> bool {
        self.key.operator_key.name == org
    }
}
