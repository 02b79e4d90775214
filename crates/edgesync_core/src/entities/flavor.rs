use super::{field_matches, require};
use crate::error::{StoreError, StoreResult};
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies a flavor.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FlavorKey {
    /// Flavor name.
    pub name: String,
}

crate::masked_fields!(FlavorKey { 1 => name });

impl ObjKey for FlavorKey {
    fn validate_key(&self) -> StoreResult<()> {
        require(&self.name, "flavor name")
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.name, &filter.name)
    }
}

/// A compute size: memory, virtual CPUs and disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Flavor {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: FlavorKey,
    /// RAM in megabytes.
    pub ram: u64,
    /// Number of virtual CPUs.
    pub vcpus: u64,
    /// Disk in gigabytes.
    pub disk: u64,
}

crate::masked_fields!(Flavor {
    2 => key: FlavorKey,
    3 => ram,
    4 => vcpus,
    5 => disk,
});

impl Flavor {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the flavor name.
    pub const FIELD_KEY_NAME: &'static str = "2.1";
    /// Path of `ram`.
    pub const FIELD_RAM: &'static str = "3";
    /// Path of `vcpus`.
    pub const FIELD_VCPUS: &'static str = "4";
    /// Path of `disk`.
    pub const FIELD_DISK: &'static str = "5";
}

impl Entity for Flavor {
    type Key = FlavorKey;
    const TYPE_NAME: &'static str = "Flavor";

    fn key(&self) -> &FlavorKey {
        &self.key
    }

    fn set_key(&mut self, key: FlavorKey) {
        self.key = key;
    }

    fn validate(&self, fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()?;
        if fields.has(Self::FIELD_VCPUS) && self.vcpus > 1024 {
            return Err(StoreError::invalid(format!(
                "vcpus {} exceeds limit of 1024",
                self.vcpus
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && field_matches(&self.ram, &filter.ram)
            && field_matches(&self.vcpus, &filter.vcpus)
            && field_matches(&self.disk, &filter.disk)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_required() {
        assert!(Flavor::default().validate(&FieldMap::default()).is_err());
        let ok = Flavor {
            key: FlavorKey { name: "x1".into() },
            ..Flavor::default()
        };
        assert!(ok.validate(&FieldMap::all::<Flavor>()).is_ok());
    }

    #[test]
    fn vcpus_checked_only_when_masked() {
        let big = Flavor {
            key: FlavorKey { name: "x1".into() },
            vcpus: 4096,
            ..Flavor::default()
        };
        assert!(big.validate(&FieldMap::from_fields([Flavor::FIELD_RAM])).is_ok());
        assert!(big
            .validate(&FieldMap::from_fields([Flavor::FIELD_VCPUS]))
            .is_err());
    }

    #[test]
    fn all_fields_lists_leaves() {
        assert_eq!(Flavor::all_fields(), vec!["2.1", "3", "4", "5"]);
    }
}
