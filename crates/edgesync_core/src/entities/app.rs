use super::{field_matches, require};
use crate::entities::FlavorKey;
use crate::error::{StoreError, StoreResult};
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Identifies a developer organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeveloperKey {
    /// Organization name.
    pub name: String,
}

crate::masked_fields!(DeveloperKey { 2 => name });

/// Identifies an application by developer, name and version.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct AppKey {
    /// Owning developer.
    pub developer_key: DeveloperKey,
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
}

crate::masked_fields!(AppKey {
    1 => developer_key: DeveloperKey,
    2 => name,
    3 => version,
});

impl ObjKey for AppKey {
    fn validate_key(&self) -> StoreResult<()> {
        require(&self.developer_key.name, "app developer")?;
        require(&self.name, "app name")?;
        if self.name.chars().any(char::is_control) {
            return Err(StoreError::invalid(format!(
                "invalid app name {:?}",
                self.name
            )));
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.developer_key.name, &filter.developer_key.name)
            && field_matches(&self.name, &filter.name)
            && field_matches(&self.version, &filter.version)
    }
}

/// How an application image is packaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageType {
    /// Not set.
    #[default]
    Unknown,
    /// A container image.
    Docker,
    /// A virtual machine disk image.
    Qcow,
}

/// A deployable application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct App {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: AppKey,
    /// Registry path of the image.
    pub image_path: String,
    /// Packaging of the image.
    pub image_type: ImageType,
    /// Ports the application listens on, e.g. `tcp:80,udp:5000`.
    pub access_ports: String,
    /// Flavor used when an instance names none.
    pub default_flavor: FlavorKey,
    /// Free-form labels.
    pub tags: Vec<String>,
}

crate::masked_fields!(App {
    2 => key: AppKey,
    4 => image_path,
    5 => image_type,
    6 => access_ports,
    7 => default_flavor: FlavorKey,
    8 => tags,
});

impl App {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the developer name inside the key.
    pub const FIELD_KEY_DEVELOPER_NAME: &'static str = "2.1.2";
    /// Path of the app name inside the key.
    pub const FIELD_KEY_NAME: &'static str = "2.2";
    /// Path of the version inside the key.
    pub const FIELD_KEY_VERSION: &'static str = "2.3";
    /// Path of `image_path`.
    pub const FIELD_IMAGE_PATH: &'static str = "4";
    /// Path of `image_type`.
    pub const FIELD_IMAGE_TYPE: &'static str = "5";
    /// Path of `access_ports`.
    pub const FIELD_ACCESS_PORTS: &'static str = "6";
    /// Path of `default_flavor`.
    pub const FIELD_DEFAULT_FLAVOR: &'static str = "7";
    /// Path of the default flavor's name.
    pub const FIELD_DEFAULT_FLAVOR_NAME: &'static str = "7.1";
    /// Path of `tags`.
    pub const FIELD_TAGS: &'static str = "8";
}

/// Parses `proto:port[,proto:port...]`.
fn validate_access_ports(ports: &str) -> StoreResult<()> {
    for entry in ports.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (proto, port) = entry
            .split_once(':')
            .ok_or_else(|| StoreError::invalid(format!("invalid access port {entry:?}")))?;
        if !matches!(proto.to_ascii_lowercase().as_str(), "tcp" | "udp" | "http") {
            return Err(StoreError::invalid(format!(
                "unsupported protocol {proto:?} in {entry:?}"
            )));
        }
        match port.parse::<u16>() {
            Ok(p) if p > 0 => {}
            _ => {
                return Err(StoreError::invalid(format!(
                    "invalid port {port:?} in {entry:?}"
                )))
            }
        }
    }
    Ok(())
}

impl Entity for App {
    type Key = AppKey;
    const TYPE_NAME: &'static str = "App";

    fn key(&self) -> &AppKey {
        &self.key
    }

    fn set_key(&mut self, key: AppKey) {
        self.key = key;
    }

    fn validate(&self, fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()?;
        if fields.has(Self::FIELD_ACCESS_PORTS) {
            validate_access_ports(&self.access_ports)?;
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && field_matches(&self.image_path, &filter.image_path)
            && field_matches(&self.image_type, &filter.image_type)
            && field_matches(&self.access_ports, &filter.access_ports)
            && self.default_flavor.matches(&filter.default_flavor)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }

    fn uses_org(&self, org: &str) -> bool {
        self.key.developer_key.name == org
    }
}
