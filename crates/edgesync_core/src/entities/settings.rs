use super::{field_matches, require};
use crate::error::{StoreError, StoreResult};
use crate::fieldmask::FieldMap;
use crate::object::{Entity, ObjKey};
use serde::{Deserialize, Serialize};

/// Key string of the one settings object.
const SETTINGS_KEY_STRING: &str = "settings";

/// The key of the singleton [`Settings`] object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SettingsKey;

impl ObjKey for SettingsKey {
    fn matches(&self, _filter: &Self) -> bool {
        true
    }

    fn key_string(&self) -> StoreResult<String> {
        Ok(SETTINGS_KEY_STRING.to_string())
    }

    fn from_key_string(s: &str) -> StoreResult<Self> {
        if s == SETTINGS_KEY_STRING {
            Ok(Self)
        } else {
            Err(StoreError::invalid(format!("invalid settings key {s:?}")))
        }
    }
}

/// Region-wide tunables. There is exactly one settings object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Seconds between metrics collections.
    pub shepherd_metrics_collection_interval_sec: u64,
    /// Failed health checks before an instance is marked down.
    pub shepherd_health_check_retries: u32,
    /// Seconds between auto-deploy evaluations.
    pub auto_deploy_interval_sec: f64,
    /// Offset into the auto-deploy interval, in seconds.
    pub auto_deploy_offset_sec: f64,
    /// Largest port range a load balancer may expose.
    pub load_balancer_max_port_range: u32,
    /// Seconds allowed for an instance create.
    pub create_app_inst_timeout_sec: u64,
    /// Flavor used for master nodes. Empty means unset.
    pub master_node_flavor: String,
    /// Number of clients tracked per instance.
    pub max_tracked_dme_clients: u32,
}

crate::masked_fields!(Settings {
    2 => shepherd_metrics_collection_interval_sec,
    3 => shepherd_health_check_retries,
    4 => auto_deploy_interval_sec,
    5 => auto_deploy_offset_sec,
    6 => load_balancer_max_port_range,
    7 => create_app_inst_timeout_sec,
    8 => master_node_flavor,
    9 => max_tracked_dme_clients,
});

impl Settings {
    /// Path of `shepherd_metrics_collection_interval_sec`.
    pub const FIELD_SHEPHERD_METRICS_COLLECTION_INTERVAL: &'static str = "2";
    /// Path of `shepherd_health_check_retries`.
    pub const FIELD_SHEPHERD_HEALTH_CHECK_RETRIES: &'static str = "3";
    /// Path of `auto_deploy_interval_sec`.
    pub const FIELD_AUTO_DEPLOY_INTERVAL_SEC: &'static str = "4";
    /// Path of `auto_deploy_offset_sec`.
    pub const FIELD_AUTO_DEPLOY_OFFSET_SEC: &'static str = "5";
    /// Path of `load_balancer_max_port_range`.
    pub const FIELD_LOAD_BALANCER_MAX_PORT_RANGE: &'static str = "6";
    /// Path of `create_app_inst_timeout_sec`.
    pub const FIELD_CREATE_APP_INST_TIMEOUT: &'static str = "7";
    /// Path of `master_node_flavor`.
    pub const FIELD_MASTER_NODE_FLAVOR: &'static str = "8";
    /// Path of `max_tracked_dme_clients`.
    pub const FIELD_MAX_TRACKED_DME_CLIENTS: &'static str = "9";

    /// Returns the settings a fresh region starts with.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            fields: Vec::new(),
            shepherd_metrics_collection_interval_sec: 5,
            shepherd_health_check_retries: 3,
            auto_deploy_interval_sec: 300.0,
            auto_deploy_offset_sec: 20.0,
            load_balancer_max_port_range: 50,
            create_app_inst_timeout_sec: 30 * 60,
            master_node_flavor: String::new(),
            max_tracked_dme_clients: 100,
        }
    }
}

fn check_gt(field: &str, value: f64, min: f64) -> StoreResult<()> {
    if value > min {
        Ok(())
    } else {
        Err(StoreError::invalid(format!(
            "invalid {field}: {value} must be greater than {min}"
        )))
    }
}

fn check_ge(field: &str, value: f64, min: f64) -> StoreResult<()> {
    if value >= min {
        Ok(())
    } else {
        Err(StoreError::invalid(format!(
            "invalid {field}: {value} must be at least {min}"
        )))
    }
}

impl Entity for Settings {
    type Key = SettingsKey;
    const TYPE_NAME: &'static str = "Settings";

    fn key(&self) -> &SettingsKey {
        &SettingsKey
    }

    fn set_key(&mut self, _key: SettingsKey) {}

    fn validate(&self, fields: &FieldMap) -> StoreResult<()> {
        if fields.has(Self::FIELD_SHEPHERD_METRICS_COLLECTION_INTERVAL) {
            check_gt(
                "shepherd_metrics_collection_interval_sec",
                self.shepherd_metrics_collection_interval_sec as f64,
                0.0,
            )?;
        }
        if fields.has(Self::FIELD_SHEPHERD_HEALTH_CHECK_RETRIES) {
            check_gt(
                "shepherd_health_check_retries",
                f64::from(self.shepherd_health_check_retries),
                0.0,
            )?;
        }
        if fields.has(Self::FIELD_AUTO_DEPLOY_INTERVAL_SEC) {
            check_gt("auto_deploy_interval_sec", self.auto_deploy_interval_sec, 0.0)?;
        }
        if fields.has(Self::FIELD_AUTO_DEPLOY_OFFSET_SEC) {
            check_ge("auto_deploy_offset_sec", self.auto_deploy_offset_sec, 0.0)?;
        }
        if fields.has(Self::FIELD_LOAD_BALANCER_MAX_PORT_RANGE) {
            let range = self.load_balancer_max_port_range;
            if range == 0 || range >= 65536 {
                return Err(StoreError::invalid(format!(
                    "invalid load_balancer_max_port_range: {range} must be between 1 and 65535"
                )));
            }
        }
        if fields.has(Self::FIELD_CREATE_APP_INST_TIMEOUT) {
            check_gt(
                "create_app_inst_timeout_sec",
                self.create_app_inst_timeout_sec as f64,
                0.0,
            )?;
        }
        if fields.has(Self::FIELD_MAX_TRACKED_DME_CLIENTS) {
            check_gt(
                "max_tracked_dme_clients",
                f64::from(self.max_tracked_dme_clients),
                0.0,
            )?;
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(
            &self.shepherd_metrics_collection_interval_sec,
            &filter.shepherd_metrics_collection_interval_sec,
        ) && field_matches(
            &self.shepherd_health_check_retries,
            &filter.shepherd_health_check_retries,
        ) && field_matches(&self.auto_deploy_interval_sec, &filter.auto_deploy_interval_sec)
            && field_matches(&self.auto_deploy_offset_sec, &filter.auto_deploy_offset_sec)
            && field_matches(
                &self.load_balancer_max_port_range,
                &filter.load_balancer_max_port_range,
            )
            && field_matches(
                &self.create_app_inst_timeout_sec,
                &filter.create_app_inst_timeout_sec,
            )
            && field_matches(&self.master_node_flavor, &filter.master_node_flavor)
            && field_matches(&self.max_tracked_dme_clients, &filter.max_tracked_dme_clients)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }
}

/// Identifies a rate limit rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettingsKey {
    /// API the rule applies to.
    pub api_name: String,
    /// Endpoint class, e.g. `Dme`.
    pub api_endpoint_type: String,
    /// What is limited, e.g. `AllRequests` or `PerIp`.
    pub rate_limit_target: String,
}

crate::masked_fields!(RateLimitSettingsKey {
    1 => api_name,
    2 => api_endpoint_type,
    3 => rate_limit_target,
});

impl ObjKey for RateLimitSettingsKey {
    fn validate_key(&self) -> StoreResult<()> {
        require(&self.api_name, "rate limit api name")?;
        require(&self.api_endpoint_type, "rate limit endpoint type")?;
        require(&self.rate_limit_target, "rate limit target")
    }

    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.api_name, &filter.api_name)
            && field_matches(&self.api_endpoint_type, &filter.api_endpoint_type)
            && field_matches(&self.rate_limit_target, &filter.rate_limit_target)
    }
}

/// Token algorithm of a flow limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAlgorithm {
    /// Not set.
    #[default]
    Unknown,
    /// Token bucket.
    TokenBucket,
    /// Leaky bucket.
    LeakyBucket,
}

/// A steady-rate limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    /// Algorithm used.
    pub flow_algorithm: FlowAlgorithm,
    /// Sustained requests per second.
    pub reqs_per_second: f64,
    /// Requests allowed in a burst.
    pub burst_size: i64,
}

impl FlowSettings {
    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.flow_algorithm, &filter.flow_algorithm)
            && field_matches(&self.reqs_per_second, &filter.reqs_per_second)
            && field_matches(&self.burst_size, &filter.burst_size)
    }
}

crate::masked_fields!(FlowSettings {
    1 => flow_algorithm,
    2 => reqs_per_second,
    3 => burst_size,
});

/// A fixed-window request cap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaxReqsSettings {
    /// Requests allowed per window.
    pub max_requests: i64,
    /// Window length in seconds.
    pub interval_sec: u64,
}

impl MaxReqsSettings {
    fn matches(&self, filter: &Self) -> bool {
        field_matches(&self.max_requests, &filter.max_requests)
            && field_matches(&self.interval_sec, &filter.interval_sec)
    }
}

crate::masked_fields!(MaxReqsSettings {
    1 => max_requests,
    2 => interval_sec,
});

/// A rate limit rule for one API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Fields set for a partial update.
    #[serde(skip)]
    pub fields: Vec<String>,
    /// Unique key.
    pub key: RateLimitSettingsKey,
    /// Steady-rate limit.
    pub flow_settings: FlowSettings,
    /// Fixed-window cap.
    pub max_reqs_settings: MaxReqsSettings,
}

crate::masked_fields!(RateLimitSettings {
    2 => key: RateLimitSettingsKey,
    3 => flow_settings: FlowSettings,
    4 => max_reqs_settings: MaxReqsSettings,
});

impl RateLimitSettings {
    /// Path of the key.
    pub const FIELD_KEY: &'static str = "2";
    /// Path of the flow algorithm.
    pub const FIELD_FLOW_SETTINGS_FLOW_ALGORITHM: &'static str = "3.1";
    /// Path of the sustained request rate.
    pub const FIELD_FLOW_SETTINGS_REQS_PER_SECOND: &'static str = "3.2";
    /// Path of the burst size.
    pub const FIELD_FLOW_SETTINGS_BURST_SIZE: &'static str = "3.3";
    /// Path of the request cap.
    pub const FIELD_MAX_REQS_SETTINGS_MAX_REQUESTS: &'static str = "4.1";
    /// Path of the window length.
    pub const FIELD_MAX_REQS_SETTINGS_INTERVAL: &'static str = "4.2";
}

impl Entity for RateLimitSettings {
    type Key = RateLimitSettingsKey;
    const TYPE_NAME: &'static str = "RateLimitSettings";

    fn key(&self) -> &RateLimitSettingsKey {
        &self.key
    }

    fn set_key(&mut self, key: RateLimitSettingsKey) {
        self.key = key;
    }

    fn validate(&self, fields: &FieldMap) -> StoreResult<()> {
        self.key.validate_key()?;
        if fields.has(Self::FIELD_FLOW_SETTINGS_REQS_PER_SECOND) {
            check_gt("reqs_per_second", self.flow_settings.reqs_per_second, 0.0)?;
        }
        if fields.has(Self::FIELD_FLOW_SETTINGS_BURST_SIZE) {
            check_gt("burst_size", self.flow_settings.burst_size as f64, 0.0)?;
        }
        if fields.has(Self::FIELD_MAX_REQS_SETTINGS_MAX_REQUESTS) {
            check_gt("max_requests", self.max_reqs_settings.max_requests as f64, 0.0)?;
        }
        if fields.has(Self::FIELD_MAX_REQS_SETTINGS_INTERVAL) {
            check_gt("interval_sec", self.max_reqs_settings.interval_sec as f64, 0.0)?;
        }
        Ok(())
    }

    fn matches(&self, filter: &Self) -> bool {
        self.key.matches(&filter.key)
            && self.flow_settings.matches(&filter.flow_settings)
            && self.max_reqs_settings.matches(&filter.max_reqs_settings)
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn clear_fields(&mut self) {
        self.fields.clear();
    }
}
