//! The entity catalogue.
//!
//! Field tags follow the persisted schema: tag 1 of every entity is the
//! unpersisted `fields` list and tag 2 is the key.

mod app;
mod app_inst;
mod cloudlet;
mod controller;
mod flavor;
mod operator;
mod settings;

pub use app::{App, AppKey, DeveloperKey, ImageType};
pub use app_inst::{AppInst, AppInstKey, Liveness};
pub use cloudlet::{Cloudlet, CloudletKey, Loc};
pub use controller::{Controller, ControllerKey};
pub use flavor::{Flavor, FlavorKey};
pub use operator::{Operator, OperatorKey};
pub use settings::{
    FlowAlgorithm, FlowSettings, MaxReqsSettings, RateLimitSettings, RateLimitSettingsKey,
    Settings, SettingsKey,
};

use crate::error::{StoreError, StoreResult};

/// Fails with `Invalid` if `value` is empty.
pub(crate) fn require(value: &str, what: &str) -> StoreResult<()> {
    if value.is_empty() {
        Err(StoreError::invalid(format!("missing {what}")))
    } else {
        Ok(())
    }
}

/// Returns true if `filter` is empty or equal to `value`.
pub(crate) fn field_matches<V: PartialEq + Default>(value: &V, filter: &V) -> bool {
    *filter == V::default() || value == filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_filter_matches_anything() {
        assert!(field_matches(&"a".to_string(), &String::new()));
        assert!(field_matches(&"a".to_string(), &"a".to_string()));
        assert!(!field_matches(&"a".to_string(), &"b".to_string()));
        assert!(field_matches(&7u64, &0));
    }
}
