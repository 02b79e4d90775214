//! # EdgeSync Testkit
//!
//! Test utilities for EdgeSync.
//!
//! This crate provides:
//! - Fixtures: an in-memory backend with typed stores and running syncs
//! - Property-based test generators using proptest
//! - Test logging setup
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use edgesync_testkit::prelude::*;
//!
//! let env = TestEnv::new();
//! let flavors = env.synced::<edgesync_core::entities::Flavor>();
//! let rev = flavors.store.create(&sample_flavor("x1.small", 1024), None).unwrap();
//! flavors.wait(rev);
//! assert_eq!(flavors.cache.count(), 1);
//! flavors.stop();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use stress::*;
