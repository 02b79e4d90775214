//! # EdgeSync Codec
//!
//! Encoding of entity values and keys for EdgeSync.
//!
//! Two encodings are used:
//!
//! - Entity values are stored as CBOR ([`to_bytes`] / [`from_bytes`])
//! - Entity keys are rendered as compact JSON strings
//!   ([`to_key_string`] / [`from_key_string`]) so they can be embedded in a
//!   store key such as `App/{"name":"face"}`
//!
//! Key strings are deterministic: struct fields are emitted in declaration
//! order and never contain a newline, so equal keys always produce equal
//! store keys.
//!
//! ## Usage
//!
//! ```
//! use edgesync_codec::{from_bytes, from_key_string, to_bytes, to_key_string};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct FlavorKey {
//!     name: String,
//! }
//!
//! let key = FlavorKey { name: "x1.small".into() };
//! let s = to_key_string(&key).unwrap();
//! assert_eq!(s, r#"{"name":"x1.small"}"#);
//! assert_eq!(from_key_string::<FlavorKey>(&s).unwrap(), key);
//!
//! let bytes = to_bytes(&key).unwrap();
//! assert_eq!(from_bytes::<FlavorKey>(&bytes).unwrap(), key);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod keystr;

pub use cbor::{from_bytes, to_bytes};
pub use error::{CodecError, CodecResult};
pub use keystr::{from_key_string, to_key_string};
