//! Entity and key traits, and store key layout.

use crate::error::{StoreError, StoreResult};
use crate::fieldmask::{FieldMap, FieldPath, MaskedFields};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// The unique identifier of an entity.
///
/// Keys are value types and may embed the keys of parent entities. They are
/// stored as part of the store key, so their string form must be stable.
pub trait ObjKey:
    Serialize + DeserializeOwned + Clone + Eq + Hash + Ord + Debug + Default + Send + Sync + 'static
{
    /// Checks that the key identifies an object.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` if a required key field is missing or malformed.
    fn validate_key(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Returns true if this key matches `filter`.
    ///
    /// Zero-valued filter fields leave the corresponding field unconstrained.
    fn matches(&self, filter: &Self) -> bool;

    /// Renders the key as it appears in the store key.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the key cannot be serialized.
    fn key_string(&self) -> StoreResult<String> {
        Ok(edgesync_codec::to_key_string(self)?)
    }

    /// Parses a key from its store-key form.
    ///
    /// # Errors
    ///
    /// Returns a codec error if `s` is not a valid key string.
    fn from_key_string(s: &str) -> StoreResult<Self> {
        Ok(edgesync_codec::from_key_string(s)?)
    }
}

/// A typed record stored under a unique key.
///
/// The `fields` attribute carries the dotted paths set by the caller for a
/// partial update. It is never persisted.
pub trait Entity:
    MaskedFields
    + Serialize
    + DeserializeOwned
    + Clone
    + Default
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
{
    /// Key type.
    type Key: ObjKey;

    /// Type name, used as the store key prefix.
    const TYPE_NAME: &'static str;

    /// Returns the key.
    fn key(&self) -> &Self::Key;

    /// Replaces the key.
    fn set_key(&mut self, key: Self::Key);

    /// Validates the fields named by `fields`.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` describing the first failing field.
    fn validate(&self, fields: &FieldMap) -> StoreResult<()>;

    /// Returns true if this object matches `filter`.
    ///
    /// Every field left at its zero value in `filter` matches anything; any
    /// other field must be equal. The default compares keys only, so types
    /// with fields beyond the key override it.
    fn matches(&self, filter: &Self) -> bool {
        self.key().matches(filter.key())
    }

    /// Returns the field paths set for a partial update.
    fn fields(&self) -> &[String];

    /// Clears the field paths.
    fn clear_fields(&mut self);

    /// Returns every leaf path of this type.
    fn all_fields() -> Vec<String> {
        let mut leaves = Vec::new();
        Self::leaf_paths(&FieldPath::root(), &mut leaves);
        leaves.into_iter().map(FieldPath::into_string).collect()
    }

    /// Returns true if this object references organization `org`.
    fn uses_org(&self, _org: &str) -> bool {
        false
    }
}

/// Returns the mask for a mutation of `obj`.
///
/// An object with no `fields` set is treated as naming every field.
pub fn mask_for<T: Entity>(obj: &T) -> FieldMap {
    if obj.fields().is_empty() {
        FieldMap::all::<T>()
    } else {
        FieldMap::from_fields(obj.fields())
    }
}

/// Returns the store key prefix shared by every object of `T`.
pub fn type_prefix<T: Entity>() -> String {
    format!("{}/", T::TYPE_NAME)
}

/// Returns the store key of an object with key `key`.
///
/// # Errors
///
/// Returns a codec error if the key cannot be serialized.
pub fn db_key<T: Entity>(key: &T::Key) -> StoreResult<String> {
    Ok(format!("{}/{}", T::TYPE_NAME, key.key_string()?))
}

/// Splits a store key into its type name and key string.
///
/// Splits at the first `/`, so key strings may themselves contain `/`.
pub fn parse_db_key(db_key: &str) -> Option<(&str, &str)> {
    db_key.split_once('/')
}

/// Parses the key of a `T` from its store key.
///
/// # Errors
///
/// Returns `Corrupt` if the store key does not belong to `T` or the key
/// string does not parse.
pub fn key_from_db_key<T: Entity>(db_key: &str) -> StoreResult<T::Key> {
    match parse_db_key(db_key) {
        Some((type_name, key_str)) if type_name == T::TYPE_NAME => T::Key::from_key_string(key_str)
            .map_err(|e| StoreError::corrupt(db_key, e.to_string())),
        _ => Err(StoreError::corrupt(
            db_key,
            format!("not a {} key", T::TYPE_NAME),
        )),
    }
}

/// Encodes an object for storage, dropping its `fields`.
///
/// # Errors
///
/// Returns a codec error if the object cannot be serialized.
pub fn encode_obj<T: Entity>(obj: &T) -> StoreResult<Vec<u8>> {
    if obj.fields().is_empty() {
        Ok(edgesync_codec::to_bytes(obj)?)
    } else {
        let mut stored = obj.clone();
        stored.clear_fields();
        Ok(edgesync_codec::to_bytes(&stored)?)
    }
}

/// Decodes a stored object.
///
/// # Errors
///
/// Returns `Corrupt` naming `db_key` if the bytes do not decode.
pub fn decode_obj<T: Entity>(db_key: &str, bytes: &[u8]) -> StoreResult<T> {
    edgesync_codec::from_bytes(bytes).map_err(|e| StoreError::corrupt(db_key, e.to_string()))
}
