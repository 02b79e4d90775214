//! Field-mask engine.
//!
//! Entity fields are addressed by dotted numeric paths built from field
//! tags: in `App`, tag `2` is the key, tag `1` inside the key is the
//! developer key and tag `2` inside that is the developer name, so the
//! developer name is `"2.1.2"`.
//!
//! A [`FieldMap`] is the prefix closure of a set of such paths. Naming a
//! leaf implicitly names every ancestor, which lets a partial update walk
//! a message top-down and descend only into the sub-messages that contain
//! a masked leaf.
//!
//! Types opt in by implementing [`MaskedFields`], usually through the
//! [`masked_fields!`](crate::masked_fields) macro.

use std::collections::HashSet;
use std::fmt;

/// A dotted numeric path to a field, such as `"2.1.2"`.
///
/// The root path is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldPath(String);

impl FieldPath {
    /// Returns the root path.
    #[must_use]
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Returns the path of the field with `tag` below this one.
    #[must_use]
    pub fn child(&self, tag: u32) -> Self {
        if self.0.is_empty() {
            Self(tag.to_string())
        } else {
            Self(format!("{}.{tag}", self.0))
        }
    }

    /// Returns true for the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the path as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the path and returns its string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The prefix closure of a set of field paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    fields: HashSet<String>,
}

impl FieldMap {
    /// Builds the closure of `fields`.
    ///
    /// `"2.1.2"` contributes `"2"`, `"2.1"` and `"2.1.2"`. Empty entries are
    /// ignored.
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = HashSet::new();
        for field in fields {
            let field = field.as_ref();
            if field.is_empty() {
                continue;
            }
            for (idx, ch) in field.char_indices() {
                if ch == '.' {
                    set.insert(field[..idx].to_string());
                }
            }
            set.insert(field.to_string());
        }
        Self { fields: set }
    }

    /// Builds the mask naming every leaf of `T`.
    #[must_use]
    pub fn all<T: MaskedFields>() -> Self {
        let mut leaves = Vec::new();
        T::leaf_paths(&FieldPath::root(), &mut leaves);
        Self::from_fields(leaves.iter().map(FieldPath::as_str))
    }

    /// Returns true if `path` is in the closure.
    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.fields.contains(path)
    }

    /// Returns true if `path` is in the closure.
    #[must_use]
    pub fn has_path(&self, path: &FieldPath) -> bool {
        self.has(path.as_str())
    }

    /// Returns the number of paths in the closure.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if no path is masked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copies a leaf value if its path is masked.
    ///
    /// Returns 1 if `dst` changed, 0 otherwise.
    pub fn copy_leaf<V: Clone + PartialEq>(&self, dst: &mut V, src: &V, at: &FieldPath) -> usize {
        if self.has_path(at) && dst != src {
            *dst = src.clone();
            1
        } else {
            0
        }
    }

    /// Recurses into a nested message if its path is masked.
    ///
    /// Returns the number of changed leaves.
    pub fn copy_nested<M: MaskedFields>(&self, dst: &mut M, src: &M, at: &FieldPath) -> usize {
        if self.has_path(at) {
            dst.copy_in_fields(src, self, at)
        } else {
            0
        }
    }
}

/// A message whose fields can be copied selectively by a [`FieldMap`].
pub trait MaskedFields {
    /// Copies every masked field of `src` below `at` into `self`.
    ///
    /// Lists and byte vectors are leaves and are replaced wholesale.
    /// Returns the number of leaves that changed.
    fn copy_in_fields(&mut self, src: &Self, mask: &FieldMap, at: &FieldPath) -> usize;

    /// Appends the path of every leaf below `at`.
    fn leaf_paths(at: &FieldPath, out: &mut Vec<FieldPath>);
}

/// Implements [`MaskedFields`] for a struct from a tag table.
///
/// Each entry maps a field tag to a struct field. Nested messages are
/// marked with their type and are recursed into; every other field is a
/// leaf.
///
/// ```
/// use edgesync_core::fieldmask::{FieldMap, FieldPath, MaskedFields};
/// use edgesync_core::masked_fields;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Inner { name: String, version: String }
/// masked_fields!(Inner { 1 => name, 2 => version });
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Outer { inner: Inner, ports: Vec<u16> }
/// masked_fields!(Outer { 1 => inner: Inner, 2 => ports });
///
/// let mut dst = Outer::default();
/// let src = Outer {
///     inner: Inner { name: "a".into(), version: "1".into() },
///     ports: vec![80],
/// };
/// let mask = FieldMap::from_fields(["1.2"]);
/// assert_eq!(dst.copy_in_fields(&src, &mask, &FieldPath::root()), 1);
/// assert_eq!(dst.inner.version, "1");
/// assert!(dst.inner.name.is_empty());
/// assert!(dst.ports.is_empty());
/// ```
#[macro_export]
macro_rules! masked_fields {
    (@copy [] $mask:ident, $dst:expr, $src:expr, $path:expr) => {
        $mask.copy_leaf(&mut $dst, &$src, &$path)
    };
    (@copy [$sub:ty] $mask:ident, $dst:expr, $src:expr, $path:expr) => {
        $mask.copy_nested(&mut $dst, &$src, &$path)
    };
    (@leaf [] $out:ident, $path:expr) => {
        $out.push($path)
    };
    (@leaf [$sub:ty] $out:ident, $path:expr) => {
        <$sub as $crate::fieldmask::MaskedFields>::leaf_paths(&$path, $out)
    };
    ($ty:ty { $($tag:literal => $field:ident $(: $sub:ty)?),* $(,)? }) => {
        impl $crate::fieldmask::MaskedFields for $ty {
            fn copy_in_fields(
                &mut self,
                src: &Self,
                mask: &$crate::fieldmask::FieldMap,
                at: &$crate::fieldmask::FieldPath,
            ) -> usize {
                let mut changed = 0;
                $(
                    changed += $crate::masked_fields!(
                        @copy [$($sub)?] mask, self.$field, src.$field, at.child($tag)
                    );
                )*
                changed
            }

            fn leaf_paths(
                at: &$crate::fieldmask::FieldPath,
                out: &mut Vec<$crate::fieldmask::FieldPath>,
            ) {
                $(
                    $crate::masked_fields!(@leaf [$($sub)?] out, at.child($tag));
                )*
            }
        }
    };
}
