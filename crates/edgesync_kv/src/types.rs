//! Core type definitions.

use std::fmt;

/// Store-wide revision number.
///
/// Every committed write is assigned the next revision. Revisions totally
/// order all mutations across every key sharing a backend. Revision zero
/// never labels a commit; it stands for "absent" or "no constraint".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision(pub u64);

impl Revision {
    /// The zero revision.
    pub const ZERO: Revision = Revision(0);

    /// Creates a new revision.
    #[must_use]
    pub const fn new(rev: u64) -> Self {
        Self(rev)
    }

    /// Returns the raw revision value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next revision.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns true for the zero revision.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rev:{}", self.0)
    }
}

impl From<u64> for Revision {
    fn from(rev: u64) -> Self {
        Self(rev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_ordering() {
        assert!(Revision::new(1) < Revision::new(2));
        assert!(Revision::ZERO.is_zero());
        assert_eq!(Revision::new(5).next(), Revision::new(6));
    }

    #[test]
    fn revision_display() {
        assert_eq!(format!("{}", Revision::new(42)), "rev:42");
    }
}
