//! Interned string identifier.

use std::fmt;

/// Interned string identifier (function names, type names, constructor names).
///
/// A `Name` is an index into a [`StringInterner`](crate::StringInterner).
/// Two names from the same interner are equal iff their strings are equal.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "cache", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct Name(u32);

impl Name {
    /// Pre-interned empty string.
    pub const EMPTY: Name = Name(0);

    /// Get raw u32 value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Create from raw u32 value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Name(raw)
    }

    /// Index into the interner's string table.
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

impl Default for Name {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_raw_round_trip() {
        assert_eq!(Name::from_raw(17).raw(), 17);
    }

    #[test]
    fn name_default_is_empty() {
        assert_eq!(Name::default(), Name::EMPTY);
    }

    #[test]
    fn name_ord() {
        assert!(Name::from_raw(1) < Name::from_raw(2));
    }
}
