//! Group membership labels for one exchange.
//!
//! Groups arrive as a comma-separated `groups` field in the query string
//! or form body and are parsed once per exchange.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeSet;
use std::collections::btree_set;

// ============================================================================
// Constants
// ============================================================================

/// Separator between group labels.
pub const GROUP_SEPARATOR: char = ',';

// ============================================================================
// Groups
// ============================================================================

/// Set of group labels derived from the exchange.
///
/// Empty segments are kept as the empty label: `"a,,b"` yields
/// `{"", "a", "b"}`. Labels are not trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Groups(BTreeSet<String>);

impl Groups {
    /// Parses a comma-separated group field.
    ///
    /// Absent or empty input yields an empty set.
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::default(),
            Some(value) => Self(value.split(GROUP_SEPARATOR).map(str::to_owned).collect()),
        }
    }

    /// Returns `true` if the label is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, group: &str) -> bool {
        self.0.contains(group)
    }

    /// Returns the number of distinct labels.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no labels.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates labels in sorted order.
    #[inline]
    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }
}

impl<'a> IntoIterator for &'a Groups {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<S: Into<String>> FromIterator<S> for Groups {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

// ============================================================================
// Tests
// ============================================================================
