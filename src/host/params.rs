//! Name/value collections for query strings, forms, headers and cookies.

// ============================================================================
// Imports
// ============================================================================

use url::form_urlencoded;

// ============================================================================
// Params
// ============================================================================

/// Ordered, multi-valued name/value collection.
///
/// Name lookup is ASCII case-insensitive. Repeated names are kept in
/// arrival order; [`get`](Self::get) joins them with `,`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    /// Entries in arrival order.
    entries: Vec<(String, String)>,
}

impl Params {
    /// Creates an empty collection.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Parses `application/x-www-form-urlencoded` text.
    ///
    /// A leading `?` is ignored so raw query strings can be passed as-is.
    #[must_use]
    pub fn parse(encoded: &str) -> Self {
        let encoded = encoded.strip_prefix('?').unwrap_or(encoded);
        form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect()
    }

    /// Appends a value.
    #[inline]
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Appends a value, builder style.
    #[inline]
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Returns all values for a name joined with `,`.
    ///
    /// Returns `None` if the name is absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self.get_all(name).collect();
        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }

    /// Iterates every value stored under a name.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` if the name is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get_all(name).next().is_some()
    }

    /// Returns the number of entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
