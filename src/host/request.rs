//! Owned request implementation.
//!
//! [`OwnedRequest`] is the request value host adapters build from whatever
//! their substrate hands them (an HTTP request line, a WebSocket upgrade).

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};

use super::{Params, Request};

// ============================================================================
// Constants
// ============================================================================

/// Base used to resolve origin-form request targets such as `/echo?x=1`.
const RELATIVE_BASE: &str = "http://localhost/";

// ============================================================================
// OwnedRequest
// ============================================================================

/// A fully owned [`Request`].
///
/// # Example
///
/// ```ignore
/// let request = OwnedRequest::from_uri("/echo/send?connectionId=c1")?
///     .with_form("data", "ping");
/// ```
#[derive(Debug, Clone, Default)]
pub struct OwnedRequest {
    path: String,
    query_string: Params,
    headers: Params,
    form: Params,
    cookies: Params,
}

impl OwnedRequest {
    /// Creates a request for a path with no parameters.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a request from an absolute URL or an origin-form target.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the target cannot be parsed.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(RELATIVE_BASE)
            .and_then(|base| base.join(uri))
            .map_err(|e| Error::invalid_argument(format!("invalid request target {uri:?}: {e}")))?;

        Ok(Self {
            path: url.path().to_string(),
            query_string: url.query_pairs().into_owned().collect(),
            ..Self::default()
        })
    }

    /// Adds a query parameter.
    #[inline]
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_string.insert(name, value);
        self
    }

    /// Adds a form field.
    #[inline]
    #[must_use]
    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name, value);
        self
    }

    /// Replaces the form with a url-encoded body.
    #[inline]
    #[must_use]
    pub fn with_form_body(mut self, body: &str) -> Self {
        self.form = Params::parse(body);
        self
    }

    /// Adds a header.
    ///
    /// A `Cookie` header is also split into the cookie collection.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("cookie") {
            for pair in value.split(';') {
                if let Some((key, val)) = pair.split_once('=') {
                    self.cookies.insert(key.trim(), val.trim());
                }
            }
        }
        self.headers.insert(name, value);
        self
    }

    /// Adds a cookie.
    #[inline]
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name, value);
        self
    }
}

impl Request for OwnedRequest {
    fn path(&self) -> &str {
        &self.path
    }

    fn query_string(&self) -> &Params {
        &self.query_string
    }

    fn headers(&self) -> &Params {
        &self.headers
    }

    fn form(&self) -> &Params {
        &self.form
    }

    fn cookies(&self) -> &Params {
        &self.cookies
    }
}

// ============================================================================
// Tests
// ============================================================================
