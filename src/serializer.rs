//! Serialize-to-text capability.
//!
//! The transport never calls `serde_json` directly on the outbound path;
//! it goes through a [`JsonSerializer`] so hosts can swap the encoding.

use serde_json::Value;

use crate::error::Result;

/// Turns values into the text written to the client.
pub trait JsonSerializer: Send + Sync {
    /// Serializes a value to text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the value cannot be encoded.
    fn stringify(&self, value: &Value) -> Result<String>;

    /// Parses text produced by [`stringify`](Self::stringify).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) on malformed input.
    fn parse(&self, text: &str) -> Result<Value>;
}

/// Compact JSON via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeJsonSerializer;

impl JsonSerializer for SerdeJsonSerializer {
    fn stringify(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn parse(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }
}
