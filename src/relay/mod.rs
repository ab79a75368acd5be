//! Cross-process relay plumbing.
//!
//! Scale-out relaying between server processes is out of scope; this module
//! carries only the async HTTP helper such a relay is built on.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `http` | Form posts, gets and best-effort body reads |

// ============================================================================
// Submodules
// ============================================================================

/// Async HTTP helper.
pub mod http;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::{HttpHelper, encode_form};
