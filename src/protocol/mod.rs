//! Message and signal types shared by the transport and its collaborators.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `PersistentResponse` | Store → Transport → Client | One delivery with its cursor |
//! | `SignalCommand` | Transport → Store | Fire-and-forget control command |
//! | `Groups` | Exchange → Store | Multicast scope of the exchange |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `groups` | Comma-separated group parsing |
//! | `response` | Response written to the client |
//! | `signal` | Control commands and expiry |

// ============================================================================
// Submodules
// ============================================================================

/// Group label parsing.
pub mod groups;

/// Response message type.
pub mod response;

/// Control signal types.
pub mod signal;

// ============================================================================
// Re-exports
// ============================================================================

pub use groups::Groups;
pub use response::PersistentResponse;
pub use signal::{CommandType, DEFAULT_DISCONNECT_EXPIRY, SignalCommand};
