//! Re-exported types from external crates for convenience.
//!
//! These types appear in this crate's public API and are re-exported here
//! so users don't need to add these dependencies to their `Cargo.toml`.

/// Date and time types for message timestamps.
pub use chrono::{DateTime, Utc};
/// Parsed WebSocket endpoint addresses.
pub use url::Url;
