//! Core WebSocket infrastructure.
//!
//! This module provides generic connection management that is specialized for
//! the chat protocol through the [`FrameHandler`] trait.
//!
//! # Architecture
//!
//! - [`session::Session`]: I/O-free lifecycle state machine with bounded backoff
//! - [`ConnectionManager`]: async driver that owns the transport, the retry timer and the handler
//! - [`FrameHandler`]: trait for consuming inbound text frames
//!
//! # Example
//!
//! ```ignore
//! let mut connection = ConnectionManager::new(endpoint, Config::default(), MyHandler);
//! connection.connect()?;
//! let mut states = connection.state_receiver();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod session;
pub mod traits;

pub use connection::ConnectionManager;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use session::{CloseKind, ConnectionState, Termination};
pub use traits::*;
