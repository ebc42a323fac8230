//! Chat protocol on top of the generic WebSocket layer.
//!
//! - [`types`]: the message model and [`create_message`]
//! - [`codec`]: JSON envelopes on the wire
//! - [`Client`]: the facade handed to the application, delivering decoded
//!   events through [`Callbacks`]
//! - [`history`]: lookups over the application's own message history

pub mod client;
pub mod codec;
pub mod endpoint;
pub mod error;
pub mod history;
pub mod types;

pub use client::{Callbacks, Client};
pub use endpoint::participant_endpoint;
pub use error::DecodeError;
pub use types::{ChatEvent, Message, User, UserStatus, create_message};
