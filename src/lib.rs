#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod chat;
pub mod error;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Path prefix under which the chat server expects participants to connect.
pub const PARTICIPANT_PATH: &str = "ws";

/// Close code sent by this client when the session is closed on purpose.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Close code denoting a transport that went away without a close handshake.
pub const ABNORMAL_CLOSE_CODE: u16 = 1006;
