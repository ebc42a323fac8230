#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

use super::session::ConnectionState;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// A frame was submitted while no transport was open
    NotConnected {
        /// State the connection was in when the frame was rejected
        state: ConnectionState,
    },
    /// WebSocket connection was closed
    ConnectionClosed,
    /// The endpoint is not a usable WebSocket URL
    InvalidEndpoint(String),
    /// No Pong arrived within the heartbeat timeout
    HeartbeatTimeout,
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::NotConnected { state } => {
                write!(f, "WebSocket is not open (state: {state}), frame dropped")
            }
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::InvalidEndpoint(reason) => write!(f, "Invalid WebSocket endpoint: {reason}"),
            Self::HeartbeatTimeout => write!(f, "WebSocket heartbeat timed out"),
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        let kind = match e {
            WsError::InvalidEndpoint(_) => crate::error::Kind::Validation,
            _ => crate::error::Kind::WebSocket,
        };
        crate::error::Error::with_source(kind, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
