//! Connection lifecycle as a pure state machine.
//!
//! [`Session`] performs no I/O and owns no timers. Each input returns a
//! [`Step`] telling the driver in [`super::connection`] what to do next, which
//! keeps every transition observable in plain unit tests.

use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;

use super::config::{ReconnectBackoff, ReconnectConfig};
use crate::ABNORMAL_CLOSE_CODE;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    /// Created, `connect` not called yet
    Idle,
    /// A transport is being established
    Connecting,
    /// A transport is open and frames flow both ways
    Open {
        /// When the transport was established
        since: Instant,
    },
    /// Waiting out the backoff delay after an abnormal closure
    ReconnectPending {
        /// Reconnection attempt that will follow the delay (1-based)
        attempt: u32,
        /// Delay before that attempt
        delay: Duration,
    },
    /// Explicit close requested, close handshake in progress
    Closing,
    /// Terminal state
    Closed(Termination),
}

impl ConnectionState {
    /// Check if frames can currently be written.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// Check if the session has ended for good.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed(_))
    }
}

/// Why a session reached [`ConnectionState::Closed`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Termination {
    /// The application called `close`
    Requested,
    /// The server closed the connection with a graceful close code
    ServerClosed {
        /// Close code sent by the server, if any
        code: Option<u16>,
    },
    /// Every reconnection attempt failed
    GaveUp {
        /// Reconnection attempts made before giving up
        attempts: u32,
    },
}

/// How a transport ended.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Ungraceful termination: triggers reconnection
    Abnormal,
    /// Close handshake with a graceful code: never triggers reconnection
    Normal {
        /// Close code from the close frame, if any
        code: Option<u16>,
    },
}

impl CloseKind {
    /// Classify a close frame's status code.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        if code == ABNORMAL_CLOSE_CODE {
            Self::Abnormal
        } else {
            Self::Normal { code: Some(code) }
        }
    }

    #[must_use]
    pub const fn is_abnormal(self) -> bool {
        matches!(self, Self::Abnormal)
    }
}

/// What the driver should do after feeding an input to the [`Session`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Open a new transport
    Connect,
    /// Keep serving the current transport
    Continue,
    /// Sleep for the delay, then report [`Session::retry_elapsed`]
    Retry(Duration),
    /// Close the current transport without promoting it
    Teardown,
    /// The session is over
    Finished(Termination),
    /// The input does not apply in the current state
    Ignore,
}

/// Per-connection state: lifecycle state and the reconnect attempt counter.
#[derive(Debug, Clone)]
pub struct Session {
    state: ConnectionState,
    backoff: ReconnectBackoff,
}

impl Session {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff: config.into(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Consecutive reconnection attempts since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Start the session. Only valid from [`ConnectionState::Idle`].
    pub fn connect(&mut self) -> Step {
        match self.state {
            ConnectionState::Idle => {
                self.state = ConnectionState::Connecting;
                Step::Connect
            }
            ConnectionState::Closed(_) => {
                tracing::warn!("connect called on a closed session, create a new client instead");
                Step::Ignore
            }
            state => {
                tracing::debug!(%state, "connect ignored, session already active");
                Step::Ignore
            }
        }
    }

    /// The transport finished its handshake.
    ///
    /// Only a pending connect is promoted to open. An open that lands after
    /// `close` must be torn down.
    pub fn opened(&mut self, now: Instant) -> Step {
        match self.state {
            ConnectionState::Connecting => {
                self.backoff.reset();
                self.state = ConnectionState::Open { since: now };
                Step::Continue
            }
            state => {
                tracing::debug!(%state, "late transport open, tearing it down");
                Step::Teardown
            }
        }
    }

    /// The transport (or the attempt to establish it) ended.
    pub fn transport_closed(&mut self, kind: CloseKind) -> Step {
        match self.state {
            ConnectionState::Open { .. } | ConnectionState::Connecting => match kind {
                CloseKind::Abnormal => match self.backoff.next_backoff() {
                    Some(delay) => {
                        self.state = ConnectionState::ReconnectPending {
                            attempt: self.backoff.attempt(),
                            delay,
                        };
                        Step::Retry(delay)
                    }
                    None => self.finish(Termination::GaveUp {
                        attempts: self.backoff.attempt(),
                    }),
                },
                CloseKind::Normal { code } => self.finish(Termination::ServerClosed { code }),
            },
            ConnectionState::Closing => self.finish(Termination::Requested),
            _ => Step::Ignore,
        }
    }

    /// The backoff delay elapsed.
    pub fn retry_elapsed(&mut self) -> Step {
        match self.state {
            ConnectionState::ReconnectPending { .. } => {
                self.state = ConnectionState::Connecting;
                Step::Connect
            }
            _ => Step::Ignore,
        }
    }

    /// Explicit close. Never leads to a reconnection.
    pub fn close(&mut self) -> Step {
        match self.state {
            ConnectionState::Open { .. } => {
                self.state = ConnectionState::Closing;
                Step::Teardown
            }
            ConnectionState::Idle
            | ConnectionState::Connecting
            | ConnectionState::ReconnectPending { .. } => self.finish(Termination::Requested),
            ConnectionState::Closing | ConnectionState::Closed(_) => Step::Ignore,
        }
    }

    fn finish(&mut self, termination: Termination) -> Step {
        self.state = ConnectionState::Closed(termination);
        Step::Finished(termination)
    }
}
