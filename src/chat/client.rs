use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::codec;
use super::endpoint::parse_endpoint;
use super::types::{ChatEvent, Message, User};
use crate::Result;
use crate::ws::config::Config;
use crate::ws::{ConnectionManager, ConnectionState, FrameHandler, Termination, WsError};

type MessageCallback = Box<dyn FnMut(Message) + Send>;
type PresenceCallback = Box<dyn FnMut(Vec<User>) + Send>;
type TypingCallback = Box<dyn FnMut(String, bool) + Send>;
type ClosedCallback = Box<dyn FnMut(Termination) + Send>;

/// Event callbacks registered by the application.
///
/// Callbacks run on the connection task, one at a time, in the order frames
/// arrived. They must not block; a panic inside one is caught and logged.
pub struct Callbacks {
    on_message: MessageCallback,
    on_presence_update: PresenceCallback,
    on_typing: TypingCallback,
    on_closed: Option<ClosedCallback>,
}

impl Callbacks {
    pub fn new<M, P, T>(on_message: M, on_presence_update: P, on_typing: T) -> Self
    where
        M: FnMut(Message) + Send + 'static,
        P: FnMut(Vec<User>) + Send + 'static,
        T: FnMut(String, bool) + Send + 'static,
    {
        Self {
            on_message: Box::new(on_message),
            on_presence_update: Box::new(on_presence_update),
            on_typing: Box::new(on_typing),
            on_closed: None,
        }
    }

    /// Be notified once when the session ends without an explicit
    /// [`Client::close`]: the server closed it, or reconnection gave up.
    #[must_use]
    pub fn on_closed<C>(mut self, on_closed: C) -> Self
    where
        C: FnMut(Termination) + Send + 'static,
    {
        self.on_closed = Some(Box::new(on_closed));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_closed", &self.on_closed.is_some())
            .finish_non_exhaustive()
    }
}

/// Decodes inbound frames and routes them to the application's callbacks.
///
/// Shares the close token with the connection: once [`Client::close`] has
/// returned, no callback starts.
struct EventDispatcher {
    callbacks: Callbacks,
    closed: CancellationToken,
}

impl EventDispatcher {
    fn dispatch(&mut self, event: ChatEvent) {
        // Decoding can take a while; `close` may have returned meanwhile.
        if self.closed.is_cancelled() {
            tracing::debug!("client closed, dropping decoded event");
            return;
        }

        let callbacks = &mut self.callbacks;
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            ChatEvent::Message(message) => (callbacks.on_message)(message),
            ChatEvent::Presence(users) => (callbacks.on_presence_update)(users),
            ChatEvent::Typing { sender, is_typing } => (callbacks.on_typing)(sender, is_typing),
        }));

        if outcome.is_err() {
            tracing::error!("event callback panicked, continuing with the next frame");
        }
    }
}

impl FrameHandler for EventDispatcher {
    fn on_text(&mut self, text: &str) {
        match codec::decode(text) {
            Ok(event) => self.dispatch(event),
            Err(e) => tracing::warn!(error = %e, frame = %text, "dropping undecodable frame"),
        }
    }

    fn on_terminated(&mut self, termination: Termination) {
        if termination == Termination::Requested || self.closed.is_cancelled() {
            return;
        }

        if let Some(on_closed) = self.callbacks.on_closed.as_mut()
            && catch_unwind(AssertUnwindSafe(|| on_closed(termination))).is_err()
        {
            tracing::error!(%termination, "on_closed callback panicked");
        }
    }
}

/// Chat client for one participant connection.
///
/// Wraps a [`ConnectionManager`] that reconnects with bounded backoff after
/// abnormal closures. Sends are synchronous and never block: while the
/// connection is not open they are logged and dropped, nothing is queued.
///
/// # Examples
///
/// ```rust, no_run
/// use duplex_chat_client::chat::{Callbacks, Client, create_message, participant_endpoint};
/// use duplex_chat_client::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> duplex_chat_client::Result<()> {
///     let endpoint = participant_endpoint("ws://localhost:8000", "alice")?;
///     let callbacks = Callbacks::new(
///         |message| println!("{}: {}", message.sender, message.content),
///         |users| println!("{} online", users.len()),
///         |sender, typing| println!("{sender} typing: {typing}"),
///     );
///
///     let client = Client::open(endpoint.as_str(), Config::default(), callbacks)?;
///     client.send_message(&create_message("alice", "hi", None));
///     client.close();
///
///     Ok(())
/// }
/// ```
pub struct Client {
    connection: ConnectionManager<EventDispatcher>,
}

impl Client {
    /// Create an idle client. Fails if `endpoint` is not a `ws`/`wss` URL.
    pub fn new(endpoint: &str, config: Config, callbacks: Callbacks) -> Result<Self> {
        let endpoint = parse_endpoint(endpoint)?;
        let closed = CancellationToken::new();
        let dispatcher = EventDispatcher {
            callbacks,
            closed: closed.clone(),
        };

        Ok(Self {
            connection: ConnectionManager::with_cancellation(endpoint, config, dispatcher, closed),
        })
    }

    /// Create a client and start connecting right away.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(endpoint: &str, config: Config, callbacks: Callbacks) -> Result<Self> {
        let mut client = Self::new(endpoint, config, callbacks)?;
        client.connect()?;
        Ok(client)
    }

    /// Start the session. Idempotent; a no-op after [`Client::close`].
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) -> Result<()> {
        self.connection.connect()
    }

    /// Send a chat message if the connection is open. Delivered at most once.
    pub fn send_message(&self, message: &Message) {
        match codec::encode_message(message) {
            Ok(frame) => self.send(frame, "message"),
            Err(e) => tracing::error!(error = %e, id = %message.id, "unable to encode message"),
        }
    }

    /// Tell the other participants whether this participant is typing.
    pub fn send_typing_status(&self, is_typing: bool) {
        match codec::encode_typing(is_typing) {
            Ok(frame) => self.send(frame, "typing"),
            Err(e) => tracing::error!(error = %e, "unable to encode typing status"),
        }
    }

    fn send(&self, frame: String, kind: &'static str) {
        match self.connection.send_text(frame) {
            Ok(()) => {}
            Err(e @ WsError::NotConnected { .. }) => {
                tracing::warn!(error = %e, envelope = kind, "send while disconnected");
            }
            Err(e) => tracing::warn!(error = %e, envelope = kind, "unable to queue frame"),
        }
    }

    /// Close the session for good. No callback starts after this returns.
    /// Idempotent.
    pub fn close(&self) {
        self.connection.close();
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_receiver()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        self.connection.endpoint()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint().as_str())
            .field("state", &self.state())
            .finish()
    }
}
