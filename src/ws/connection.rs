#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::time::{Duration, Instant};

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::error::WsError;
use super::session::{CloseKind, ConnectionState, Session, Step, Termination};
use super::traits::FrameHandler;
use crate::error::{Error, Kind};
use crate::{NORMAL_CLOSE_CODE, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long to wait for the server's half of the close handshake.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// A frame accepted by [`ConnectionManager::send_text`], tagged with the
/// transport it was accepted for.
#[derive(Debug)]
struct Outbound {
    /// `since` of the [`ConnectionState::Open`] state that accepted the frame
    opened: Instant,
    text: String,
}

/// Manages the WebSocket connection lifecycle, reconnection, and heartbeat.
///
/// The manager owns a single logical session:
/// - Establishing the transport when [`ConnectionManager::connect`] is called
/// - Reconnecting with bounded exponential backoff after abnormal closures
/// - Heartbeat monitoring via Ping/Pong frames
/// - Handing every inbound text frame to a [`FrameHandler`], in wire order
///
/// Outbound frames are accepted only while the transport is open. Nothing is
/// queued for later delivery.
///
/// # Example
///
/// ```ignore
/// let mut connection = ConnectionManager::new(endpoint, Config::default(), handler);
/// connection.connect()?;
/// connection.send_text(r#"{"type":"typing","status":true}"#.to_owned())?;
/// connection.close();
/// ```
pub struct ConnectionManager<H: FrameHandler> {
    endpoint: Url,
    config: Config,
    /// Watch channel sender for state changes, shared with the connection task
    state_tx: watch::Sender<ConnectionState>,
    /// Sender channel for outgoing frames
    sender_tx: mpsc::UnboundedSender<Outbound>,
    /// Fired by an explicit close
    cancel: CancellationToken,
    /// Handler and receiving end of the outgoing channel, until the task starts
    pending: Option<(H, mpsc::UnboundedReceiver<Outbound>)>,
}

impl<H: FrameHandler> ConnectionManager<H> {
    /// Create an idle connection manager. No I/O happens until
    /// [`ConnectionManager::connect`].
    #[must_use]
    pub fn new(endpoint: Url, config: Config, handler: H) -> Self {
        Self::with_cancellation(endpoint, config, handler, CancellationToken::new())
    }

    /// Like [`ConnectionManager::new`], with a caller-supplied close token.
    ///
    /// [`ConnectionManager::close`] cancels `cancel` before it returns. A
    /// handler holding a clone can check it right before handing anything to
    /// application code.
    #[must_use]
    pub fn with_cancellation(
        endpoint: Url,
        config: Config,
        handler: H,
        cancel: CancellationToken,
    ) -> Self {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Idle);

        Self {
            endpoint,
            config,
            state_tx,
            sender_tx,
            cancel,
            pending: Some((handler, sender_rx)),
        }
    }

    /// Start the session in a background task.
    ///
    /// Idempotent: calling it while a session is active does nothing, and
    /// calling it after [`ConnectionManager::close`] only logs a warning.
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) -> Result<()> {
        let state = self.state();
        if state.is_closed() {
            tracing::warn!(%state, "connect called after close, create a new client instead");
            return Ok(());
        }

        if self.pending.is_none() {
            tracing::debug!(%state, "connect ignored, session already started");
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::with_source(Kind::Internal, e))?;
        let Some((handler, sender_rx)) = self.pending.take() else {
            return Ok(());
        };

        runtime.spawn(Self::connection_loop(
            self.endpoint.clone(),
            self.config.clone(),
            handler,
            sender_rx,
            self.state_tx.clone(),
            self.cancel.clone(),
        ));

        Ok(())
    }

    /// Main connection loop: drives the [`Session`] until it finishes.
    async fn connection_loop(
        endpoint: Url,
        config: Config,
        mut handler: H,
        mut sender_rx: mpsc::UnboundedReceiver<Outbound>,
        state_tx: watch::Sender<ConnectionState>,
        cancel: CancellationToken,
    ) {
        let mut session = Session::new(config.reconnect.clone());
        let mut step = session.connect();
        publish(&state_tx, session.state());

        loop {
            step = match step {
                Step::Connect => {
                    Self::run_transport(
                        &endpoint,
                        &config,
                        &mut session,
                        &mut handler,
                        &mut sender_rx,
                        &state_tx,
                        &cancel,
                    )
                    .await
                }
                Step::Retry(delay) => {
                    tracing::info!(
                        attempt = session.attempt(),
                        max_attempts = config.reconnect.max_attempts,
                        ?delay,
                        "connection lost, reconnecting"
                    );

                    tokio::select! {
                        biased;

                        () = cancel.cancelled() => session.close(),
                        () = sleep(delay) => session.retry_elapsed(),
                    }
                }
                Step::Finished(termination) => {
                    publish(&state_tx, session.state());
                    discard_stale(&mut sender_rx);

                    match termination {
                        Termination::GaveUp { attempts } => {
                            tracing::error!(attempts, "maximum number of reconnect attempts reached");
                        }
                        _ => tracing::info!(%termination, "connection closed"),
                    }

                    if !cancel.is_cancelled() {
                        handler.on_terminated(termination);
                    }
                    break;
                }
                Step::Continue | Step::Teardown | Step::Ignore => {
                    tracing::debug!(?step, "no transport work left");
                    break;
                }
            };

            publish(&state_tx, session.state());
        }
    }

    /// Establish one transport, serve it until it ends, and report how it
    /// ended to the session.
    async fn run_transport(
        endpoint: &Url,
        config: &Config,
        session: &mut Session,
        handler: &mut H,
        sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
        state_tx: &watch::Sender<ConnectionState>,
        cancel: &CancellationToken,
    ) -> Step {
        tracing::info!(%endpoint, attempt = session.attempt(), "attempting to connect");

        let connected = tokio::select! {
            biased;

            () = cancel.cancelled() => return session.close(),
            result = connect_async(endpoint.as_str()) => result,
        };

        let mut ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                let error = Error::from(e);
                tracing::warn!(error = %error, "unable to connect");
                return session.transport_closed(CloseKind::Abnormal);
            }
        };

        if cancel.is_cancelled() {
            _ = session.close();
        }

        let since = Instant::now();
        if promote(session, state_tx, sender_rx, since) != Step::Continue {
            _ = ws_stream.close(None).await;
            return Step::Finished(Termination::Requested);
        }
        tracing::info!(%endpoint, "WebSocket connection established");

        let kind =
            Self::handle_connection(ws_stream, since, sender_rx, handler, config, cancel).await;
        tracing::info!(?kind, "WebSocket connection closed");

        retire(session, state_tx, sender_rx, kind, cancel.is_cancelled())
    }

    /// Serve an open transport until it closes.
    async fn handle_connection(
        ws_stream: WsStream,
        since: Instant,
        sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
        handler: &mut H,
        config: &Config,
        cancel: &CancellationToken,
    ) -> CloseKind {
        let (mut write, mut read) = ws_stream.split();

        let period = config.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
        let mut awaiting_pong: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::from(NORMAL_CLOSE_CODE),
                        reason: String::from("client closing").into(),
                    };
                    if write.send(Message::Close(Some(frame))).await.is_err() {
                        return CloseKind::Abnormal;
                    }

                    // Wait briefly for the server's close frame.
                    let reply = timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
                        while let Some(msg) = read.next().await {
                            if let Ok(Message::Close(frame)) = msg {
                                return close_kind(frame.as_ref());
                            }
                        }
                        CloseKind::Abnormal
                    })
                    .await;

                    return reply.unwrap_or(CloseKind::Abnormal);
                }

                // Handle incoming frames
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            tracing::trace!(text = %text.as_str(), "received WebSocket text frame");

                            // No callbacks once close has been requested.
                            if cancel.is_cancelled() {
                                continue;
                            }
                            handler.on_text(text.as_str());
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = None;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            return close_kind(frame.as_ref());
                        }
                        Some(Ok(_)) => {
                            // Binary frames are not part of the protocol; pings are answered by tungstenite.
                        }
                        Some(Err(e)) => {
                            let error = Error::from(e);
                            tracing::warn!(error = %error, "WebSocket transport error");
                            return CloseKind::Abnormal;
                        }
                        None => return CloseKind::Abnormal,
                    }
                }

                // Handle outgoing frames from the client
                Some(frame) = sender_rx.recv() => {
                    let Some(text) = frame_for(frame, since) else {
                        tracing::warn!("dropping frame accepted for a previous transport");
                        continue;
                    };

                    tracing::debug!(%text, "sending frame");
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %WsError::Connection(e), "unable to write frame");
                        return CloseKind::Abnormal;
                    }
                }

                _ = heartbeat.tick() => {
                    if let Some(sent) = awaiting_pong
                        && sent.elapsed() >= config.heartbeat_timeout
                    {
                        tracing::warn!(
                            timeout = ?config.heartbeat_timeout,
                            error = %WsError::HeartbeatTimeout,
                            "no Pong received, treating transport as lost"
                        );
                        return CloseKind::Abnormal;
                    }

                    awaiting_pong.get_or_insert_with(tokio::time::Instant::now);
                    if write.send(Message::Ping(Vec::<u8>::new().into())).await.is_err() {
                        return CloseKind::Abnormal;
                    }
                }
            }
        }
    }

    /// Submit a text frame for the open transport.
    ///
    /// Fails fast with [`WsError::NotConnected`] unless the connection is
    /// currently open.
    pub fn send_text(&self, text: String) -> std::result::Result<(), WsError> {
        let state = self.state();
        let ConnectionState::Open { since } = state else {
            return Err(WsError::NotConnected { state });
        };

        self.sender_tx
            .send(Outbound {
                opened: since,
                text,
            })
            .map_err(|_e| WsError::ConnectionClosed)
    }

    /// Explicitly close the session.
    ///
    /// Cancels a pending reconnection, closes the open transport, and never
    /// reconnects. Idempotent.
    pub fn close(&self) {
        if self.cancel.is_cancelled() {
            tracing::debug!("close called twice");
            return;
        }

        tracing::info!(endpoint = %self.endpoint, "closing WebSocket connection");
        self.cancel.cancel();
        publish(
            &self.state_tx,
            ConnectionState::Closed(Termination::Requested),
        );
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl<H: FrameHandler> Drop for ConnectionManager<H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publish a state change. [`ConnectionState::Closed`] is terminal and is
/// never overwritten.
fn publish(state_tx: &watch::Sender<ConnectionState>, next: ConnectionState) {
    state_tx.send_if_modified(|current| {
        if current.is_closed() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

fn close_kind(frame: Option<&CloseFrame>) -> CloseKind {
    match frame {
        Some(frame) => CloseKind::from_code(u16::from(frame.code)),
        None => CloseKind::Normal { code: None },
    }
}

/// Promote a freshly established transport to `Open`.
///
/// Frames left over from earlier transports are drained before `Open` is
/// published, so everything accepted afterwards belongs to this transport.
fn promote(
    session: &mut Session,
    state_tx: &watch::Sender<ConnectionState>,
    sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    since: Instant,
) -> Step {
    let step = session.opened(since);
    if step == Step::Continue {
        discard_stale(sender_rx);
        publish(state_tx, session.state());
    }
    step
}

/// Report a finished transport to the session.
///
/// The next state is published before unwritten frames are drained, so no
/// frame is accepted for a transport that is already gone.
fn retire(
    session: &mut Session,
    state_tx: &watch::Sender<ConnectionState>,
    sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    kind: CloseKind,
    cancelled: bool,
) -> Step {
    if cancelled {
        _ = session.close();
    }
    let step = session.transport_closed(kind);

    publish(state_tx, session.state());
    discard_stale(sender_rx);
    step
}

/// Text of `frame` if it was accepted for the transport opened at `since`.
fn frame_for(frame: Outbound, since: Instant) -> Option<String> {
    (frame.opened == since).then_some(frame.text)
}

/// Drop frames that were accepted for a transport that is gone. They are
/// never replayed on a later transport.
fn discard_stale(sender_rx: &mut mpsc::UnboundedReceiver<Outbound>) {
    let mut dropped = 0_usize;
    while sender_rx.try_recv().is_ok() {
        dropped += 1;
    }

    if dropped > 0 {
        tracing::warn!(dropped, "discarding frames written for a closed transport");
    }
}
