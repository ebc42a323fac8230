#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use duplex_chat_client::chat::codec;
use duplex_chat_client::chat::{Callbacks, ChatEvent, Message, User, UserStatus};
use duplex_chat_client::ws::config::Config;
use duplex_chat_client::ws::{ConnectionState, Termination};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

/// What the server does to every connected participant.
#[derive(Debug, Clone)]
enum Command {
    Text(String),
    Close(u16),
    /// Drop the TCP connection without a close handshake
    Drop,
}

type Presence = Arc<Mutex<BTreeMap<String, UserStatus>>>;

/// Mock chat server.
///
/// Participants connect on `/ws/<name>`. Like the real server it relays
/// `message` envelopes to everybody (sender included), turns `typing` into a
/// presence snapshot, and broadcasts presence on every join and leave.
pub struct MockChatServer {
    addr: SocketAddr,
    command_tx: broadcast::Sender<Command>,
    /// Frames received from participants, tagged with the participant name
    inbound_rx: mpsc::UnboundedReceiver<(String, String)>,
    accepted: Arc<AtomicUsize>,
}

impl MockChatServer {
    /// Start a mock chat server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(256);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let presence: Presence = Arc::default();

        let broadcast_tx = command_tx.clone();
        let accept_count = Arc::clone(&accepted);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Subscribe before the handshake so nothing sent after the
                // client sees `Open` is missed.
                let commands = broadcast_tx.subscribe();

                let mut path = String::new();
                let callback = |request: &Request, response: Response| {
                    path = request.uri().path().to_owned();
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                accept_count.fetch_add(1, Ordering::SeqCst);
                let name = path.trim_start_matches("/ws/").to_owned();

                tokio::spawn(serve_participant(
                    name,
                    ws_stream,
                    commands,
                    broadcast_tx.clone(),
                    inbound_tx.clone(),
                    Arc::clone(&presence),
                ));
            }
        });

        Self {
            addr,
            command_tx,
            inbound_rx,
            accepted,
        }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    #[must_use]
    pub fn ws_url(&self, participant: &str) -> String {
        format!("ws://{}/ws/{participant}", self.addr)
    }

    /// Send a raw text frame to every connected participant.
    pub fn send(&self, frame: &str) {
        drop(self.command_tx.send(Command::Text(frame.to_owned())));
    }

    /// Send a chat event in its server-side form to every participant.
    pub fn send_event(&self, event: &ChatEvent) {
        self.send(&codec::encode(event).unwrap());
    }

    /// Close every connection with a close frame carrying `code`.
    pub fn close_all(&self, code: u16) {
        drop(self.command_tx.send(Command::Close(code)));
    }

    /// Drop every connection without a close handshake.
    pub fn drop_all(&self) {
        drop(self.command_tx.send(Command::Drop));
    }

    /// Number of WebSocket handshakes completed so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next frame received from any participant.
    pub async fn recv_inbound(&mut self) -> Option<(String, Value)> {
        let (name, text) = timeout(WAIT, self.inbound_rx.recv()).await.ok().flatten()?;
        Some((name, serde_json::from_str(&text).unwrap()))
    }

    /// Frames received so far, without waiting.
    pub fn drain_inbound(&mut self) -> Vec<(String, String)> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.inbound_rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Server that answers the WebSocket handshake only after `handshake_delay`,
/// greets the participant with a `greeting` message and then never reads
/// again, so Pings go unanswered.
pub struct StallingServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    accepted: Arc<AtomicUsize>,
}

impl StallingServer {
    pub async fn start(handshake_delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let accepted = Arc::new(AtomicUsize::new(0));

        let (connection_count, accept_count) = (Arc::clone(&connections), Arc::clone(&accepted));
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                connection_count.fetch_add(1, Ordering::SeqCst);

                let accept_count = Arc::clone(&accept_count);
                tokio::spawn(async move {
                    tokio::time::sleep(handshake_delay).await;
                    let Ok(mut ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    accept_count.fetch_add(1, Ordering::SeqCst);

                    let greeting = codec::encode(&ChatEvent::Message(
                        duplex_chat_client::chat::create_message("Server", "greeting", None),
                    ))
                    .unwrap();
                    drop(ws_stream.send(Frame::Text(greeting.into())).await);

                    // Hold the connection open without ever reading from it.
                    std::future::pending::<()>().await;
                    drop(ws_stream);
                });
            }
        });

        Self {
            addr,
            connections,
            accepted,
        }
    }

    #[must_use]
    pub fn ws_url(&self, participant: &str) -> String {
        format!("ws://{}/ws/{participant}", self.addr)
    }

    /// TCP connections accepted so far, handshake or not.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// WebSocket handshakes completed so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

async fn serve_participant(
    name: String,
    ws_stream: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    mut commands: broadcast::Receiver<Command>,
    broadcast_tx: broadcast::Sender<Command>,
    inbound_tx: mpsc::UnboundedSender<(String, String)>,
    presence: Presence,
) {
    let (mut write, mut read) = ws_stream.split();

    presence
        .lock()
        .unwrap()
        .insert(name.clone(), UserStatus::Online);
    broadcast_presence(&presence, &broadcast_tx);

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Frame::Text(text))) => {
                        relay(&name, text.as_str(), &presence, &broadcast_tx);
                        drop(inbound_tx.send((name.clone(), text.to_string())));
                    }
                    Some(Ok(Frame::Close(_))) => {
                        drop(write.close().await);
                        break;
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            command = commands.recv() => {
                match command {
                    Ok(Command::Text(text)) => {
                        if write.send(Frame::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Ok(Command::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: String::from("server closing").into(),
                        };
                        drop(write.send(Frame::Close(Some(frame))).await);
                        // Let the client complete the handshake.
                        drop(timeout(Duration::from_secs(1), async {
                            while let Some(Ok(_)) = read.next().await {}
                        })
                        .await);
                        break;
                    }
                    Ok(Command::Drop) | Err(_) => break,
                }
            }
        }
    }

    presence.lock().unwrap().remove(&name);
    broadcast_presence(&presence, &broadcast_tx);
}

fn relay(name: &str, text: &str, presence: &Presence, broadcast_tx: &broadcast::Sender<Command>) {
    let Ok(envelope) = serde_json::from_str::<Value>(text) else {
        return;
    };

    match envelope["type"].as_str() {
        Some("message") => drop(broadcast_tx.send(Command::Text(text.to_owned()))),
        Some("typing") => {
            let status = if envelope["status"].as_bool() == Some(true) {
                UserStatus::Typing
            } else {
                UserStatus::Online
            };
            presence.lock().unwrap().insert(name.to_owned(), status);
            broadcast_presence(presence, broadcast_tx);
        }
        _ => {}
    }
}

fn broadcast_presence(presence: &Presence, broadcast_tx: &broadcast::Sender<Command>) {
    let users = presence
        .lock()
        .unwrap()
        .iter()
        .map(|(name, status)| User::builder().name(name.as_str()).status(*status).build())
        .collect();

    let frame = codec::encode(&ChatEvent::Presence(users)).unwrap();
    drop(broadcast_tx.send(Command::Text(frame)));
}

/// Everything the client handed to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Message(Message),
    Presence(Vec<User>),
    Typing(String, bool),
    Closed(Termination),
}

/// Callbacks that forward every event to a channel.
#[must_use]
pub fn recorder() -> (Callbacks, mpsc::UnboundedReceiver<Received>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (messages, presence, typing) = (tx.clone(), tx.clone(), tx.clone());

    let callbacks = Callbacks::new(
        move |message| drop(messages.send(Received::Message(message))),
        move |users| drop(presence.send(Received::Presence(users))),
        move |sender, is_typing| drop(typing.send(Received::Typing(sender, is_typing))),
    )
    .on_closed(move |termination| drop(tx.send(Received::Closed(termination))));

    (callbacks, rx)
}

/// Next event that is not a presence snapshot.
pub async fn next_non_presence(rx: &mut mpsc::UnboundedReceiver<Received>) -> Received {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Received::Presence(_)) => {}
                Some(event) => return event,
                None => panic!("callbacks dropped"),
            }
        }
    })
    .await
    .expect("timed out waiting for an event")
}

/// Next chat message whose content is `content`.
pub async fn next_message_with(
    rx: &mut mpsc::UnboundedReceiver<Received>,
    content: &str,
) -> Message {
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Received::Message(message)) if message.content == content => return message,
                Some(_) => {}
                None => panic!("callbacks dropped"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

/// Next presence snapshot satisfying `predicate`.
pub async fn next_presence_where<F>(
    rx: &mut mpsc::UnboundedReceiver<Received>,
    mut predicate: F,
) -> Vec<User>
where
    F: FnMut(&[User]) -> bool,
{
    timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Some(Received::Presence(users)) if predicate(&users) => return users,
                Some(_) => {}
                None => panic!("callbacks dropped"),
            }
        }
    })
    .await
    .expect("timed out waiting for presence")
}

/// Wait until the connection state satisfies `predicate`.
pub async fn wait_for_state<F>(
    states: &mut watch::Receiver<ConnectionState>,
    predicate: F,
) -> ConnectionState
where
    F: FnMut(&ConnectionState) -> bool,
{
    let state = timeout(WAIT, states.wait_for(predicate))
        .await
        .expect("timed out waiting for connection state")
        .expect("connection state sender dropped");
    *state
}

/// Reconnect quickly so tests stay fast.
#[must_use]
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.reconnect.base_delay = Duration::from_millis(20);
    config.reconnect.max_backoff = Duration::from_millis(200);
    config
}

pub fn init_tracing() {
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}
