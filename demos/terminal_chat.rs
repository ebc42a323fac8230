//! Minimal terminal chat participant.
//!
//! Every line typed is sent as a message. A few commands are understood:
//! `/reply <id> <text>`, `/search <term>`, `/typing on|off` and `/quit`.
//!
//! Run against a chat server on localhost:
//! ```sh
//! RUST_LOG=info cargo run --example terminal_chat -- ws://localhost:8000 alice
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use duplex_chat_client::chat::history::{resolve_reply, search};
use duplex_chat_client::chat::{Callbacks, Client, Message, create_message, participant_endpoint};
use duplex_chat_client::ws::config::Config;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> duplex_chat_client::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mut args = std::env::args().skip(1);
    let base = args.next().unwrap_or_else(|| "ws://localhost:8000".to_owned());
    let name = args.next().unwrap_or_else(|| "guest".to_owned());

    let history: Arc<Mutex<Vec<Message>>> = Arc::default();
    let received = Arc::clone(&history);

    let callbacks = Callbacks::new(
        move |message: Message| {
            let mut history = received.lock().unwrap_or_else(PoisonError::into_inner);
            match resolve_reply(&history, &message) {
                Some(parent) => info!(
                    id = %message.id,
                    in_reply_to = %parent.content,
                    "{}: {}", message.sender, message.content
                ),
                None => info!(id = %message.id, "{}: {}", message.sender, message.content),
            }
            history.push(message);
        },
        |users| {
            let online: Vec<String> = users
                .iter()
                .map(|user| format!("{} ({})", user.name, user.status))
                .collect();
            info!(users = %online.join(", "), "presence");
        },
        |sender, is_typing| info!(%sender, is_typing, "typing"),
    )
    .on_closed(|termination| warn!(%termination, "session ended"));

    let endpoint = participant_endpoint(&base, &name)?;
    let client = Client::open(endpoint.as_str(), Config::default(), callbacks)?;
    info!(%endpoint, "connecting");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "" => {}
            "/quit" => break,
            "/typing" => client.send_typing_status(rest == "on"),
            "/search" => {
                let history = history.lock().unwrap_or_else(PoisonError::into_inner);
                for hit in search(&history, rest) {
                    info!(id = %hit.id, "{}: {}", hit.sender, hit.content);
                }
            }
            "/reply" => match rest.split_once(' ') {
                Some((id, text)) => client.send_message(&create_message(&name, text, Some(id))),
                None => warn!("usage: /reply <id> <text>"),
            },
            _ => client.send_message(&create_message(&name, line, None)),
        }
    }

    client.close();
    Ok(())
}
