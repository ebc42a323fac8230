use url::Url;

use crate::error::Error;
use crate::ws::WsError;
use crate::{PARTICIPANT_PATH, Result};

/// Parse and validate a WebSocket endpoint. Only `ws` and `wss` are accepted.
pub fn parse_endpoint(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(WsError::InvalidEndpoint(format!("unsupported scheme `{other}`")).into()),
    }
}

/// Build the address a participant connects to: `ws(s)://host:port/ws/<name>`.
///
/// The participant's identity travels in the path, so the server can attribute
/// frames without a sender field. Any path, query or fragment on `base` is
/// replaced.
///
/// # Example
///
/// ```
/// use duplex_chat_client::chat::participant_endpoint;
///
/// let url = participant_endpoint("ws://localhost:8000", "bob smith").unwrap();
/// assert_eq!(url.as_str(), "ws://localhost:8000/ws/bob%20smith");
/// ```
pub fn participant_endpoint(base: &str, participant: &str) -> Result<Url> {
    if participant.trim().is_empty() {
        return Err(Error::validation("participant name must not be empty"));
    }

    let mut url = parse_endpoint(base)?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|()| WsError::InvalidEndpoint("endpoint cannot carry a path".to_owned()))?
        .clear()
        .push(PARTICIPANT_PATH)
        .push(participant);

    Ok(url)
}
