//! Mapping between [`ChatEvent`]s and the JSON text frames on the wire.
//!
//! One JSON object per frame, tagged by `type`:
//!
//! | type         | payload                                              |
//! |--------------|------------------------------------------------------|
//! | `message`    | `message`: `{id, sender, content, timestamp, replyTo?}` |
//! | `userStatus` | `users`: `[{name, status}]`                          |
//! | `typing`     | `status` (bool), plus `sender` on inbound frames     |

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::error::DecodeError;
use super::types::{ChatEvent, Message, User};
use crate::Result;
use crate::serde_helpers::from_str_with_warnings;

const MESSAGE: &str = "message";
const USER_STATUS: &str = "userStatus";
const TYPING: &str = "typing";

/// Fallback for ISO-8601 date-times that carry no offset; read as UTC.
const NAIVE_ISO_8601: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Inbound envelope. Every payload field is optional here so that a partial
/// envelope can be told apart from malformed JSON.
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<RawMessage>,
    #[serde(default)]
    users: Option<Vec<User>>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    status: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    sender: String,
    content: String,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    reply_to: Option<String>,
}

impl TryFrom<RawMessage> for Message {
    type Error = DecodeError;

    fn try_from(raw: RawMessage) -> std::result::Result<Self, Self::Error> {
        let timestamp = raw.timestamp.ok_or(DecodeError::MissingField {
            envelope: MESSAGE,
            field: "message.timestamp",
        })?;

        Ok(Message {
            id: raw.id,
            sender: raw.sender,
            content: raw.content,
            timestamp: parse_timestamp(&timestamp)?,
            reply_to: raw.reply_to.filter(|id| !id.is_empty()),
        })
    }
}

/// Outbound envelope, borrowing from the caller's values.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum Envelope<'event> {
    #[serde(rename = "message")]
    Message { message: WireMessage<'event> },
    #[serde(rename = "userStatus")]
    UserStatus { users: &'event [User] },
    #[serde(rename = "typing")]
    Typing {
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<&'event str>,
        status: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage<'event> {
    id: &'event str,
    sender: &'event str,
    content: &'event str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'event str>,
}

impl<'event> From<&'event Message> for WireMessage<'event> {
    fn from(message: &'event Message) -> Self {
        Self {
            id: &message.id,
            sender: &message.sender,
            content: &message.content,
            timestamp: format_timestamp(message.timestamp),
            reply_to: message.reply_to.as_deref(),
        }
    }
}

/// Encode an outbound chat message.
pub fn encode_message(message: &Message) -> Result<String> {
    let envelope = Envelope::Message {
        message: message.into(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode an outbound typing indicator. The sender is implied by the
/// connection's address and is not part of the payload.
pub fn encode_typing(is_typing: bool) -> Result<String> {
    let envelope = Envelope::Typing {
        sender: None,
        status: is_typing,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Encode any event in its server-side (fan-out) form.
///
/// Useful for servers, relays and test doubles speaking the same protocol.
pub fn encode(event: &ChatEvent) -> Result<String> {
    let envelope = match event {
        ChatEvent::Message(message) => Envelope::Message {
            message: message.into(),
        },
        ChatEvent::Presence(users) => Envelope::UserStatus {
            users: users.as_slice(),
        },
        ChatEvent::Typing { sender, is_typing } => Envelope::Typing {
            sender: Some(sender.as_str()),
            status: *is_typing,
        },
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> std::result::Result<ChatEvent, DecodeError> {
    let envelope: RawEnvelope = from_str_with_warnings(text)?;

    match envelope.kind.as_str() {
        MESSAGE => {
            let raw = envelope.message.ok_or(DecodeError::MissingField {
                envelope: MESSAGE,
                field: "message",
            })?;
            Ok(ChatEvent::Message(raw.try_into()?))
        }
        USER_STATUS => {
            let users = envelope.users.ok_or(DecodeError::MissingField {
                envelope: USER_STATUS,
                field: "users",
            })?;
            Ok(ChatEvent::Presence(users))
        }
        TYPING => {
            let sender = envelope.sender.ok_or(DecodeError::MissingField {
                envelope: TYPING,
                field: "sender",
            })?;
            let is_typing = envelope.status.ok_or(DecodeError::MissingField {
                envelope: TYPING,
                field: "status",
            })?;
            Ok(ChatEvent::Typing { sender, is_typing })
        }
        _ => Err(DecodeError::UnknownType(envelope.kind)),
    }
}

/// RFC 3339 in UTC with millisecond precision, e.g. `2024-05-01T12:00:00.250Z`.
fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> std::result::Result<DateTime<Utc>, DecodeError> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, NAIVE_ISO_8601)
        .map(|naive| naive.and_utc())
        .map_err(|_e| DecodeError::InvalidTimestamp(raw.to_owned()))
}
