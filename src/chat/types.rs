use std::sync::atomic::{AtomicI64, Ordering};

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Last timestamp handed out by [`create_message`], in Unix milliseconds.
static LAST_STAMP_MILLIS: AtomicI64 = AtomicI64::new(i64::MIN);

/// A chat message.
///
/// Created once by the sender via [`create_message`], transmitted verbatim and
/// never mutated afterwards.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Message {
    /// Unique identifier (UUID v4 for client-generated messages)
    #[builder(into)]
    pub id: String,
    /// Display name of the participant who wrote the message
    #[builder(into)]
    pub sender: String,
    /// Message body, possibly empty
    #[builder(into)]
    pub content: String,
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// Id of the message this one replies to.
    ///
    /// The target may be unknown to the recipient; resolving it is a lookup in
    /// the caller's own history (see [`super::history::resolve_reply`]).
    #[builder(into)]
    pub reply_to: Option<String>,
}

impl Message {
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }
}

/// Presence status of a participant.
#[non_exhaustive]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Typing,
}

/// One entry of a presence snapshot.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
pub struct User {
    #[builder(into)]
    pub name: String,
    pub status: UserStatus,
}

/// A decoded inbound envelope.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A chat message fanned out by the server
    Message(Message),
    /// The full, ordered presence snapshot, replacing any previous one
    Presence(Vec<User>),
    /// Another participant started or stopped typing
    Typing {
        sender: String,
        is_typing: bool,
    },
}

/// Create a new message authored by `sender`.
///
/// Stamps a fresh UUID v4 and the current time. The timestamp has millisecond
/// precision (the precision of the wire format) and never goes backwards
/// between calls within the process. `reply_to` is only kept when it is a
/// non-empty id.
#[must_use]
pub fn create_message(sender: &str, content: &str, reply_to: Option<&str>) -> Message {
    Message {
        id: Uuid::new_v4().to_string(),
        sender: sender.to_owned(),
        content: content.to_owned(),
        timestamp: monotonic_now(),
        reply_to: reply_to.filter(|id| !id.is_empty()).map(str::to_owned),
    }
}

fn monotonic_now() -> DateTime<Utc> {
    let now = Utc::now().timestamp_millis();
    let previous = LAST_STAMP_MILLIS.fetch_max(now, Ordering::SeqCst);

    DateTime::from_timestamp_millis(now.max(previous)).unwrap_or_else(Utc::now)
}
