//! Helpers over the caller's own message history and presence snapshot.
//!
//! The client keeps neither; these functions only spare applications from
//! re-implementing the same lookups.

use super::types::{Message, User, UserStatus};

/// Find the message `message` replies to.
///
/// Returns `None` when it is not a reply or when the target is not in
/// `history` (a dangling reply is a valid state).
#[must_use]
pub fn resolve_reply<'history>(
    history: &'history [Message],
    message: &Message,
) -> Option<&'history Message> {
    let target = message.reply_to.as_deref()?;
    history.iter().find(|candidate| candidate.id == target)
}

/// Case-insensitive search over message content and sender names, in history
/// order. An empty term matches nothing.
#[must_use]
pub fn search<'history>(history: &'history [Message], term: &str) -> Vec<&'history Message> {
    if term.is_empty() {
        return Vec::new();
    }

    let term = term.to_lowercase();
    history
        .iter()
        .filter(|message| {
            message.content.to_lowercase().contains(&term)
                || message.sender.to_lowercase().contains(&term)
        })
        .collect()
}

/// Copy of `users` with the status of `name` replaced. Unknown names leave the
/// snapshot unchanged.
#[must_use]
pub fn apply_status(users: &[User], name: &str, status: UserStatus) -> Vec<User> {
    users
        .iter()
        .map(|user| {
            if user.name == name {
                User {
                    name: user.name.clone(),
                    status,
                }
            } else {
                user.clone()
            }
        })
        .collect()
}
