//! Turns a session's stored history into the message list for one completion call.

use super::models::{ChatMessage, Role, Turn};

/// Build the transcript for `incoming`, given the session history read after
/// the incoming message was persisted as `persisted`.
///
/// The stored copy of the incoming message is dropped and replaced by the
/// caller-supplied text at the end, so what the completion service sees is
/// exactly what the caller sent. Every other turn, empty placeholders
/// included, keeps its position and role.
pub fn assemble(history: &[Turn], persisted: &Turn, incoming: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .filter(|turn| turn.id != persisted.id)
        .map(ChatMessage::from)
        .collect();
    messages.push(ChatMessage {
        role: Role::User,
        content: incoming.to_string(),
    });
    messages
}
