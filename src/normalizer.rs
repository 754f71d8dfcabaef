// src/normalizer.rs
// Conversation trimming and validation before a request is sent

use crate::error::{Result, SparkError};
use crate::types::{ChatMessage, Role};

/// Most recent messages kept in a request
pub const MAX_HISTORY: usize = 20;

/// Produce the transcript that goes on the wire.
///
/// Works on a copy: drops `system` messages when the domain cannot take
/// them, keeps the last [`MAX_HISTORY`] entries and requires the final
/// entry to come from the user.
pub fn normalize(conversation: &[ChatMessage], supports_system: bool) -> Result<Vec<ChatMessage>> {
    let mut messages: Vec<ChatMessage> = conversation
        .iter()
        .filter(|m| supports_system || m.role != Role::System)
        .cloned()
        .collect();

    if messages.len() > MAX_HISTORY {
        messages.drain(..messages.len() - MAX_HISTORY);
    }

    match messages.last() {
        Some(last) if last.role == Role::User => Ok(messages),
        Some(_) => Err(SparkError::Validation("last message must be user".into())),
        None => Err(SparkError::Validation("conversation is empty".into())),
    }
}
