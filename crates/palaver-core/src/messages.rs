//! Chat messages.
//!
//! [`ChatMessage`] is what clients send (it carries a client-side timestamp);
//! [`PromptMessage`] is what goes to the completion provider.

use serde::{Deserialize, Serialize};

/// Speaker of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions for the assistant.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

impl Role {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One entry of the conversation history sent by the client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Client-side timestamp, opaque to the server.
    pub timestamp: String,
}

/// A message in the form the completion provider expects.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Speaker.
    pub role: Role,
    /// Message text.
    pub content: String,
}

impl PromptMessage {
    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

impl From<&ChatMessage> for PromptMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// Build the upstream prompt: the system prompt first, then the history in order.
pub fn build_prompt(system_prompt: &str, history: &[ChatMessage]) -> Vec<PromptMessage> {
    let mut prompt = Vec::with_capacity(history.len() + 1);
    prompt.push(PromptMessage::system(system_prompt));
    prompt.extend(history.iter().map(PromptMessage::from));
    prompt
}
