//! Incremental upstream output.

use serde::{Deserialize, Serialize};

/// Terminal marker carried by the last fragment of a completion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the completion.
    Stop,
    /// Truncated at the token cap.
    Length,
    /// Any other provider marker (`content_filter`, `tool_calls`, ...).
    #[serde(untagged)]
    Other(String),
}

impl FinishReason {
    /// Parse a provider marker.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "stop" => Self::Stop,
            "length" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::Other(s) => s,
        }
    }
}

/// A piece of assistant text, optionally ending the completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFragment {
    /// Delta text. May be empty on the terminal fragment.
    pub text: String,
    /// Terminal marker, if this fragment ends the completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl TokenFragment {
    /// A plain text delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
        }
    }

    /// A delta ending the completion naturally.
    pub fn stop(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(FinishReason::Stop),
        }
    }

    /// A delta ending the completion at the token cap.
    pub fn length(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(FinishReason::Length),
        }
    }
}
