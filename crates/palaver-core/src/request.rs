//! Inbound socket messages.
//!
//! Every text frame from a client is parsed into a [`ClientRequest`] before
//! anything else touches it. A frame is either a control command
//! (`{"command": "stop"}`) or a chat request.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ProtocolError;
use crate::messages::ChatMessage;
use crate::provider::GenerationParams;

/// Upper bound accepted for `temperature`.
const MAX_TEMPERATURE: f32 = 2.0;

/// A validated client message.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientRequest {
    /// Start (or replace) a generation.
    Chat(ChatRequest),
    /// Cancel the running generation.
    Stop,
}

/// Body of a chat request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Client-side conversation id (informational).
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Conversation history, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Token cap override.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Temperature override.
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Client asked to continue the last assistant turn.
    #[serde(default)]
    pub continue_last: bool,
    /// Replaces the configured system prompt for this request.
    #[serde(default, rename = "systemPrompt")]
    pub system_prompt: Option<String>,
    /// Search index selector (informational).
    #[serde(default, rename = "databaseId")]
    pub database_id: Option<String>,
}

impl ChatRequest {
    /// Merge request overrides into the configured defaults.
    pub fn params(&self, defaults: &GenerationParams) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            ..defaults.clone()
        }
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if self.max_tokens == Some(0) {
            return Err(ProtocolError::InvalidRequest(
                "max_tokens must be at least 1".into(),
            ));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=MAX_TEMPERATURE).contains(&t) {
                return Err(ProtocolError::InvalidRequest(format!(
                    "temperature must be between 0 and {MAX_TEMPERATURE}, got {t}"
                )));
            }
        }
        Ok(())
    }
}

impl ClientRequest {
    /// Parse and validate one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        if let Some(command) = value.get("command") {
            return match command.as_str() {
                Some("stop") => Ok(Self::Stop),
                Some(other) => Err(ProtocolError::UnknownCommand(other.to_string())),
                None => Err(ProtocolError::InvalidRequest(
                    "command must be a string".into(),
                )),
            };
        }

        let request: ChatRequest = serde_json::from_value(value)
            .map_err(|e| ProtocolError::InvalidRequest(e.to_string()))?;
        request.validate()?;
        Ok(Self::Chat(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;

    fn chat_json() -> Value {
        serde_json::json!({
            "sessionId": "conv-1",
            "messages": [
                { "role": "user", "content": "hello", "timestamp": "2024-01-01T00:00:00Z" }
            ],
            "continue_last": false
        })
    }

    #[test]
    fn parse_stop_command() {
        assert_eq!(ClientRequest::parse(r#"{"command":"stop"}"#).unwrap(), ClientRequest::Stop);
    }

    #[test]
    fn stop_command_wins_over_chat_fields() {
        let mut v = chat_json();
        v["command"] = "stop".into();
        assert_eq!(ClientRequest::parse(&v.to_string()).unwrap(), ClientRequest::Stop);
    }

    #[test]
    fn parse_unknown_command() {
        let err = ClientRequest::parse(r#"{"command":"pause"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(ref c) if c == "pause"));
    }

    #[test]
    fn non_string_command_is_invalid() {
        let err = ClientRequest::parse(r#"{"command":1}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn parse_chat_request() {
        let req = ClientRequest::parse(&chat_json().to_string()).unwrap();
        let ClientRequest::Chat(chat) = req else {
            panic!("expected chat request");
        };
        assert_eq!(chat.session_id, "conv-1");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, Role::User);
        assert_eq!(chat.max_tokens, None);
        assert!(!chat.continue_last);
    }

    #[test]
    fn parse_optional_fields() {
        let mut v = chat_json();
        v["max_tokens"] = 256.into();
        v["temperature"] = 0.2.into();
        v["systemPrompt"] = "be terse".into();
        v["databaseId"] = "docs".into();
        let ClientRequest::Chat(chat) = ClientRequest::parse(&v.to_string()).unwrap() else {
            panic!("expected chat request");
        };
        assert_eq!(chat.max_tokens, Some(256));
        assert_eq!(chat.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(chat.database_id.as_deref(), Some("docs"));
    }

    #[test]
    fn continue_last_defaults_to_false() {
        let mut v = chat_json();
        let _ = v.as_object_mut().unwrap().remove("continue_last");
        let ClientRequest::Chat(chat) = ClientRequest::parse(&v.to_string()).unwrap() else {
            panic!("expected chat request");
        };
        assert!(!chat.continue_last);
    }

    #[test]
    fn invalid_json_reported() {
        let err = ClientRequest::parse("{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
        assert!(err.to_string().starts_with("Invalid JSON format: "));
    }

    #[test]
    fn missing_messages_is_invalid_request() {
        let err = ClientRequest::parse(r#"{"sessionId":"x"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
        assert!(err.to_string().contains("messages"));
    }

    #[test]
    fn bad_role_is_invalid_request() {
        let mut v = chat_json();
        v["messages"][0]["role"] = "robot".into();
        let err = ClientRequest::parse(&v.to_string()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn json_array_is_invalid_request() {
        let err = ClientRequest::parse("[1,2,3]").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidRequest(_)));
    }

    #[test]
    fn zero_max_tokens_rejected() {
        let mut v = chat_json();
        v["max_tokens"] = 0.into();
        let err = ClientRequest::parse(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("max_tokens"));
    }

    #[test]
    fn out_of_range_temperature_rejected() {
        let mut v = chat_json();
        v["temperature"] = 3.5.into();
        let err = ClientRequest::parse(&v.to_string()).unwrap_err();
        assert!(err.to_string().contains("temperature"));
    }

    #[test]
    fn params_apply_overrides() {
        let defaults = GenerationParams::default();
        let req = ChatRequest {
            session_id: "s".into(),
            messages: vec![],
            max_tokens: Some(128),
            temperature: None,
            continue_last: false,
            system_prompt: None,
            database_id: None,
        };
        let p = req.params(&defaults);
        assert_eq!(p.max_tokens, 128);
        assert!((p.temperature - defaults.temperature).abs() < f32::EPSILON);
        assert!((p.top_p - defaults.top_p).abs() < f32::EPSILON);
    }
}
