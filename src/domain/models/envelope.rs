//! Wire envelope for bus messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message categories; the type constrains the payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Free-form content: payload is `{content}`.
    Message,
    /// Tool output: payload is `{toolName, result, isError?}`.
    ToolResult,
    /// Control-plane lifecycle notification.
    System,
    /// Pause/resume/shutdown style directives.
    Control,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::ToolResult => "tool_result",
            Self::System => "system",
            Self::Control => "control",
        }
    }
}

/// The JSON wire format exchanged over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            message_type,
            payload,
            timestamp: Utc::now(),
            trace_id: None,
            reply_to: None,
        }
    }

    /// A plain `message` envelope with `{content}` payload.
    pub fn message(from: impl Into<String>, to: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            from,
            to,
            MessageType::Message,
            serde_json::json!({ "content": content.into() }),
        )
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_reply_to(mut self, subject: impl Into<String>) -> Self {
        self.reply_to = Some(subject.into());
        self
    }

    /// The `content` field of a message payload, when present.
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_payload_shape() {
        let env = Envelope::message("a", "b", "hello");
        assert_eq!(env.message_type, MessageType::Message);
        assert_eq!(env.content(), Some("hello"));
    }

    #[test]
    fn test_json_field_names() {
        let env = Envelope::message("a", "b", "x");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "message");
        assert!(json["id"].is_string());
        assert!(json["timestamp"].is_string());
        assert!(json.get("trace_id").is_none());
    }

    #[test]
    fn test_round_trip() {
        let env = Envelope::new(
            "tool-runner",
            "cell-a",
            MessageType::ToolResult,
            serde_json::json!({ "toolName": "shell", "result": "ok", "isError": false }),
        )
        .with_trace("t-1")
        .with_reply_to("cell.default.a.inbox");
        let text = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&text).unwrap();
        assert_eq!(env, back);
    }
}
