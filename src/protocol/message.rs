// src/protocol/message.rs

use serde_json::{Map, Value};

use crate::protocol::content::StreamContent;

/// A decoded event from the program's stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    /// `run_started`
    RunStarted { session_id: Option<String> },
    /// `stream`
    Stream(StreamChunk),
    /// `limit_notice`
    LimitNotice { message: String },
    /// `cancel_requested`
    CancelAcknowledged,
    /// `run_completed`
    RunCompleted { session_id: Option<String> },
    /// `run_failed`
    RunFailed { error: Option<String> },
    /// `error`
    Error { message: Option<String> },
    /// Any other (or missing) `event` tag.
    Other { event: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    /// The payload's `type` field, e.g. `"text"` or `"tool_use"`.
    pub kind: Option<String>,
    pub content: StreamContent,
}

impl StreamChunk {
    pub fn is_tool_invocation(&self) -> bool {
        self.kind.as_deref() == Some("tool_use") || self.content.has_part_of_kind("tool_use")
    }

    pub fn text(&self) -> String {
        self.content.text()
    }
}

impl ProtocolMessage {
    /// Build a message from a parsed JSON value.
    ///
    /// Returns `None` for JSON that is not an object; such lines are treated
    /// as plain output by the decoder.
    pub fn from_value(value: &Value) -> Option<Self> {
        let root = value.as_object()?;
        let fields = Fields::new(root);

        let message = match root.get("event").and_then(Value::as_str) {
            Some("run_started") => ProtocolMessage::RunStarted {
                session_id: fields.string("session_id"),
            },
            Some("stream") => ProtocolMessage::Stream(StreamChunk {
                kind: fields.string("type"),
                content: StreamContent::from_value(fields.get("content")),
            }),
            Some("limit_notice") => ProtocolMessage::LimitNotice {
                message: fields.string("message").unwrap_or_default(),
            },
            Some("cancel_requested") => ProtocolMessage::CancelAcknowledged,
            Some("run_completed") => ProtocolMessage::RunCompleted {
                session_id: fields.string("session_id"),
            },
            Some("run_failed") => ProtocolMessage::RunFailed {
                error: fields.string("error"),
            },
            Some("error") => ProtocolMessage::Error {
                message: fields.string("message").or_else(|| fields.string("error")),
            },
            other => ProtocolMessage::Other {
                event: other.map(str::to_string),
            },
        };

        Some(message)
    }

    /// `run_completed` and `run_failed` decide a job's outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolMessage::RunCompleted { .. } | ProtocolMessage::RunFailed { .. }
        )
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ProtocolMessage::RunStarted { .. } => "run_started",
            ProtocolMessage::Stream(_) => "stream",
            ProtocolMessage::LimitNotice { .. } => "limit_notice",
            ProtocolMessage::CancelAcknowledged => "cancel_requested",
            ProtocolMessage::RunCompleted { .. } => "run_completed",
            ProtocolMessage::RunFailed { .. } => "run_failed",
            ProtocolMessage::Error { .. } => "error",
            ProtocolMessage::Other { .. } => "other",
        }
    }
}

/// Field lookup that prefers `payload.<name>` and falls back to the envelope.
struct Fields<'a> {
    root: &'a Map<String, Value>,
    payload: Option<&'a Map<String, Value>>,
}

impl<'a> Fields<'a> {
    fn new(root: &'a Map<String, Value>) -> Self {
        let payload = root.get("payload").and_then(Value::as_object);
        Self { root, payload }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.payload
            .and_then(|p| p.get(name))
            .or_else(|| self.root.get(name))
            .filter(|v| !v.is_null())
    }

    /// Strings are returned as-is; `{"message": ..}` objects yield their
    /// message; anything else is rendered as compact JSON.
    fn string(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => match map.get("message") {
                Some(Value::String(m)) => Some(m.clone()),
                _ => Some(Value::Object(map.clone()).to_string()),
            },
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_every_event_kind() {
        let cases = [
            (json!({"event": "run_started"}), "run_started"),
            (json!({"event": "stream", "payload": {"content": "x"}}), "stream"),
            (json!({"event": "limit_notice", "payload": {"message": "slow down"}}), "limit_notice"),
            (json!({"event": "cancel_requested"}), "cancel_requested"),
            (json!({"event": "run_completed"}), "run_completed"),
            (json!({"event": "run_failed", "error": "boom"}), "run_failed"),
            (json!({"event": "error", "payload": {"message": "bad"}}), "error"),
            (json!({"event": "heartbeat"}), "other"),
            (json!({"no_event": true}), "other"),
        ];

        for (value, kind) in cases {
            let msg = ProtocolMessage::from_value(&value).unwrap();
            assert_eq!(msg.kind_name(), kind, "for {value}");
        }
    }

    #[test]
    fn reads_fields_from_payload_then_envelope() {
        let started =
            ProtocolMessage::from_value(&json!({"event": "run_started", "session_id": "s-1"})).unwrap();
        assert_eq!(
            started,
            ProtocolMessage::RunStarted {
                session_id: Some("s-1".into())
            }
        );

        let failed = ProtocolMessage::from_value(
            &json!({"event": "run_failed", "payload": {"error": {"message": "quota"}}}),
        )
        .unwrap();
        assert_eq!(
            failed,
            ProtocolMessage::RunFailed {
                error: Some("quota".into())
            }
        );
        assert!(failed.is_terminal());
    }

    #[test]
    fn detects_tool_invocations() {
        let by_type = ProtocolMessage::from_value(
            &json!({"event": "stream", "payload": {"type": "tool_use", "content": "ls"}}),
        )
        .unwrap();
        let by_part = ProtocolMessage::from_value(
            &json!({"event": "stream", "payload": {"content": [{"type": "tool_use"}]}}),
        )
        .unwrap();

        for msg in [by_type, by_part] {
            match msg {
                ProtocolMessage::Stream(chunk) => assert!(chunk.is_tool_invocation()),
                other => panic!("expected stream, got {:?}", other),
            }
        }
    }

    #[test]
    fn non_objects_are_not_messages() {
        assert!(ProtocolMessage::from_value(&json!(42)).is_none());
        assert!(ProtocolMessage::from_value(&json!("text")).is_none());
    }
}
