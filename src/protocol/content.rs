// src/protocol/content.rs

use serde_json::Value;

/// The shapes a `stream` payload's `content` field arrives in.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamContent {
    /// `"content": "some text"`
    Text(String),
    /// `"content": [{"type": "text", "text": "a"}, {"type": "tool_use", ...}]`
    Parts(Vec<ContentPart>),
    /// `"content": {"text": "some text"}`
    Object { text: String },
    /// Missing, null, or any other shape.
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentPart {
    pub kind: Option<String>,
    pub text: Option<String>,
}

impl StreamContent {
    pub fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(s)) => StreamContent::Text(s.clone()),
            Some(Value::Array(items)) => {
                StreamContent::Parts(items.iter().map(ContentPart::from_value).collect())
            }
            Some(Value::Object(map)) => match map.get("text") {
                Some(Value::String(text)) => StreamContent::Object { text: text.clone() },
                _ => StreamContent::Unrecognized,
            },
            _ => StreamContent::Unrecognized,
        }
    }

    /// Text carried by this content; parts are joined with a single space.
    pub fn text(&self) -> String {
        match self {
            StreamContent::Text(text) => text.clone(),
            StreamContent::Object { text } => text.clone(),
            StreamContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(" "),
            StreamContent::Unrecognized => String::new(),
        }
    }

    pub fn has_part_of_kind(&self, kind: &str) -> bool {
        match self {
            StreamContent::Parts(parts) => parts.iter().any(|p| p.kind.as_deref() == Some(kind)),
            _ => false,
        }
    }
}

impl ContentPart {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self {
                kind: map.get("type").and_then(Value::as_str).map(str::to_string),
                text: map.get("text").and_then(Value::as_str).map(str::to_string),
            },
            Value::String(s) => Self {
                kind: None,
                text: Some(s.clone()),
            },
            _ => Self {
                kind: None,
                text: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_text_from_every_shape() {
        let plain = StreamContent::from_value(Some(&json!("hello")));
        assert_eq!(plain.text(), "hello");

        let parts = StreamContent::from_value(Some(&json!([
            {"type": "text", "text": "first"},
            {"type": "tool_use", "name": "bash"},
            {"type": "text", "text": "second"}
        ])));
        assert_eq!(parts.text(), "first second");
        assert!(parts.has_part_of_kind("tool_use"));

        let object = StreamContent::from_value(Some(&json!({"text": "obj"})));
        assert_eq!(object.text(), "obj");
    }

    #[test]
    fn unknown_shapes_yield_empty_text() {
        for value in [json!(42), json!(null), json!({"value": "x"}), json!(true)] {
            let content = StreamContent::from_value(Some(&value));
            assert_eq!(content, StreamContent::Unrecognized);
            assert_eq!(content.text(), "");
        }
        assert_eq!(StreamContent::from_value(None).text(), "");
    }
}
