//! Reduce heterogeneous provider payloads to one content string.
//!
//! Precedence: assistant/message text wins over reasoning text. If neither
//! exists but the provider reports truncation, the best partial text is
//! returned with a diagnostic suffix.

use serde_json::Value;

use crate::error::LlmError;

/// Appended when the provider cut a response short.
pub const TRUNCATION_NOTICE: &str =
    "[response truncated: the model reached its output token limit before finishing]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Message,
    Reasoning,
}

/// One text-bearing piece of a provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub text: String,
}

impl Segment {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Message,
            text: text.into(),
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Reasoning,
            text: text.into(),
        }
    }
}

fn joined(segments: &[Segment], kind: SegmentKind) -> String {
    segments
        .iter()
        .filter(|s| s.kind == kind)
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

/// Pick the canonical content for a response.
pub fn select_content(segments: &[Segment], truncated: bool) -> Result<String, LlmError> {
    let message = joined(segments, SegmentKind::Message);
    if !message.is_empty() {
        return Ok(message);
    }

    let reasoning = joined(segments, SegmentKind::Reasoning);
    if truncated {
        return Ok(if reasoning.is_empty() {
            TRUNCATION_NOTICE.to_string()
        } else {
            format!("{reasoning}\n\n{TRUNCATION_NOTICE}")
        });
    }
    if !reasoning.is_empty() {
        return Ok(reasoning);
    }
    Err(LlmError::invalid_response("provider returned no text content"))
}

/// Collect text from a JSON value of unknown shape.
///
/// Handles direct strings, `{"text": ...}` objects, nested `content`
/// arrays and arrays of any of those.
pub fn collect_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(collect_text).collect::<Vec<_>>().join(""),
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                text.clone()
            } else if let Some(content) = map.get("content") {
                collect_text(content)
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_wins_over_reasoning() {
        let segments = [Segment::reasoning("thinking..."), Segment::message("Answer.")];
        assert_eq!(select_content(&segments, false).unwrap(), "Answer.");
    }

    #[test]
    fn test_reasoning_used_when_no_message() {
        let segments = [Segment::reasoning("only trace")];
        assert_eq!(select_content(&segments, false).unwrap(), "only trace");
    }

    #[test]
    fn test_truncated_returns_partial_with_notice() {
        let segments = [Segment::reasoning("half a thought"), Segment::message("   ")];
        let content = select_content(&segments, true).unwrap();
        assert!(content.starts_with("half a thought"));
        assert!(content.ends_with(TRUNCATION_NOTICE));
    }

    #[test]
    fn test_truncated_with_nothing_still_returns_notice() {
        assert_eq!(select_content(&[], true).unwrap(), TRUNCATION_NOTICE);
    }

    #[test]
    fn test_empty_is_invalid_response() {
        let err = select_content(&[Segment::message("")], false).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse { .. }));
    }

    #[test]
    fn test_collect_text_shapes() {
        assert_eq!(collect_text(&json!("plain")), "plain");
        assert_eq!(collect_text(&json!({"text": "direct"})), "direct");
        assert_eq!(
            collect_text(&json!({"content": [{"type": "output_text", "text": "a"}, {"text": "b"}]})),
            "ab"
        );
        assert_eq!(collect_text(&json!(42)), "");
    }
}
