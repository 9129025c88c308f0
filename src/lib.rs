pub mod cli;
pub mod client;
pub mod config;
pub mod consumer;
pub mod error;
pub mod normalizer;
pub mod parser;
pub mod providers;
pub mod relay;
pub mod token;
pub mod transcript;
pub mod web;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use error::RelayError;
use parser::Record;

// ---------------------------------------------------------------------------
// Outbound events (relay -> browser)
// ---------------------------------------------------------------------------

/// The closed set of event kinds the relay emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Heartbeat,
    TextDelta,
    Completion,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Heartbeat => "heartbeat",
            EventKind::TextDelta => "text-delta",
            EventKind::Completion => "completion",
            EventKind::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "heartbeat" => Some(EventKind::Heartbeat),
            "text-delta" => Some(EventKind::TextDelta),
            "completion" => Some(EventKind::Completion),
            "error" => Some(EventKind::Error),
            _ => None,
        }
    }

    /// Completion and error end an exchange.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Completion | EventKind::Error)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single normalized event, written to the browser as one SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub kind: EventKind,
    pub payload: String,
}

impl OutboundEvent {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        OutboundEvent {
            kind,
            payload: payload.into(),
        }
    }

    pub fn heartbeat() -> Self {
        Self::new(EventKind::Heartbeat, "Connection established")
    }

    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::new(EventKind::TextDelta, text)
    }

    pub fn completion() -> Self {
        Self::new(EventKind::Completion, "Stream completed")
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(EventKind::Error, message)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Wire form: `event: <kind>\ndata: <json string>\n\n`.
    ///
    /// JSON string encoding escapes newlines, so the payload always fits on
    /// a single `data:` line.
    pub fn frame(&self) -> String {
        let data = serde_json::to_string(&self.payload).unwrap_or_else(|_| "\"\"".to_string());
        format!("event: {}\ndata: {}\n\n", self.kind, data)
    }

    /// Decode a frame read back from the relay. Unknown kinds yield `None`;
    /// a payload that is not a JSON string is taken verbatim.
    pub fn from_record(record: &Record) -> Option<Self> {
        let kind = EventKind::from_name(&record.event)?;
        let payload = match serde_json::from_str::<serde_json::Value>(&record.data) {
            Ok(serde_json::Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(_) => record.data.clone(),
        };
        Some(OutboundEvent { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RecordParser;

    #[test]
    fn test_frame_format() {
        let ev = OutboundEvent::text_delta("Hello");
        assert_eq!(ev.frame(), "event: text-delta\ndata: \"Hello\"\n\n");
    }

    #[test]
    fn test_frame_escapes_newlines() {
        let frame = OutboundEvent::text_delta("a\n\nb").frame();
        assert_eq!(frame.matches("\n\n").count(), 1);
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_frame_parses_back_through_record_parser() {
        let original = OutboundEvent::error("Run failed: \"quota\"\nretry later");
        let mut parser = RecordParser::new();
        let records = parser.push(original.frame().as_bytes());
        assert_eq!(records.len(), 1);
        assert_eq!(OutboundEvent::from_record(&records[0]), Some(original));
    }

    #[test]
    fn test_from_record_unknown_kind_ignored() {
        let record = Record::new("ping", "\"x\"");
        assert!(OutboundEvent::from_record(&record).is_none());
    }

    #[test]
    fn test_from_record_raw_payload_fallback() {
        let record = Record::new("text-delta", "not json");
        let ev = OutboundEvent::from_record(&record).unwrap();
        assert_eq!(ev.payload, "not json");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(OutboundEvent::completion().is_terminal());
        assert!(OutboundEvent::error("x").is_terminal());
        assert!(!OutboundEvent::heartbeat().is_terminal());
        assert!(!OutboundEvent::text_delta("x").is_terminal());
    }

    #[test]
    fn test_event_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&EventKind::TextDelta).unwrap();
        assert_eq!(json, "\"text-delta\"");
    }

    #[test]
    fn test_event_kind_name_roundtrip() {
        for kind in [
            EventKind::Heartbeat,
            EventKind::TextDelta,
            EventKind::Completion,
            EventKind::Error,
        ] {
            assert_eq!(EventKind::from_name(kind.as_str()), Some(kind));
        }
    }
}
