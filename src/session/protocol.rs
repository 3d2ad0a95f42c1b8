//! # Wire Protocol
//!
//! JSON messages exchanged with the voice frontend over the WebSocket.
//!
//! ## Client → Server:
//! ```json
//! {"type": "transcription_frontend", "text": "wetter berlin"}
//! ```
//!
//! ## Server → Client:
//! ```json
//! {"type": "command_understood_display_weather", "city": "berlin", "weatherPayload": {...}}
//! {"type": "error_from_python", "message": "..."}
//! ```
//!
//! Inbound frames are parsed into a generic JSON value first and then
//! classified, so that a missing or unknown `type` ends up as its own variant
//! instead of a deserialization error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` value of the only command the frontend sends.
pub const TRANSCRIPTION_TYPE: &str = "transcription_frontend";

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A transcribed utterance ready for the trigger check.
    Transcription { text: String },
    /// A `type` was given, but it is not ours or the `text` is missing / not a string.
    Unrecognized { kind: String },
    /// Valid JSON without a usable `type`.
    Invalid,
}

/// The frame was not JSON at all.
#[derive(Debug)]
pub struct MalformedFrame(pub serde_json::Error);

impl std::fmt::Display for MalformedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame is not valid JSON: {}", self.0)
    }
}

impl InboundMessage {
    /// Parse and classify a raw text frame.
    pub fn parse(raw: &str) -> Result<Self, MalformedFrame> {
        let value: Value = serde_json::from_str(raw).map_err(MalformedFrame)?;
        Ok(Self::classify(&value))
    }

    fn classify(value: &Value) -> Self {
        let kind = value.get("type");
        let text = value.get("text").and_then(Value::as_str);

        match (kind.and_then(Value::as_str), text) {
            (Some(TRANSCRIPTION_TYPE), Some(text)) => InboundMessage::Transcription {
                text: text.to_string(),
            },
            _ => match kind {
                Some(kind) if is_present(kind) => InboundMessage::Unrecognized {
                    kind: match kind {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                },
                _ => InboundMessage::Invalid,
            },
        }
    }
}

// `null`, `""`, `false`, `0` and empty containers count as "no type given".
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Messages sent back to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundMessage {
    /// The command was understood and weather data is attached.
    #[serde(rename = "command_understood_display_weather")]
    DisplayWeather {
        city: String,
        #[serde(rename = "weatherPayload")]
        weather_payload: Value,
    },

    /// Anything the user should be told went wrong.
    #[serde(rename = "error_from_python")]
    Error { message: String },
}

impl OutboundMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutboundMessage::Error {
            message: message.into(),
        }
    }
}
