//! # Session Protocol Logic
//!
//! Everything that happens to one inbound frame, independent of the WebSocket
//! transport: classify it, apply the trigger-word gate, extract the intent,
//! look up the weather and decide what (if anything) goes back to the client.
//!
//! ## Frame Handling:
//! 1. Not JSON → "invalid format" error
//! 2. Unknown type / missing text → error, connection stays open
//! 3. No trigger word at the start → silently ignored
//! 4. Trigger word only → ask for a city
//! 5. No location recognised → say so
//! 6. Otherwise → weather data or a composed failure message
//!
//! A `SessionHandler` belongs to exactly one connection and is driven one
//! frame at a time by the WebSocket actor.

use crate::intent::IntentExtractor;
use crate::session::protocol::{InboundMessage, OutboundMessage};
use crate::weather::{WeatherProvider, WeatherResult};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const INVALID_FORMAT_MESSAGE: &str = "Invalid message format received.";
pub const UNRECOGNIZED_TYPE_MESSAGE: &str = "Unbekannter Nachrichtentyp oder fehlender Text.";
pub const INVALID_MESSAGE_MESSAGE: &str = "Ungültige Nachricht erhalten.";
pub const INTERNAL_ERROR_MESSAGE: &str = "Ein interner Serverfehler ist aufgetreten.";

/// Per-connection protocol state machine.
pub struct SessionHandler {
    session_id: Uuid,
    /// Lower-cased so it can be compared against normalized text.
    trigger_word: String,
    extractor: IntentExtractor,
    weather: Arc<dyn WeatherProvider>,
}

impl SessionHandler {
    pub fn new(session_id: Uuid, trigger_word: &str, weather: Arc<dyn WeatherProvider>) -> Self {
        Self {
            session_id,
            trigger_word: trigger_word.trim().to_lowercase(),
            extractor: IntentExtractor::new(),
            weather,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Handle one raw text frame and return the reply, if any.
    pub async fn handle_frame(&self, raw: &str) -> Option<OutboundMessage> {
        let message = match InboundMessage::parse(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Received non-JSON frame");
                return Some(OutboundMessage::error(INVALID_FORMAT_MESSAGE));
            }
        };

        match message {
            InboundMessage::Transcription { text } => self.handle_transcription(&text).await,
            InboundMessage::Unrecognized { kind } => {
                warn!(
                    session_id = %self.session_id,
                    message_type = %kind,
                    "Unhandled message type or missing text"
                );
                Some(OutboundMessage::error(UNRECOGNIZED_TYPE_MESSAGE))
            }
            InboundMessage::Invalid => {
                warn!(session_id = %self.session_id, "Received message without a type");
                Some(OutboundMessage::error(INVALID_MESSAGE_MESSAGE))
            }
        }
    }

    /// Handle the text of a `transcription_frontend` message.
    pub async fn handle_transcription(&self, text: &str) -> Option<OutboundMessage> {
        let normalized = text.trim().to_lowercase();
        debug!(session_id = %self.session_id, text = %normalized, "Received transcription");

        let Some(rest) = normalized.strip_prefix(self.trigger_word.as_str()) else {
            debug!(
                session_id = %self.session_id,
                trigger = %self.trigger_word,
                "Trigger word not at start, ignoring"
            );
            return None;
        };

        let phrase = rest.trim();
        if phrase.is_empty() {
            info!(session_id = %self.session_id, "Trigger word without a command phrase");
            return Some(OutboundMessage::error(format!(
                "Bitte geben Sie nach '{}' einen Stadtnamen an.",
                self.display_trigger()
            )));
        }

        let intent = self.extractor.extract(phrase);
        let Some(city) = intent.location else {
            info!(
                session_id = %self.session_id,
                phrase = %phrase,
                original = %text,
                "No city recognised in command phrase"
            );
            return Some(OutboundMessage::error(format!(
                "Keine Stadt in '{}' erkannt. Versuchen Sie z.B. '{} Berlin'.",
                phrase,
                self.display_trigger()
            )));
        };

        info!(
            session_id = %self.session_id,
            city = %city,
            time_period = %intent.time_period,
            is_weather_query = intent.is_weather_query,
            "City extracted, fetching weather"
        );

        let reply = match self.weather.fetch(&city).await {
            WeatherResult::Success { payload } => OutboundMessage::DisplayWeather {
                city,
                weather_payload: payload,
            },
            WeatherResult::Failure { reason, details } => {
                OutboundMessage::error(failure_message(&city, &reason, details.as_deref()))
            }
        };
        Some(reply)
    }

    /// Trigger word as users say it: "wetter" → "Wetter".
    fn display_trigger(&self) -> String {
        let mut chars = self.trigger_word.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

/// Text shown when a lookup failed. Provider details win over the generic reason.
fn failure_message(city: &str, reason: &str, details: Option<&str>) -> String {
    let mut message = format!("Wetterdaten für '{}' konnten nicht abgerufen werden.", city);
    match details {
        Some(details) => message.push_str(&format!(" Details: {}", details)),
        None => message.push_str(&format!(" Grund: {}", reason)),
    }
    message
}
