//! `koruza-types` – shared vocabulary of the KORUZA terminal daemon.
//!
//! Every other crate in the workspace speaks in terms of these types:
//!
//! - [`KoruzaError`] – the workspace-wide error type.
//! - [`Topic`] – the namespaced routing key of a published message.
//! - [`Message`] – a topic plus a JSON payload, with the `topic@json` wire
//!   frame codec used on every publish channel.
//! - [`ProcessEvent`] – payloads published on the `process` topic.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Separator between the topic and the JSON document in a wire frame.
pub const FRAME_SEPARATOR: char = '@';

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type spanning device absence, bus faults, configuration and
/// transport failures.
#[derive(Error, Debug)]
pub enum KoruzaError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Bus fault on bus {bus} at {address:#04x} (offset {offset}, length {length}): {details}")]
    BusFault {
        bus: u8,
        address: u8,
        offset: u8,
        length: usize,
        details: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for KoruzaError {
    fn from(e: serde_json::Error) -> Self {
        KoruzaError::Serialization(e.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Topics
// ────────────────────────────────────────────────────────────────────────────

/// Routing key of a published message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Process lifecycle: `started`, `error` and `watchdog` heartbeats.
    Process,
    /// Device and link telemetry: `motors`, `sfp`, `1wire`, `netmeasure`.
    Status,
    /// Opaque payloads forwarded to an external application.
    Application(String),
}

impl Topic {
    /// Parse a topic string as it appears on the wire.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "process" => Some(Topic::Process),
            "status" => Some(Topic::Status),
            other => other
                .strip_prefix("application.")
                .filter(|id| !id.is_empty())
                .map(|id| Topic::Application(id.to_string())),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Process => write!(f, "process"),
            Topic::Status => write!(f, "status"),
            Topic::Application(id) => write!(f, "application.{id}"),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Messages
// ────────────────────────────────────────────────────────────────────────────

/// A published message: a topic and its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: Topic,
    pub payload: Value,
}

impl Message {
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self { topic, payload }
    }

    /// Encode as a `"<topic>@<json-payload>"` wire frame.
    pub fn to_frame(&self) -> String {
        format!("{}{}{}", self.topic, FRAME_SEPARATOR, self.payload)
    }

    /// Decode a wire frame, splitting on the first `@`.
    ///
    /// # Errors
    ///
    /// Returns [`KoruzaError::Serialization`] when the separator is missing,
    /// the topic is unknown or the payload is not valid JSON.
    pub fn from_frame(frame: &str) -> Result<Self, KoruzaError> {
        let (topic, json) = frame.split_once(FRAME_SEPARATOR).ok_or_else(|| {
            KoruzaError::Serialization(format!("frame has no '{FRAME_SEPARATOR}' separator"))
        })?;
        let topic = Topic::parse(topic)
            .ok_or_else(|| KoruzaError::Serialization(format!("unknown topic '{topic}'")))?;
        let payload = serde_json::from_str(json)?;
        Ok(Self { topic, payload })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Process events
// ────────────────────────────────────────────────────────────────────────────

/// Payloads published on the [`Topic::Process`] topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProcessEvent {
    /// Emitted once when the daemon has finished booting.
    Started { version: String },
    /// A non-fatal fault surfaced to subscribers.
    Error {
        /// Component that raised the fault, e.g. `"bus"` or `"netmeasure"`.
        source: String,
        message: String,
        /// Structured context such as bus id, address, offset and length.
        #[serde(flatten)]
        context: serde_json::Map<String, Value>,
    },
    /// Liveness heartbeat.
    Watchdog {
        /// Wall-clock time in Unix seconds.
        timestamp: f64,
    },
}

impl ProcessEvent {
    /// Heartbeat stamped with the current wall-clock time.
    pub fn watchdog_now() -> Self {
        ProcessEvent::Watchdog {
            timestamp: Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    /// Error event without extra context.
    pub fn error(source: impl Into<String>, message: impl Into<String>) -> Self {
        ProcessEvent::Error {
            source: source.into(),
            message: message.into(),
            context: serde_json::Map::new(),
        }
    }

    /// Error event describing a bus fault.
    pub fn bus_fault(bus: u8, address: u8, offset: u8, length: usize, details: &str) -> Self {
        let mut context = serde_json::Map::new();
        context.insert("bus".into(), bus.into());
        context.insert("address".into(), address.into());
        context.insert("offset".into(), offset.into());
        context.insert("length".into(), length.into());
        ProcessEvent::Error {
            source: "bus".to_string(),
            message: details.to_string(),
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_display_and_parse_agree() {
        for topic in [
            Topic::Process,
            Topic::Status,
            Topic::Application("tracker".to_string()),
        ] {
            assert_eq!(Topic::parse(&topic.to_string()), Some(topic));
        }
        assert_eq!(Topic::parse("application."), None);
        assert_eq!(Topic::parse("bogus"), None);
    }

    #[test]
    fn frame_splits_on_first_separator() {
        let payload = json!({"type": "motors", "note": "a@b"});
        let msg = Message::new(Topic::Status, payload.clone());
        let frame = msg.to_frame();
        assert!(frame.starts_with("status@"));

        let back = Message::from_frame(&frame).unwrap();
        assert_eq!(back.topic, Topic::Status);
        assert_eq!(back.payload, payload);
    }

    #[test]
    fn frame_without_separator_is_rejected() {
        let err = Message::from_frame("status{}").unwrap_err();
        assert!(matches!(err, KoruzaError::Serialization(_)));
    }

    #[test]
    fn process_events_carry_type_discriminator() {
        let started = serde_json::to_value(ProcessEvent::Started {
            version: "1.0.0".into(),
        })
        .unwrap();
        assert_eq!(started["type"], "started");

        let fault = serde_json::to_value(ProcessEvent::bus_fault(1, 0x04, 30, 6, "EIO")).unwrap();
        assert_eq!(fault["type"], "error");
        assert_eq!(fault["source"], "bus");
        assert_eq!(fault["bus"], 1);
        assert_eq!(fault["address"], 4);
        assert_eq!(fault["offset"], 30);
        assert_eq!(fault["length"], 6);

        let beat = serde_json::to_value(ProcessEvent::watchdog_now()).unwrap();
        assert_eq!(beat["type"], "watchdog");
        assert!(beat["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn koruza_error_display() {
        let err = KoruzaError::BusFault {
            bus: 1,
            address: 0x50,
            offset: 0,
            length: 96,
            details: "nack".into(),
        };
        let text = err.to_string();
        assert!(text.contains("0x50"));
        assert!(text.contains("nack"));
    }
}
