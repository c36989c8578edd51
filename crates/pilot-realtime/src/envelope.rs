//! Wire envelope shared by both directions of the realtime channel.
//!
//! Every frame is a JSON object `{ "type": ..., "timestamp": ..., ... }`.

use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RealtimeError, RealtimeResult};

/// Maximum length of a channel name in bytes.
pub const MAX_CHANNEL_LEN: usize = 128;

/// Current UTC time as an ISO-8601 string.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Channel name used by `subscribe`/`unsubscribe`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Channel(String);

impl Channel {
    /// Validate and wrap a channel name.
    pub fn new(name: impl Into<String>) -> RealtimeResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(RealtimeError::invalid_channel(name, "must not be empty"));
        }
        if name.len() > MAX_CHANNEL_LEN {
            return Err(RealtimeError::invalid_channel(
                name,
                format!("must be at most {MAX_CHANNEL_LEN} bytes"),
            ));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(RealtimeError::invalid_channel(
                name,
                "must not contain whitespace or control characters",
            ));
        }
        Ok(Self(name))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&str> for Channel {
    type Error = RealtimeError;

    fn try_from(s: &str) -> RealtimeResult<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Channel {
    type Error = RealtimeError;

    fn try_from(s: String) -> RealtimeResult<Self> {
        Self::new(s)
    }
}

/// A decoded server-pushed message.
///
/// The type-specific fields are kept as an opaque payload; routing on
/// [`InboundMessage::kind`] is left to the registered handlers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "now_timestamp")]
    pub timestamp: String,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl InboundMessage {
    /// Build a message with an empty payload.
    pub fn new(kind: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: timestamp.into(),
            payload: Map::new(),
        }
    }

    /// Parse a raw text frame.
    pub fn parse(text: &str) -> RealtimeResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Look up a payload field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Check the type tag.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

/// A unit sent from a consumer to the server.
#[derive(Clone, Debug, PartialEq)]
pub enum OutboundCommand {
    Subscribe { channel: Channel },
    Unsubscribe { channel: Channel },
    Ping,
    /// Arbitrary consumer payload, sent as-is apart from the timestamp.
    Custom(Value),
}

impl OutboundCommand {
    /// The `type` tag this command is sent with, if it has a fixed one.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Subscribe { .. } => Some("subscribe"),
            Self::Unsubscribe { .. } => Some("unsubscribe"),
            Self::Ping => Some("ping"),
            Self::Custom(value) => value.get("type").and_then(Value::as_str),
        }
    }

    /// Build the envelope stamped with the given timestamp.
    pub fn to_envelope_at(&self, timestamp: &str) -> Value {
        let mut envelope = Map::new();
        match self {
            Self::Subscribe { channel } | Self::Unsubscribe { channel } => {
                envelope.insert("type".into(), Value::from(self.kind().unwrap_or_default()));
                envelope.insert("channel".into(), Value::from(channel.as_str()));
            }
            Self::Ping => {
                envelope.insert("type".into(), Value::from("ping"));
            }
            Self::Custom(Value::Object(fields)) => {
                envelope = fields.clone();
                if envelope.contains_key("timestamp") {
                    return Value::Object(envelope);
                }
            }
            Self::Custom(other) => return other.clone(),
        }
        envelope.insert("timestamp".into(), Value::from(timestamp));
        Value::Object(envelope)
    }

    /// Build the envelope stamped with the current time.
    pub fn to_envelope(&self) -> Value {
        self.to_envelope_at(&now_timestamp())
    }

    /// Serialize to a wire frame.
    pub fn encode(&self) -> RealtimeResult<String> {
        Ok(serde_json::to_string(&self.to_envelope())?)
    }
}
