//! Typed views of the message types the DevOps Pilot backend pushes.
//!
//! The channel manager itself never looks at `type`; handlers that want typed
//! routing call [`RealtimeEvent::decode`] on each [`InboundMessage`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{envelope::InboundMessage, error::RealtimeResult};

/// Inbound `type` tags recognized by [`RealtimeEvent::decode`].
pub mod kinds {
    pub const CONNECTION: &str = "connection";
    pub const PONG: &str = "pong";
    pub const SUBSCRIBED: &str = "subscribed";
    pub const ECHO: &str = "echo";
    pub const ERROR: &str = "error";
    pub const METRICS_UPDATE: &str = "metrics_update";
    pub const ALERT_TRIGGERED: &str = "alert_triggered";
    pub const DEPLOYMENT_STATUS: &str = "deployment_status";
}

/// Resource utilisation pushed with `metrics_update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub memory_usage: f64,
    #[serde(default)]
    pub disk_usage: f64,
    #[serde(default)]
    pub network_traffic: f64,
}

/// Application-level view of an inbound message.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    /// Greeting sent by the server right after the handshake.
    Connection { message: Option<String> },
    Pong,
    /// Server acknowledgement of a `subscribe`.
    Subscribed { channel: Option<String> },
    /// The server echoed a message type it does not handle.
    Echo { data: Value },
    /// Server-side processing error.
    Error { message: Option<String> },
    MetricsUpdate(MetricsSnapshot),
    AlertTriggered(Value),
    DeploymentStatus(Value),
    Unknown { kind: String },
}

impl RealtimeEvent {
    /// Decode the typed view of `message`.
    ///
    /// Fails only when a recognized type carries a payload of the wrong
    /// shape; unrecognized types decode to [`RealtimeEvent::Unknown`].
    pub fn decode(message: &InboundMessage) -> RealtimeResult<Self> {
        let text = |name: &str| {
            message
                .field(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
        };
        let data = || message.field("data").cloned().unwrap_or(Value::Null);

        let event = match message.kind.as_str() {
            kinds::CONNECTION => Self::Connection {
                message: text("message"),
            },
            kinds::PONG => Self::Pong,
            kinds::SUBSCRIBED => Self::Subscribed {
                channel: text("channel"),
            },
            kinds::ECHO => Self::Echo { data: data() },
            kinds::ERROR => Self::Error {
                message: text("message"),
            },
            kinds::METRICS_UPDATE => Self::MetricsUpdate(serde_json::from_value(data())?),
            kinds::ALERT_TRIGGERED => Self::AlertTriggered(data()),
            kinds::DEPLOYMENT_STATUS => Self::DeploymentStatus(data()),
            other => Self::Unknown {
                kind: other.to_string(),
            },
        };
        Ok(event)
    }

    /// Whether this event is of a recognized type.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }
}
