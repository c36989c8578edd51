//! Error handling for the realtime channel.

use std::time::Duration;

use thiserror::Error;

/// The main result type used throughout the realtime channel.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

/// Error type for all realtime channel operations.
#[derive(Error, Debug)]
pub enum RealtimeError {
    /// `connect()` was called while another handshake was still in flight.
    #[error("Connection in progress")]
    ConnectionInProgress,

    /// An outbound operation was attempted while the channel was not open.
    #[error("Connection is not open")]
    ConnectionNotOpen,

    /// The connection was closed before the operation could complete.
    #[error("Connection closed{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionClosed { reason: Option<String> },

    /// Transport-level WebSocket errors.
    #[error("WebSocket error: {message}")]
    WebSocket { message: String },

    /// The transport handshake was refused or failed.
    #[error("Handshake failed: {message}")]
    Handshake { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// A channel name failed validation.
    #[error("Invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Endpoint URL errors
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Automatic reconnection gave up.
    #[error("Reconnection gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::ConnectionClosed { reason: None }
            }
            WsError::Http(response) => Self::Handshake {
                message: format!("server responded with HTTP {}", response.status()),
            },
            WsError::Url(err) => Self::config(format!("Invalid WebSocket URL: {err}")),
            other => Self::websocket(other.to_string()),
        }
    }
}

impl RealtimeError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
        }
    }

    /// Create a connection-closed error.
    pub fn connection_closed(reason: Option<String>) -> Self {
        Self::ConnectionClosed { reason }
    }

    /// Create an invalid channel error.
    pub fn invalid_channel(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidChannel {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is an expected runtime condition rather than a
    /// programmer error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::Config { .. } | Self::InvalidChannel { .. } | Self::Internal { .. }
        )
    }
}
