//! Realtime channel configuration.

use std::time::Duration;

use crate::backoff::BackoffPolicy;

/// Configuration for a [`ChannelManager`](crate::ChannelManager).
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    // Endpoint
    /// Base URL of the HTTP API (e.g. `http://localhost:8000`). The push
    /// endpoint is derived from it.
    pub api_base_url: String,
    /// Path of the push endpoint on the API host.
    pub ws_path: String,
    /// Bearer token passed as a query parameter at connect time.
    pub token: Option<String>,

    // Reconnection settings
    /// Delay before the first reconnection attempt.
    pub reconnect_base_delay: Duration,
    /// Maximum delay between reconnection attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnection delays.
    pub reconnect_backoff_factor: f64,
    /// Maximum number of consecutive reconnection attempts.
    pub reconnect_max_attempts: u32,
    /// Random jitter factor (0.0-1.0) for reconnection delays.
    pub reconnect_jitter: f64,
    /// Whether a failed handshake started by `connect()` schedules a retry.
    pub reconnect_on_handshake_failure: bool,

    // Connection
    /// Timeout for a single handshake.
    pub connect_timeout: Duration,
    /// Interval between application-level ping envelopes (None = disabled).
    pub keepalive_interval: Option<Duration>,
    /// Maximum inbound frame size in bytes.
    pub max_message_size: usize,

    // Channels
    /// Capacity of the command channel to the connection actor.
    pub command_channel_capacity: usize,
    /// Capacity of the broadcast event channel.
    pub event_channel_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            ws_path: "/ws".to_string(),
            token: None,
            reconnect_base_delay: Duration::from_millis(3000),
            reconnect_max_delay: Duration::from_secs(300),
            reconnect_backoff_factor: 2.0,
            reconnect_max_attempts: 5,
            reconnect_jitter: 0.0,
            reconnect_on_handshake_failure: false,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: None,
            max_message_size: 16 * 1024 * 1024, // 16 MB
            command_channel_capacity: 64,
            event_channel_capacity: 256,
        }
    }
}

impl ChannelConfig {
    /// Create a new configuration for the given API base URL.
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            ..Default::default()
        }
    }

    /// Set the push endpoint path.
    #[must_use]
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the bearer token used at connect time.
    #[must_use]
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the delay before the first reconnection attempt.
    #[must_use]
    pub fn reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnection backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the maximum reconnection attempts.
    #[must_use]
    pub fn reconnect_max_attempts(mut self, attempts: u32) -> Self {
        self.reconnect_max_attempts = attempts;
        self
    }

    /// Set the reconnection jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Set whether a failed initial handshake is retried with backoff.
    #[must_use]
    pub fn reconnect_on_handshake_failure(mut self, enabled: bool) -> Self {
        self.reconnect_on_handshake_failure = enabled;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the keepalive ping interval.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Set the maximum inbound frame size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the command channel capacity.
    #[must_use]
    pub fn command_channel_capacity(mut self, capacity: usize) -> Self {
        self.command_channel_capacity = capacity;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// The backoff policy described by this configuration.
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay: self.reconnect_base_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
            max_attempts: self.reconnect_max_attempts,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.api_base_url.trim().is_empty() {
            return Err("API base URL cannot be empty".to_string());
        }
        if !self.ws_path.starts_with('/') {
            return Err("WebSocket path must start with '/'".to_string());
        }
        if matches!(&self.token, Some(token) if token.trim().is_empty()) {
            return Err("Token cannot be blank".to_string());
        }
        self.backoff_policy().validate()?;
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        if matches!(self.keepalive_interval, Some(interval) if interval.is_zero()) {
            return Err("Keepalive interval must be > 0".to_string());
        }
        if self.max_message_size == 0 {
            return Err("Max message size must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        if self.event_channel_capacity == 0 {
            return Err("Event channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert!(config.api_base_url.is_empty());
        assert_eq!(config.ws_path, "/ws");
        assert!(config.token.is_none());
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(3000));
        assert_eq!(config.reconnect_max_attempts, 5);
        assert_eq!(config.reconnect_backoff_factor, 2.0);
        assert_eq!(config.reconnect_jitter, 0.0);
        assert!(!config.reconnect_on_handshake_failure);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert!(config.keepalive_interval.is_none());
        assert_eq!(config.max_message_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_builder_pattern() {
        let config = ChannelConfig::new("https://pilot.example.com")
            .token("secret")
            .reconnect_base_delay(Duration::from_millis(500))
            .reconnect_max_attempts(8)
            .reconnect_on_handshake_failure(true)
            .keepalive_interval(Some(Duration::from_secs(20)));

        assert_eq!(config.api_base_url, "https://pilot.example.com");
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_attempts, 8);
        assert!(config.reconnect_on_handshake_failure);
        assert_eq!(config.keepalive_interval, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_backoff_policy_mirrors_config() {
        let config = ChannelConfig::new("http://localhost:8000")
            .reconnect_base_delay(Duration::from_millis(250))
            .reconnect_max_attempts(3);
        let policy = config.backoff_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.factor, 2.0);
    }

    #[test]
    fn test_validation_empty_url() {
        let result = ChannelConfig::default().validate();
        assert_eq!(result.unwrap_err(), "API base URL cannot be empty");
    }

    #[test]
    fn test_validation_invalid_backoff() {
        let config = ChannelConfig::new("http://localhost:8000").reconnect_backoff_factor(0.5);
        assert_eq!(config.validate().unwrap_err(), "Backoff factor must be >= 1.0");
    }

    #[test]
    fn test_validation_blank_token() {
        let config = ChannelConfig::new("http://localhost:8000").token("  ");
        assert_eq!(config.validate().unwrap_err(), "Token cannot be blank");
    }

    #[test]
    fn test_validation_zero_keepalive() {
        let config =
            ChannelConfig::new("http://localhost:8000").keepalive_interval(Some(Duration::ZERO));
        assert_eq!(config.validate().unwrap_err(), "Keepalive interval must be > 0");
    }

    #[test]
    fn test_validation_relative_path() {
        let config = ChannelConfig::new("http://localhost:8000").ws_path("ws");
        assert_eq!(
            config.validate().unwrap_err(),
            "WebSocket path must start with '/'"
        );
    }

    #[test]
    fn test_channel_capacities() {
        let config = ChannelConfig::new("http://localhost:8000")
            .command_channel_capacity(8)
            .event_channel_capacity(32);
        assert_eq!(config.command_channel_capacity, 8);
        assert_eq!(config.event_channel_capacity, 32);

        let config = config.command_channel_capacity(0);
        assert_eq!(
            config.validate().unwrap_err(),
            "Command channel capacity must be > 0"
        );
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(ChannelConfig::new("http://localhost:8000").validate().is_ok());
    }
}
