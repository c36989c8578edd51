//! # Pilot Realtime
//!
//! Reconnecting realtime channel client for the DevOps Pilot dashboard.
//!
//! A [`ChannelManager`] keeps one WebSocket connection to the backend push
//! endpoint, reconnects with exponential backoff after abnormal closures, and
//! fans every inbound JSON envelope out to registered handlers.
//!
//! ## Features
//!
//! - **Explicit instances**: build a manager at the composition root and clone the handle
//! - **Reconnection**: exponential backoff with an attempt cap and a single exhaustion notice
//! - **Handlers**: ordered multi-subscriber callbacks with removal tokens
//! - **Event stream**: broadcast [`ChannelEvent`]s for async consumers
//! - **Typed events**: [`RealtimeEvent`] views of the known server message types
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pilot_realtime::{ChannelConfig, ChannelManager, RealtimeEvent, TungsteniteConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChannelConfig::new("http://localhost:8000");
//!     let manager = ChannelManager::new(config, TungsteniteConnector)?;
//!
//!     manager.on_message(|msg| {
//!         if let Ok(RealtimeEvent::MetricsUpdate(metrics)) = RealtimeEvent::decode(msg) {
//!             println!("cpu {}%", metrics.cpu_usage);
//!         }
//!     });
//!
//!     manager.connect().await?;
//!     manager.subscribe("metrics")?;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod endpoint;
pub mod envelope;
pub mod error;
pub mod events;
pub mod handlers;
pub mod manager;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use config::ChannelConfig;
pub use endpoint::resolve_ws_url;
pub use envelope::{Channel, InboundMessage, OutboundCommand};
pub use error::{RealtimeError, RealtimeResult};
pub use events::{MetricsSnapshot, RealtimeEvent};
pub use handlers::{ChannelEvent, ExhaustedInfo, HandlerRegistry, HandlerToken};
pub use manager::{ChannelManager, ConnectionState};
pub use transport::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, CloseInfo, Connector, Frame, FrameSink, FrameStream, Transport,
    TungsteniteConnector,
};
