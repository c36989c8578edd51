//! Realtime channel manager.
//!
//! [`ChannelManager`] is a cheap, cloneable handle to a background actor that
//! owns the WebSocket connection. Build one instance at the composition root
//! and clone it wherever the channel is needed.

mod actor;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

use self::actor::{ActorCommand, ChannelActor};
use crate::{
    config::ChannelConfig,
    endpoint::{redacted, resolve_ws_url},
    envelope::{Channel, InboundMessage, OutboundCommand},
    error::{RealtimeError, RealtimeResult},
    handlers::{ChannelEvent, ExhaustedInfo, HandlerRegistry, HandlerToken},
    transport::{CloseInfo, Connector},
};

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No transport and no handshake in flight. A reconnect may be scheduled.
    Disconnected,
    /// A handshake is in flight.
    Connecting,
    /// Transport open; outbound operations are accepted.
    Open,
    /// An explicit disconnect is closing the transport.
    Closing,
}

impl ConnectionState {
    /// Check if the channel accepts outbound traffic.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// State shared between the handles and the actor.
pub(crate) struct Shared {
    state: RwLock<ConnectionState>,
    /// Consecutive failed reconnect attempts.
    failures: AtomicU32,
    handlers: HandlerRegistry,
    events: broadcast::Sender<ChannelEvent>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn broadcast(&self, event: ChannelEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Handle to a reconnecting realtime channel.
///
/// Dropping the last handle closes the transport with the normal close code
/// and stops the actor. Handlers that capture a handle keep the actor alive
/// until they are removed or [`ChannelManager::disconnect`] is called.
#[derive(Clone)]
pub struct ChannelManager {
    shared: Arc<Shared>,
    cmd_tx: mpsc::Sender<ActorCommand>,
    url: Arc<Url>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("url", &redacted(&self.url))
            .field("state", &self.state())
            .field("handlers", &self.shared.handlers)
            .finish()
    }
}

impl ChannelManager {
    /// Create a channel manager and spawn its actor.
    ///
    /// No connection is made until [`ChannelManager::connect`] is called.
    /// Must be called from within a tokio runtime.
    pub fn new(config: ChannelConfig, connector: impl Connector) -> RealtimeResult<Self> {
        config.validate().map_err(RealtimeError::config)?;
        let url = resolve_ws_url(&config.api_base_url, &config.ws_path, config.token.as_deref())?;

        let config = Arc::new(config);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);
        let (events, _) = broadcast::channel(config.event_channel_capacity);
        let shared = Arc::new(Shared {
            state: RwLock::new(ConnectionState::Disconnected),
            failures: AtomicU32::new(0),
            handlers: HandlerRegistry::new(),
            events,
        });

        let actor = ChannelActor::new(
            Arc::clone(&config),
            url.clone(),
            Arc::new(connector),
            Arc::clone(&shared),
            cmd_rx,
        );
        tokio::spawn(actor.run());

        info!(url = %redacted(&url), "Realtime channel manager created");

        Ok(Self {
            shared,
            cmd_tx,
            url: Arc::new(url),
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the channel.
    ///
    /// Resolves once the handshake succeeds or fails. Resolves immediately
    /// when the channel is already open, and fails with
    /// [`RealtimeError::ConnectionInProgress`] while another handshake is in
    /// flight.
    pub async fn connect(&self) -> RealtimeResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Connect { reply_tx })
            .await
            .map_err(|_| RealtimeError::internal("Channel actor stopped"))?;

        reply_rx
            .await
            .map_err(|_| RealtimeError::connection_closed(Some("channel actor stopped".into())))?
    }

    /// Close the channel with the normal close code.
    ///
    /// Cancels any scheduled reconnect, aborts an in-flight handshake and
    /// resets the failure counter. Safe to call in any state.
    pub fn disconnect(&self) {
        {
            let mut state = self.shared.state.write();
            if *state != ConnectionState::Disconnected {
                *state = ConnectionState::Closing;
            }
        }

        match self.cmd_tx.try_send(ActorCommand::Disconnect) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Channel actor already stopped");
            }
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                let cmd_tx = self.cmd_tx.clone();
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if cmd_tx.send(cmd).await.is_err() {
                                warn!("Channel actor stopped while sending disconnect");
                            }
                        });
                    }
                    Err(_) => {
                        if cmd_tx.blocking_send(cmd).is_err() {
                            warn!("Channel actor stopped while sending disconnect");
                        }
                    }
                }
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Consecutive failed reconnect attempts since the last successful open.
    pub fn failed_attempts(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }

    /// The resolved push endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Send an arbitrary payload.
    ///
    /// Returns `true` only when the channel is open, the payload serialized,
    /// and the frame was queued for the transport. JSON objects without a
    /// `timestamp` field get one.
    pub fn send<T: Serialize + ?Sized>(&self, payload: &T) -> bool {
        if !self.is_open() {
            debug!("Send skipped; channel not open");
            return false;
        }

        let value = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize payload");
                return false;
            }
        };
        self.send_command(OutboundCommand::Custom(value)).is_ok()
    }

    /// Send a command, reporting why it could not be queued.
    pub fn send_command(&self, cmd: OutboundCommand) -> RealtimeResult<()> {
        if !self.is_open() {
            return Err(RealtimeError::ConnectionNotOpen);
        }

        let text = cmd.encode()?;
        debug!(kind = cmd.kind().unwrap_or("custom"), "Queueing outbound message");
        self.cmd_tx
            .try_send(ActorCommand::Send { text })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    RealtimeError::websocket("Outbound queue is full")
                }
                mpsc::error::TrySendError::Closed(_) => {
                    RealtimeError::connection_closed(Some("channel actor stopped".into()))
                }
            })
    }

    /// Ask the server to start pushing events for `channel`.
    pub fn subscribe(&self, channel: &str) -> RealtimeResult<()> {
        let channel = Channel::new(channel)?;
        self.send_command(OutboundCommand::Subscribe { channel })
    }

    /// Ask the server to stop pushing events for `channel`.
    pub fn unsubscribe(&self, channel: &str) -> RealtimeResult<()> {
        let channel = Channel::new(channel)?;
        self.send_command(OutboundCommand::Unsubscribe { channel })
    }

    /// Send an application-level ping; the server answers with `pong`.
    pub fn ping(&self) -> RealtimeResult<()> {
        self.send_command(OutboundCommand::Ping)
    }

    // ========================================================================
    // Handlers
    // ========================================================================

    /// Register a handler for every parsed inbound message.
    pub fn on_message(
        &self,
        handler: impl Fn(&InboundMessage) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.shared.handlers.on_message(handler)
    }

    /// Register a handler run after each successful handshake.
    pub fn on_open(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerToken {
        self.shared.handlers.on_open(handler)
    }

    /// Register a handler run whenever an open transport closes.
    pub fn on_close(&self, handler: impl Fn(&CloseInfo) + Send + Sync + 'static) -> HandlerToken {
        self.shared.handlers.on_close(handler)
    }

    /// Register a handler for handshake and transport errors.
    pub fn on_error(
        &self,
        handler: impl Fn(&RealtimeError) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.shared.handlers.on_error(handler)
    }

    /// Register a handler run once when reconnection gives up.
    pub fn on_exhausted(
        &self,
        handler: impl Fn(&ExhaustedInfo) + Send + Sync + 'static,
    ) -> HandlerToken {
        self.shared.handlers.on_exhausted(handler)
    }

    /// Unregister a handler. Returns `false` if the token was unknown.
    pub fn remove_handler(&self, token: HandlerToken) -> bool {
        self.shared.handlers.remove(token)
    }

    /// Subscribe to the lifecycle event stream.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }
}
