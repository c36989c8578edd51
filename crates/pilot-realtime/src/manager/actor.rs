//! Connection actor for the realtime channel.
//!
//! The actor runs in a background task and owns the transport. Commands from
//! [`super::ChannelManager`], handshake completion, reconnect timer expiry,
//! keepalive ticks and inbound frames are all handled in one `select!` loop,
//! so state transitions never interleave.

use std::{future::pending, pin::Pin, sync::Arc, sync::atomic::Ordering, time::Duration};

use futures_util::{FutureExt, StreamExt, future::BoxFuture};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, Interval, MissedTickBehavior, Sleep, interval_at, sleep, timeout},
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{ConnectionState, Shared};
use crate::{
    backoff::BackoffPolicy,
    config::ChannelConfig,
    endpoint::redacted,
    envelope::{InboundMessage, OutboundCommand},
    error::{RealtimeError, RealtimeResult},
    handlers::{ChannelEvent, ExhaustedInfo},
    transport::{CLOSE_NO_STATUS, CloseInfo, Connector, Frame, Transport},
};

/// Commands sent from the handle to the connection actor.
pub(crate) enum ActorCommand {
    /// Open the transport and report the handshake outcome.
    Connect {
        reply_tx: oneshot::Sender<RealtimeResult<()>>,
    },
    /// Write an encoded envelope.
    Send { text: String },
    /// Close with the normal code and stop reconnecting.
    Disconnect,
}

/// What started a handshake; decides whether a failure reschedules.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AttemptOrigin {
    Manual,
    Reconnect,
}

struct Handshake {
    origin: AttemptOrigin,
    reply_tx: Option<oneshot::Sender<RealtimeResult<()>>>,
    future: BoxFuture<'static, RealtimeResult<Transport>>,
}

pub(crate) struct ChannelActor {
    config: Arc<ChannelConfig>,
    policy: BackoffPolicy,
    url: Url,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cmd_rx: mpsc::Receiver<ActorCommand>,
    handshake: Option<Handshake>,
    transport: Option<Transport>,
    reconnect_timer: Option<Pin<Box<Sleep>>>,
    keepalive: Option<Interval>,
    /// Set once the terminal exhaustion notification has fired.
    exhausted: bool,
    last_close: Option<CloseInfo>,
}

impl ChannelActor {
    pub(crate) fn new(
        config: Arc<ChannelConfig>,
        url: Url,
        connector: Arc<dyn Connector>,
        shared: Arc<Shared>,
        cmd_rx: mpsc::Receiver<ActorCommand>,
    ) -> Self {
        Self {
            policy: config.backoff_policy(),
            config,
            url,
            connector,
            shared,
            cmd_rx,
            handshake: None,
            transport: None,
            reconnect_timer: None,
            keepalive: None,
            exhausted: false,
            last_close: None,
        }
    }

    /// Run the actor until every handle has been dropped.
    pub(crate) async fn run(mut self) {
        debug!(url = %redacted(&self.url), "Starting realtime channel actor");

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            info!("All channel handles dropped; shutting down actor");
                            self.close_locally().await;
                            break;
                        }
                    }
                }

                result = next_handshake(&mut self.handshake) => {
                    self.finish_handshake(result);
                }

                () = reconnect_due(&mut self.reconnect_timer) => {
                    self.reconnect_timer = None;
                    debug!(attempt = self.failed_attempts(), "Reconnect timer fired");
                    self.start_handshake(AttemptOrigin::Reconnect, None);
                }

                frame = next_frame(&mut self.transport) => {
                    self.handle_frame(frame).await;
                }

                () = keepalive_tick(&mut self.keepalive) => {
                    self.send_keepalive().await;
                }
            }
        }

        debug!("Realtime channel actor stopped");
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::Connect { reply_tx } => self.handle_connect(reply_tx),
            ActorCommand::Send { text } => {
                if let Err(e) = self.send_frame(Frame::Text(text)).await {
                    warn!(error = %e, "Failed to send message");
                }
            }
            ActorCommand::Disconnect => {
                info!("Disconnect requested");
                self.close_locally().await;
            }
        }
    }

    fn handle_connect(&mut self, reply_tx: oneshot::Sender<RealtimeResult<()>>) {
        if self.transport.is_some() {
            let _ = reply_tx.send(Ok(()));
            return;
        }
        if self.handshake.is_some() {
            let _ = reply_tx.send(Err(RealtimeError::ConnectionInProgress));
            return;
        }

        let origin = if self.reconnect_timer.take().is_some() {
            debug!("Reconnect pending; connecting now");
            AttemptOrigin::Reconnect
        } else {
            if self.exhausted {
                self.exhausted = false;
                self.shared.failures.store(0, Ordering::SeqCst);
            }
            AttemptOrigin::Manual
        };
        self.start_handshake(origin, Some(reply_tx));
    }

    fn start_handshake(
        &mut self,
        origin: AttemptOrigin,
        reply_tx: Option<oneshot::Sender<RealtimeResult<()>>>,
    ) {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let limit = self.config.connect_timeout;

        info!(url = %redacted(&self.url), ?origin, "Connecting realtime channel");
        let future = async move {
            match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(RealtimeError::timeout(limit)),
            }
        }
        .boxed();

        self.shared.set_state(ConnectionState::Connecting);
        self.handshake = Some(Handshake {
            origin,
            reply_tx,
            future,
        });
    }

    fn finish_handshake(&mut self, result: RealtimeResult<Transport>) {
        let Some(handshake) = self.handshake.take() else {
            return;
        };

        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                self.reconnect_timer = None;
                self.exhausted = false;
                self.shared.failures.store(0, Ordering::SeqCst);
                self.keepalive = self.config.keepalive_interval.map(|period| {
                    let mut interval = interval_at(Instant::now() + period, period);
                    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    interval
                });
                self.shared.set_state(ConnectionState::Open);

                info!(url = %redacted(&self.url), "Realtime channel open");
                self.shared.handlers.emit_open();
                self.shared.broadcast(ChannelEvent::Opened);
                if let Some(reply_tx) = handshake.reply_tx {
                    let _ = reply_tx.send(Ok(()));
                }
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);

                warn!(error = %e, origin = ?handshake.origin, "Realtime channel handshake failed");
                self.shared.handlers.emit_error(&e);
                self.shared.broadcast(ChannelEvent::Error(e.to_string()));
                if let Some(reply_tx) = handshake.reply_tx {
                    let _ = reply_tx.send(Err(e));
                }

                if handshake.origin == AttemptOrigin::Reconnect
                    || self.config.reconnect_on_handshake_failure
                {
                    self.schedule_reconnect();
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<RealtimeResult<Frame>>) {
        match frame {
            Some(Ok(Frame::Text(text))) => self.dispatch(&text),
            Some(Ok(Frame::Binary(data))) => match std::str::from_utf8(&data) {
                Ok(text) => self.dispatch(text),
                Err(e) => warn!(error = %e, len = data.len(), "Dropping non-UTF-8 binary frame"),
            },
            Some(Ok(Frame::Ping(_))) => debug!("Received ping"),
            Some(Ok(Frame::Pong(_))) => debug!("Received pong"),
            Some(Ok(Frame::Close(close))) => {
                let close = close.unwrap_or_else(|| CloseInfo::new(CLOSE_NO_STATUS, ""));
                // Echo the peer's code; 1005 must not go on the wire.
                let reply = if close.code == CLOSE_NO_STATUS {
                    CloseInfo::normal()
                } else {
                    close.clone()
                };
                if let Some(transport) = self.transport.as_mut() {
                    close_sink(transport, reply, self.config.connect_timeout).await;
                }
                self.handle_closed(close);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Realtime channel transport error");
                self.shared.handlers.emit_error(&e);
                self.shared.broadcast(ChannelEvent::Error(e.to_string()));
                self.handle_closed(CloseInfo::abnormal(e.to_string()));
            }
            None => self.handle_closed(CloseInfo::abnormal("connection lost")),
        }
    }

    /// Parse one inbound envelope and fan it out.
    fn dispatch(&self, text: &str) {
        if text.len() > self.config.max_message_size {
            warn!(
                len = text.len(),
                max = self.config.max_message_size,
                "Dropping oversize frame"
            );
            return;
        }

        match InboundMessage::parse(text) {
            Ok(message) => {
                debug!(kind = %message.kind, "Received message");
                self.shared.handlers.emit_message(&message);
                self.shared.broadcast(ChannelEvent::Message(message));
            }
            Err(e) => warn!(error = %e, "Dropping malformed frame"),
        }
    }

    /// Remote or abnormal closure of an open transport.
    fn handle_closed(&mut self, close: CloseInfo) {
        self.transport = None;
        self.keepalive = None;
        self.shared.set_state(ConnectionState::Disconnected);

        if close.is_normal() {
            info!(code = close.code, reason = %close.reason, "Realtime channel closed");
        } else {
            warn!(code = close.code, reason = %close.reason, "Realtime channel closed abnormally");
        }
        self.last_close = Some(close.clone());
        self.shared.handlers.emit_close(&close);
        self.shared.broadcast(ChannelEvent::Closed(close.clone()));

        if !close.is_normal() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let failed = self.failed_attempts();

        if self.policy.allows(failed) {
            let attempt = failed + 1;
            let delay = self.policy.delay_for_attempt(attempt);
            self.shared.failures.store(attempt, Ordering::SeqCst);
            info!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Scheduling reconnect"
            );
            self.reconnect_timer = Some(Box::pin(sleep(delay)));
            self.shared
                .broadcast(ChannelEvent::ReconnectScheduled { attempt, delay });
            return;
        }

        if self.exhausted {
            return;
        }
        self.exhausted = true;
        error!(attempts = failed, "Reconnect attempts exhausted; giving up");
        let err = RealtimeError::ReconnectExhausted { attempts: failed };
        self.shared.handlers.emit_error(&err);
        self.shared.broadcast(ChannelEvent::Error(err.to_string()));

        let info = ExhaustedInfo {
            attempts: failed,
            last_close: self.last_close.clone(),
        };
        self.shared.handlers.emit_exhausted(&info);
        self.shared.broadcast(ChannelEvent::ReconnectExhausted(info));
    }

    /// Tear everything down with the normal close code.
    async fn close_locally(&mut self) {
        self.shared.set_state(ConnectionState::Closing);
        self.reconnect_timer = None;
        self.keepalive = None;

        if let Some(handshake) = self.handshake.take() {
            debug!("Aborting in-flight handshake");
            if let Some(reply_tx) = handshake.reply_tx {
                let _ = reply_tx.send(Err(RealtimeError::connection_closed(Some(
                    "disconnect requested".to_string(),
                ))));
            }
        }

        if let Some(mut transport) = self.transport.take() {
            let close = CloseInfo::normal();
            close_sink(&mut transport, close.clone(), self.config.connect_timeout).await;
            info!("Realtime channel closed");
            self.last_close = Some(close.clone());
            self.shared.handlers.emit_close(&close);
            self.shared.broadcast(ChannelEvent::Closed(close));
        }

        self.shared.failures.store(0, Ordering::SeqCst);
        self.exhausted = false;
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn send_keepalive(&mut self) {
        match OutboundCommand::Ping.encode() {
            Ok(text) => {
                debug!("Sending keepalive ping");
                if let Err(e) = self.send_frame(Frame::Text(text)).await {
                    warn!(error = %e, "Failed to send keepalive ping");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode keepalive ping"),
        }
    }

    /// Write a frame; a write failure is treated as abnormal closure.
    async fn send_frame(&mut self, frame: Frame) -> RealtimeResult<()> {
        let Some(transport) = self.transport.as_mut() else {
            debug!("Dropping outbound frame; channel not open");
            return Err(RealtimeError::ConnectionNotOpen);
        };

        match transport.sink.send_frame(frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.handlers.emit_error(&e);
                self.shared.broadcast(ChannelEvent::Error(e.to_string()));
                self.handle_closed(CloseInfo::abnormal(e.to_string()));
                Err(e)
            }
        }
    }

    fn failed_attempts(&self) -> u32 {
        self.shared.failures.load(Ordering::SeqCst)
    }
}

/// Best-effort close of the outbound half, bounded by `limit`.
async fn close_sink(transport: &mut Transport, close: CloseInfo, limit: Duration) {
    match timeout(limit, transport.sink.close(close)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Error while closing transport"),
        Err(_) => warn!(
            timeout_ms = limit.as_millis() as u64,
            "Timed out closing transport"
        ),
    }
}

async fn next_handshake(handshake: &mut Option<Handshake>) -> RealtimeResult<Transport> {
    match handshake {
        Some(handshake) => (&mut handshake.future).await,
        None => pending().await,
    }
}

async fn reconnect_due(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn next_frame(transport: &mut Option<Transport>) -> Option<RealtimeResult<Frame>> {
    match transport {
        Some(transport) => transport.stream.next().await,
        None => pending().await,
    }
}

async fn keepalive_tick(keepalive: &mut Option<Interval>) {
    match keepalive {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}
