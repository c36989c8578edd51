//! Transport seam between the channel actor and a WebSocket implementation.
//!
//! The actor only sees [`Frame`]s: a boxed inbound stream and a [`FrameSink`]
//! for outbound traffic. [`TungsteniteConnector`] is the production
//! implementation; tests plug in scripted connectors.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt, stream::BoxStream};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError, Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::debug;
use url::Url;

use crate::{
    endpoint::redacted,
    error::{RealtimeError, RealtimeResult},
};

/// WebSocket close code for a normal, locally requested closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code for a close frame that carried no status.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// WebSocket close code reported when the stream ended without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code and reason of a finished connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Closure requested locally via `disconnect()`.
    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "normal closure")
    }

    /// Transport dropped without a close handshake.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason)
    }

    /// Only the normal closure code suppresses reconnection.
    pub fn is_normal(&self) -> bool {
        self.code == CLOSE_NORMAL
    }
}

impl fmt::Display for CloseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "{} (code {})", self.reason, self.code)
        }
    }
}

/// A transport-level frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseInfo>),
}

/// Inbound half of an open transport.
pub type FrameStream = BoxStream<'static, RealtimeResult<Frame>>;

/// Outbound half of an open transport.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send_frame(&mut self, frame: Frame) -> RealtimeResult<()>;

    /// Send a close frame and shut the sink down.
    async fn close(&mut self, close: CloseInfo) -> RealtimeResult<()>;
}

/// Both halves of a freshly opened transport.
pub struct Transport {
    pub sink: Box<dyn FrameSink>,
    pub stream: FrameStream,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

/// Opens transports to the push endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake. Resolves once the transport is open.
    async fn connect(&self, url: &Url) -> RealtimeResult<Transport>;
}

/// Production connector backed by `tokio-tungstenite`.
///
/// Protocol-level pings are answered by tungstenite itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> RealtimeResult<Transport> {
        debug!(url = %redacted(url), "Opening WebSocket");
        let (ws, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (sink, stream) = ws.split();
        Ok(Transport {
            sink: Box::new(TungsteniteSink { inner: sink }),
            stream: frame_stream(stream),
        })
    }
}

/// Adapt a tungstenite message stream to [`FrameStream`].
pub fn frame_stream<S>(stream: S) -> FrameStream
where
    S: futures_util::Stream<Item = Result<Message, WsError>> + Send + 'static,
{
    stream
        .filter_map(|item| async move {
            match item {
                Ok(message) => frame_from_message(message).map(Ok),
                Err(e) => Some(Err(RealtimeError::from(e))),
            }
        })
        .boxed()
}

/// [`FrameSink`] over any tungstenite message sink.
pub struct TungsteniteSink<S> {
    inner: S,
}

impl<S> TungsteniteSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S> FrameSink for TungsteniteSink<S>
where
    S: Sink<Message, Error = WsError> + Send + Unpin,
{
    async fn send_frame(&mut self, frame: Frame) -> RealtimeResult<()> {
        self.inner.send(message_from_frame(frame)).await?;
        Ok(())
    }

    async fn close(&mut self, close: CloseInfo) -> RealtimeResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(close.code),
            reason: close.reason.into(),
        };
        // The peer may already be gone; the close is best effort.
        let _ = self.inner.send(Message::Close(Some(frame))).await;
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Binary(data) => Some(Frame::Binary(data)),
        Message::Ping(data) => Some(Frame::Ping(data)),
        Message::Pong(data) => Some(Frame::Pong(data)),
        Message::Close(frame) => Some(Frame::Close(frame.map(|f| {
            let reason: &str = &f.reason;
            CloseInfo::new(u16::from(f.code), reason)
        }))),
        Message::Frame(_) => None,
    }
}

fn message_from_frame(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::text(text),
        Frame::Binary(data) => Message::binary(data),
        Frame::Ping(data) => Message::Ping(data),
        Frame::Pong(data) => Message::Pong(data),
        Frame::Close(info) => Message::Close(info.map(|info| CloseFrame {
            code: CloseCode::from(info.code),
            reason: info.reason.into(),
        })),
    }
}
