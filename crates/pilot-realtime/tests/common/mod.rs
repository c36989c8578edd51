//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::{
    collections::VecDeque,
    future::pending,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use pilot_realtime::{
    ChannelConfig, ChannelEvent, CloseInfo, Connector, Frame, FrameSink, RealtimeError,
    RealtimeResult, Transport,
};
use tokio::{
    sync::{broadcast, mpsc},
    time::Instant,
};
use url::Url;

/// How the next handshake behaves.
#[derive(Clone, Copy, Debug)]
pub enum Outcome {
    Accept,
    Refuse,
    /// Never completes.
    Hang,
}

/// Server side of an accepted in-memory connection.
pub struct MockPeer {
    to_client: Option<mpsc::UnboundedSender<RealtimeResult<Frame>>>,
    from_client: mpsc::UnboundedReceiver<Sent>,
    faults: Arc<SinkFaults>,
}

/// Failure switches shared between a peer and the client's sink.
#[derive(Default)]
struct SinkFaults {
    fail_writes: AtomicBool,
    stall_close: AtomicBool,
}

/// What the client wrote to the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum Sent {
    Frame(Frame),
    Close(CloseInfo),
}

impl MockPeer {
    pub fn push_text(&self, text: &str) {
        self.push(Ok(Frame::Text(text.to_string())));
    }

    pub fn push(&self, item: RealtimeResult<Frame>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(item);
        }
    }

    /// Send a close frame with the given code.
    pub fn close(&self, code: u16, reason: &str) {
        self.push(Ok(Frame::Close(Some(CloseInfo::new(code, reason)))));
    }

    /// Make every subsequent client write fail.
    pub fn fail_writes(&self) {
        self.faults.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make the client's close never complete.
    pub fn stall_close(&self) {
        self.faults.stall_close.store(true, Ordering::SeqCst);
    }

    /// End the inbound stream without a close frame.
    pub fn drop_connection(&mut self) {
        self.to_client = None;
    }

    /// Next thing the client wrote.
    pub async fn next_sent(&mut self) -> Option<Sent> {
        self.from_client.recv().await
    }

    /// Next text frame the client wrote, parsed as JSON.
    pub async fn next_json(&mut self) -> Option<serde_json::Value> {
        loop {
            match self.next_sent().await? {
                Sent::Frame(Frame::Text(text)) => return serde_json::from_str(&text).ok(),
                Sent::Frame(_) => continue,
                Sent::Close(_) => return None,
            }
        }
    }

    pub fn try_next_sent(&mut self) -> Option<Sent> {
        self.from_client.try_recv().ok()
    }
}

struct MockSink {
    tx: mpsc::UnboundedSender<Sent>,
    faults: Arc<SinkFaults>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_frame(&mut self, frame: Frame) -> RealtimeResult<()> {
        if self.faults.fail_writes.load(Ordering::SeqCst) {
            return Err(RealtimeError::websocket("broken pipe"));
        }
        self.tx
            .send(Sent::Frame(frame))
            .map_err(|_| RealtimeError::websocket("peer gone"))
    }

    async fn close(&mut self, close: CloseInfo) -> RealtimeResult<()> {
        if self.faults.stall_close.load(Ordering::SeqCst) {
            pending::<()>().await;
        }
        let _ = self.tx.send(Sent::Close(close));
        Ok(())
    }
}

/// Connector that follows a script of handshake outcomes.
///
/// Once the script runs out every handshake is refused.
#[derive(Clone)]
pub struct ScriptedConnector {
    script: Arc<Mutex<VecDeque<Outcome>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

impl ScriptedConnector {
    pub fn new(script: impl IntoIterator<Item = Outcome>) -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            peers,
        };
        (connector, peers_rx)
    }

    /// Instants at which handshakes started.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn push(&self, outcome: Outcome) {
        self.script.lock().unwrap().push_back(outcome);
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, _url: &Url) -> RealtimeResult<Transport> {
        self.attempts.lock().unwrap().push(Instant::now());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Refuse);

        match outcome {
            Outcome::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let stream = stream::unfold(inbound, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed();

                let faults = Arc::new(SinkFaults::default());

                let _ = self.peers.send(MockPeer {
                    to_client: Some(to_client),
                    from_client,
                    faults: Arc::clone(&faults),
                });
                Ok(Transport {
                    sink: Box::new(MockSink {
                        tx: outbound,
                        faults,
                    }),
                    stream,
                })
            }
            Outcome::Refuse => Err(RealtimeError::handshake("connection refused")),
            Outcome::Hang => pending().await,
        }
    }
}

/// Configuration pointing at a dummy endpoint.
pub fn test_config() -> ChannelConfig {
    ChannelConfig::new("http://pilot.test")
}

/// Wait for the first event matching `pred`, skipping the rest.
pub async fn wait_for<F>(events: &mut broadcast::Receiver<ChannelEvent>, mut pred: F) -> ChannelEvent
where
    F: FnMut(&ChannelEvent) -> bool,
{
    let fut = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(600), fut)
        .await
        .expect("timed out waiting for channel event")
}
