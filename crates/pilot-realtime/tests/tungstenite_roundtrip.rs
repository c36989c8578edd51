use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use pilot_realtime::{
    ChannelConfig, ChannelEvent, ChannelManager, InboundMessage, RealtimeEvent,
    TungsteniteConnector,
};
use serde_json::{Value, json};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
    time::timeout,
};
use tokio_tungstenite::{
    accept_async,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};

/// Behaviour of the test backend.
#[derive(Clone, Copy)]
struct ServerOptions {
    /// Close the first connection with 1001 right after the greeting.
    close_first: bool,
}

struct TestServer {
    url: String,
    connections: Arc<AtomicUsize>,
    /// Close codes received from clients.
    closes: mpsc::UnboundedReceiver<u16>,
}

/// Minimal backend: greets, answers `ping` with `pong`, acknowledges
/// `subscribe`, and echoes everything else.
async fn start_test_server(options: ServerOptions) -> std::io::Result<TestServer> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let connections = Arc::new(AtomicUsize::new(0));
    let (close_tx, closes) = mpsc::unbounded_channel();

    let counter = Arc::clone(&connections);
    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let close_tx = close_tx.clone();

            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };

                let greeting = json!({
                    "type": "connection",
                    "message": "Connected to DevOps Pilot WebSocket",
                    "timestamp": "2024-01-01T00:00:00Z"
                });
                if ws.send(Message::text(greeting.to_string())).await.is_err() {
                    return;
                }

                if options.close_first && index == 0 {
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "restarting".into(),
                        }))
                        .await;
                    // Report the client's close reply, if any.
                    while let Some(Ok(msg)) = ws.next().await {
                        if let Message::Close(frame) = msg {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                            let _ = close_tx.send(code);
                        }
                    }
                    return;
                }

                while let Some(Ok(msg)) = ws.next().await {
                    match msg {
                        Message::Text(text) => {
                            let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                                continue;
                            };
                            let reply = match request["type"].as_str() {
                                Some("ping") => json!({"type": "pong", "timestamp": "t"}),
                                Some("subscribe") => json!({
                                    "type": "subscribed",
                                    "channel": request["channel"],
                                    "timestamp": "t"
                                }),
                                _ => json!({"type": "echo", "data": request, "timestamp": "t"}),
                            };
                            // A frame the client must tolerate.
                            let _ = ws.send(Message::text("not json")).await;
                            if ws.send(Message::text(reply.to_string())).await.is_err() {
                                return;
                            }
                        }
                        Message::Close(frame) => {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(1005);
                            let _ = close_tx.send(code);
                            return;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    Ok(TestServer {
        url: format!("http://{addr}"),
        connections,
        closes,
    })
}

async fn next_message(
    events: &mut broadcast::Receiver<ChannelEvent>,
    kind: &str,
) -> InboundMessage {
    let fut = async {
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Message(msg)) if msg.is(kind) => return msg,
                Ok(_) => continue,
                Err(e) => panic!("event stream error: {e}"),
            }
        }
    };
    timeout(Duration::from_secs(5), fut)
        .await
        .expect("timed out waiting for message")
}

#[tokio::test]
async fn test_round_trip_against_backend() {
    let server = start_test_server(ServerOptions { close_first: false })
        .await
        .expect("server");
    let manager = ChannelManager::new(ChannelConfig::new(&server.url), TungsteniteConnector)
        .expect("manager");
    let mut events = manager.events();

    manager.connect().await.expect("connect");

    let greeting = next_message(&mut events, "connection").await;
    assert_eq!(
        RealtimeEvent::decode(&greeting).unwrap(),
        RealtimeEvent::Connection {
            message: Some("Connected to DevOps Pilot WebSocket".into())
        }
    );

    manager.subscribe("metrics").expect("subscribe");
    let ack = next_message(&mut events, "subscribed").await;
    assert_eq!(
        RealtimeEvent::decode(&ack).unwrap(),
        RealtimeEvent::Subscribed {
            channel: Some("metrics".into())
        }
    );

    manager.ping().expect("ping");
    let pong = next_message(&mut events, "pong").await;
    assert_eq!(pong.timestamp, "t");

    assert!(manager.send(&json!({"type": "hello"})));
    let echo = next_message(&mut events, "echo").await;
    assert_eq!(echo.field("data").unwrap()["type"], "hello");

    assert!(manager.is_open());
}

#[tokio::test]
async fn test_disconnect_sends_normal_close() {
    let mut server = start_test_server(ServerOptions { close_first: false })
        .await
        .expect("server");
    let manager = ChannelManager::new(ChannelConfig::new(&server.url), TungsteniteConnector)
        .expect("manager");

    manager.connect().await.expect("connect");
    manager.disconnect();

    let code = timeout(Duration::from_secs(5), server.closes.recv())
        .await
        .expect("timed out waiting for close")
        .expect("close code");
    assert_eq!(code, 1000);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_reconnects_after_server_going_away() {
    let mut server = start_test_server(ServerOptions { close_first: true })
        .await
        .expect("server");
    let config =
        ChannelConfig::new(&server.url).reconnect_base_delay(Duration::from_millis(50));
    let manager = ChannelManager::new(config, TungsteniteConnector).expect("manager");
    let mut events = manager.events();

    manager.connect().await.expect("connect");

    let reopened = async {
        let mut closed_with = None;
        loop {
            match events.recv().await {
                Ok(ChannelEvent::Closed(info)) => closed_with = Some(info.code),
                Ok(ChannelEvent::Opened) if closed_with.is_some() => return closed_with,
                Ok(_) => continue,
                Err(e) => panic!("event stream error: {e}"),
            }
        }
    };
    let code = timeout(Duration::from_secs(5), reopened)
        .await
        .expect("timed out waiting for reconnect");

    assert_eq!(code, Some(1001));
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);

    let acknowledged = timeout(Duration::from_secs(5), server.closes.recv())
        .await
        .expect("timed out waiting for close reply");
    assert_eq!(acknowledged, Some(1001));
    assert_eq!(manager.failed_attempts(), 0);
}

#[tokio::test]
async fn test_refused_handshake_reports_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let manager = ChannelManager::new(
        ChannelConfig::new(format!("http://{addr}")),
        TungsteniteConnector,
    )
    .expect("manager");
    assert!(manager.connect().await.is_err());
    assert!(!manager.is_open());
}
