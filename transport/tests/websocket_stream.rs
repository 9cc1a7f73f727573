#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use opsync_protocol::RawPayload;
use opsync_transport::ConnectionStatus;
use opsync_transport::StreamingClient;
use opsync_transport::TransportConfig;
use opsync_transport::TransportEvent;
use pretty_assertions::assert_eq;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Bytes;
use tokio_tungstenite::tungstenite::Message;

fn one_shot_config() -> TransportConfig {
    TransportConfig {
        reconnect_delay: Duration::from_millis(20),
        max_reconnect_attempts: Some(0),
        ..TransportConfig::default()
    }
}

/// One-connection WebSocket server that sends the given frames, pings,
/// then closes.
async fn spawn_server(frames: Vec<&'static str>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::Ping(Bytes::from_static(b"hb"))).await.unwrap();
        for frame in frames {
            ws.send(Message::Text(frame.into())).await.unwrap();
        }
        // Drain the pong, then close.
        let _ = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
        let _ = ws.close(None).await;
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn text_frames_are_forwarded_untagged_in_order() {
    let url = spawn_server(vec![
        r#"{"event":"add-start","filePath":"a.txt","messageId":"m1"}"#,
        r#"{"event":"add-end","filePath":"a.txt","content":"hi","messageId":"m1"}"#,
    ])
    .await;

    let (mut client, mut frames) = StreamingClient::websocket(&url, one_shot_config()).unwrap();
    client.connect();

    let mut seen = Vec::new();
    while let Some(event) = frames.recv().await {
        match event {
            TransportEvent::Opened => seen.push("opened".to_string()),
            TransportEvent::Frame(frame) => {
                // The WebSocket binding carries the event name inside the
                // payload; the channel tag stays empty.
                assert_eq!(frame.event, None);
                match &frame.payload {
                    RawPayload::Text(text) => seen.push(text.clone()),
                    RawPayload::Json(value) => seen.push(value.to_string()),
                }
            }
            TransportEvent::Error(_) => {}
            TransportEvent::Closed => break,
        }
    }

    assert_eq!(
        seen,
        vec![
            "opened",
            r#"{"event":"add-start","filePath":"a.txt","messageId":"m1"}"#,
            r#"{"event":"add-end","filePath":"a.txt","content":"hi","messageId":"m1"}"#,
        ]
    );
    assert_eq!(*client.status().borrow(), ConnectionStatus::Failed);
}

#[tokio::test]
async fn unreachable_server_reports_connect_error_then_fails() {
    // Bind-then-drop to get a port with no listener behind it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (mut client, mut frames) =
        StreamingClient::websocket(&format!("ws://{addr}"), one_shot_config()).unwrap();
    client.connect();

    let mut saw_error = false;
    while let Some(event) = frames.recv().await {
        match event {
            TransportEvent::Error(_) => saw_error = true,
            TransportEvent::Closed => break,
            _ => {}
        }
    }
    assert!(saw_error);
    assert_eq!(*client.status().borrow(), ConnectionStatus::Failed);
}
