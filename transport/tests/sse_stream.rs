#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use opsync_protocol::RawPayload;
use opsync_transport::ConnectionStatus;
use opsync_transport::StreamingClient;
use opsync_transport::TransportConfig;
use opsync_transport::TransportError;
use opsync_transport::TransportEvent;
use pretty_assertions::assert_eq;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

const SSE_BODY: &str = concat!(
    "event: add-start\n",
    "data: {\"filePath\":\"a.txt\"}\n",
    "\n",
    "event: add-end\n",
    "data: {\"filePath\":\"a.txt\",\"content\":\"hi\"}\n",
    "\n",
);

fn one_shot_config() -> TransportConfig {
    TransportConfig {
        reconnect_delay: Duration::from_millis(20),
        max_reconnect_attempts: Some(0),
        ..TransportConfig::default()
    }
}

async fn mount_events(server: &MockServer, expect: u64) {
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(SSE_BODY.as_bytes().to_vec(), "text/event-stream"),
        )
        .expect(expect)
        .mount(server)
        .await;
}

fn payload_text(payload: &RawPayload) -> String {
    match payload {
        RawPayload::Text(text) => text.clone(),
        RawPayload::Json(value) => value.to_string(),
    }
}

#[tokio::test]
async fn frames_arrive_tagged_and_in_order() {
    let server = MockServer::start().await;
    mount_events(&server, 1).await;

    let (mut client, mut frames) =
        StreamingClient::sse(&format!("{}/events", server.uri()), one_shot_config()).unwrap();
    client.connect();

    let mut seen = Vec::new();
    while let Some(event) = frames.recv().await {
        match event {
            TransportEvent::Opened => seen.push("opened".to_string()),
            TransportEvent::Frame(frame) => {
                seen.push(format!(
                    "{}:{}",
                    frame.event.as_deref().unwrap_or("-"),
                    payload_text(&frame.payload)
                ));
            }
            TransportEvent::Error(TransportError::RetriesExhausted { .. }) => {
                seen.push("exhausted".to_string());
            }
            TransportEvent::Error(err) => seen.push(format!("error:{err}")),
            TransportEvent::Closed => {
                seen.push("closed".to_string());
                break;
            }
        }
    }

    assert_eq!(
        seen,
        vec![
            "opened",
            "add-start:{\"filePath\":\"a.txt\"}",
            "add-end:{\"filePath\":\"a.txt\",\"content\":\"hi\"}",
            "exhausted",
            "closed",
        ]
    );
    assert_eq!(*client.status().borrow(), ConnectionStatus::Failed);
}

#[tokio::test]
async fn connect_is_idempotent_while_active() {
    let server = MockServer::start().await;
    // Verified on drop: a second connect() must not open a second stream.
    mount_events(&server, 1).await;

    let (mut client, mut frames) =
        StreamingClient::sse(&format!("{}/events", server.uri()), one_shot_config()).unwrap();
    client.connect();
    client.connect();

    let mut opened = 0;
    while let Some(event) = frames.recv().await {
        match event {
            TransportEvent::Opened => opened += 1,
            TransportEvent::Closed => break,
            _ => {}
        }
    }
    assert_eq!(opened, 1);
}

#[tokio::test]
async fn manual_close_suppresses_reconnect() {
    let server = MockServer::start().await;
    mount_events(&server, 1).await;

    let config = TransportConfig {
        // Long delay so the close lands while the supervisor is waiting
        // to reconnect.
        reconnect_delay: Duration::from_secs(30),
        max_reconnect_attempts: None,
        ..TransportConfig::default()
    };
    let (mut client, mut frames) =
        StreamingClient::sse(&format!("{}/events", server.uri()), config).unwrap();
    client.connect();

    // Drain the two frames from the first pass.
    let mut frame_count = 0;
    while frame_count < 2 {
        match frames.recv().await {
            Some(TransportEvent::Frame(_)) => frame_count += 1,
            Some(_) => {}
            None => panic!("stream ended early"),
        }
    }

    client.close();
    loop {
        match frames.recv().await {
            Some(TransportEvent::Closed) => break,
            Some(_) => {}
            None => panic!("closed event never arrived"),
        }
    }
    assert_eq!(*client.status().borrow(), ConnectionStatus::Disconnected);
}

#[tokio::test]
async fn http_error_is_reported_and_retried_to_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = TransportConfig {
        reconnect_delay: Duration::from_millis(10),
        max_reconnect_attempts: Some(2),
        ..TransportConfig::default()
    };
    let (mut client, mut frames) =
        StreamingClient::sse(&format!("{}/events", server.uri()), config).unwrap();
    client.connect();

    let mut status_errors = 0;
    let mut exhausted = 0;
    while let Some(event) = frames.recv().await {
        match event {
            TransportEvent::Error(TransportError::Status(code)) => {
                assert_eq!(code.as_u16(), 401);
                status_errors += 1;
            }
            TransportEvent::Error(TransportError::RetriesExhausted { attempts }) => {
                assert_eq!(attempts, 2);
                exhausted += 1;
            }
            TransportEvent::Closed => break,
            _ => {}
        }
    }

    // Initial attempt plus two retries, each reported, then the terminal
    // exhaustion error.
    assert_eq!(status_errors, 3);
    assert_eq!(exhausted, 1);
    assert_eq!(*client.status().borrow(), ConnectionStatus::Failed);
}
