use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use opsync_protocol::RawFrame;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::ConnectionStatus;
use crate::TransportError;
use crate::TransportEvent;
use crate::client::ChannelRun;

/// Runs one WebSocket connection to completion.
///
/// Every inbound text frame is forwarded verbatim; the event name is
/// embedded in the JSON payload on this channel. Pings are answered in
/// place, binary frames are ignored.
pub(crate) async fn run(
    url: &Url,
    connect_timeout: Duration,
    status_tx: &watch::Sender<ConnectionStatus>,
    events_tx: &mpsc::Sender<TransportEvent>,
    cancel: &CancellationToken,
) -> ChannelRun {
    let connect = connect_async(url.as_str());
    let result = tokio::select! {
        _ = cancel.cancelled() => return ChannelRun::stopped(false),
        result = tokio::time::timeout(connect_timeout, connect) => result,
    };

    let (mut ws, _response) = match result {
        Ok(Ok(pair)) => pair,
        Ok(Err(err)) => {
            return ChannelRun::failed(false, TransportError::WebSocket(err.to_string()));
        }
        Err(_) => {
            return ChannelRun::failed(
                false,
                TransportError::Connect(format!(
                    "handshake timed out after {}ms",
                    connect_timeout.as_millis()
                )),
            );
        }
    };

    let _ = status_tx.send(ConnectionStatus::Connected);
    if events_tx.send(TransportEvent::Opened).await.is_err() {
        return ChannelRun::stopped(true);
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws.close(None).await;
                return ChannelRun::stopped(true);
            }
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let frame = RawFrame::text(text.as_str());
                    if events_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                        return ChannelRun::stopped(true);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if ws.send(Message::Pong(payload)).await.is_err() {
                        return ChannelRun::ended(true);
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Binary(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => return ChannelRun::ended(true),
                Some(Err(err)) => {
                    return ChannelRun::failed(true, TransportError::WebSocket(err.to_string()));
                }
            },
        }
    }
}
