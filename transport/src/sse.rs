use eventsource_stream::Eventsource;
use futures::StreamExt;
use http::header::ACCEPT;
use opsync_protocol::RawFrame;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::ConnectionStatus;
use crate::TransportError;
use crate::TransportEvent;
use crate::client::ChannelRun;

const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";

/// Runs one SSE connection to completion.
///
/// Credentials ride on the cookie store; the endpoint is a plain GET with
/// no custom request headers.
pub(crate) async fn run(
    http: &reqwest::Client,
    url: &Url,
    status_tx: &watch::Sender<ConnectionStatus>,
    events_tx: &mpsc::Sender<TransportEvent>,
    cancel: &CancellationToken,
) -> ChannelRun {
    let request = http.get(url.clone()).header(ACCEPT, EVENT_STREAM_MIME_TYPE);
    let response = tokio::select! {
        _ = cancel.cancelled() => return ChannelRun::stopped(false),
        response = request.send() => response,
    };

    let response = match response {
        Ok(response) => response,
        Err(err) => return ChannelRun::failed(false, TransportError::Connect(err.to_string())),
    };
    if response.error_for_status_ref().is_err() {
        return ChannelRun::failed(false, TransportError::Status(response.status()));
    }

    let _ = status_tx.send(ConnectionStatus::Connected);
    if events_tx.send(TransportEvent::Opened).await.is_err() {
        return ChannelRun::stopped(true);
    }

    let mut events = response.bytes_stream().eventsource();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return ChannelRun::stopped(true),
            event = events.next() => match event {
                Some(Ok(event)) => {
                    let frame = RawFrame::sse(event.event, event.data);
                    if events_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                        return ChannelRun::stopped(true);
                    }
                }
                Some(Err(err)) => {
                    return ChannelRun::failed(true, TransportError::Stream(err.to_string()));
                }
                None => return ChannelRun::ended(true),
            },
        }
    }
}
