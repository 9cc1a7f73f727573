use std::pin::Pin;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use opsync_protocol::RawFrame;
use tokio::sync::mpsc;

use crate::TransportError;

/// Lifecycle of a streaming channel as observed through the status watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal: the reconnect-attempt cap was exceeded.
    Failed,
}

/// Everything a channel can deliver, in arrival order.
#[derive(Debug)]
pub enum TransportEvent {
    /// The channel (re)opened successfully.
    Opened,
    Frame(RawFrame),
    /// A connection-level error. The supervisor decides whether a
    /// reconnect follows; consumers should treat this as advisory.
    Error(TransportError),
    /// The client is done: manual close, or retries exhausted.
    Closed,
}

/// Ordered stream of [`TransportEvent`]s from one [`StreamingClient`].
///
/// [`StreamingClient`]: crate::StreamingClient
pub struct FrameStream {
    pub(crate) rx_event: mpsc::Receiver<TransportEvent>,
}

impl FrameStream {
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx_event.recv().await
    }
}

impl Stream for FrameStream {
    type Item = TransportEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_event.poll_recv(cx)
    }
}
