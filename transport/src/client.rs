use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;
use url::Url;

use crate::ConnectionStatus;
use crate::FrameStream;
use crate::TransportConfig;
use crate::TransportError;
use crate::TransportEvent;
use crate::sse;
use crate::websocket;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outcome of one channel run, fed back to the reconnect supervisor.
pub(crate) struct ChannelRun {
    /// Whether the channel reached the open state; resets the attempt
    /// counter when true.
    pub(crate) opened: bool,
    pub(crate) error: Option<TransportError>,
    /// True when the run ended because of cancellation or a dropped
    /// consumer; the supervisor must not reconnect.
    pub(crate) stop: bool,
}

impl ChannelRun {
    pub(crate) fn stopped(opened: bool) -> Self {
        Self {
            opened,
            error: None,
            stop: true,
        }
    }

    /// The server ended the stream; eligible for reconnection.
    pub(crate) fn ended(opened: bool) -> Self {
        Self {
            opened,
            error: None,
            stop: false,
        }
    }

    pub(crate) fn failed(opened: bool, error: TransportError) -> Self {
        Self {
            opened,
            error: Some(error),
            stop: false,
        }
    }
}

#[derive(Debug, Clone)]
enum ChannelKind {
    Sse { url: Url },
    WebSocket { url: Url },
}

/// Client for one streaming channel, SSE or WebSocket.
///
/// Frames arrive through the [`FrameStream`] handed out at construction;
/// connection state is observable through [`StreamingClient::status`].
/// Unrequested disconnects trigger automatic reconnection with a fixed
/// delay until [`StreamingClient::close`] is called or the configured
/// attempt cap is exceeded.
pub struct StreamingClient {
    kind: ChannelKind,
    config: TransportConfig,
    http: reqwest::Client,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: mpsc::Sender<TransportEvent>,
    manual_close: Arc<AtomicBool>,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl StreamingClient {
    /// Client for the unidirectional SSE binding.
    pub fn sse(url: &str, config: TransportConfig) -> Result<(Self, FrameStream), TransportError> {
        let url = parse_url(url)?;
        Self::new(ChannelKind::Sse { url }, config)
    }

    /// Client for the bidirectional WebSocket binding.
    pub fn websocket(
        url: &str,
        config: TransportConfig,
    ) -> Result<(Self, FrameStream), TransportError> {
        let url = parse_url(url)?;
        Self::new(ChannelKind::WebSocket { url }, config)
    }

    fn new(
        kind: ChannelKind,
        config: TransportConfig,
    ) -> Result<(Self, FrameStream), TransportError> {
        // Cookie jar only: the SSE binding supports no custom auth headers.
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let (events_tx, rx_event) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);

        let client = Self {
            kind,
            config,
            http,
            status_tx,
            events_tx,
            manual_close: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            supervisor: None,
        };
        Ok((client, FrameStream { rx_event }))
    }

    /// Observe connection state changes.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Starts the channel. Idempotent: a client that is already
    /// connecting or connected logs and returns.
    pub fn connect(&mut self) {
        if let Some(supervisor) = &self.supervisor
            && !supervisor.is_finished()
        {
            debug!("connect() ignored: channel already active");
            return;
        }

        self.manual_close.store(false, Ordering::SeqCst);
        self.cancel = CancellationToken::new();

        let kind = self.kind.clone();
        let config = self.config.clone();
        let http = self.http.clone();
        let status_tx = self.status_tx.clone();
        let events_tx = self.events_tx.clone();
        let manual_close = Arc::clone(&self.manual_close);
        let cancel = self.cancel.clone();

        self.supervisor = Some(tokio::spawn(run_supervisor(
            kind,
            config,
            http,
            status_tx,
            events_tx,
            manual_close,
            cancel,
        )));
    }

    /// Tears down the channel and suppresses auto-reconnect. The
    /// supervisor emits [`TransportEvent::Closed`] on its way out.
    pub fn close(&mut self) {
        self.manual_close.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
    }
}

impl Drop for StreamingClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(supervisor) = &self.supervisor {
            supervisor.abort();
        }
    }
}

fn parse_url(url: &str) -> Result<Url, TransportError> {
    Url::parse(url).map_err(|source| TransportError::InvalidUrl {
        url: url.to_string(),
        source,
    })
}

async fn run_supervisor(
    kind: ChannelKind,
    config: TransportConfig,
    http: reqwest::Client,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: mpsc::Sender<TransportEvent>,
    manual_close: Arc<AtomicBool>,
    cancel: CancellationToken,
) {
    let mut attempts: u32 = 0;
    let mut failed = false;

    loop {
        if manual_close.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }

        let _ = status_tx.send(ConnectionStatus::Connecting);
        let run = match &kind {
            ChannelKind::Sse { url } => {
                sse::run(&http, url, &status_tx, &events_tx, &cancel).await
            }
            ChannelKind::WebSocket { url } => {
                websocket::run(
                    url,
                    config.connect_timeout,
                    &status_tx,
                    &events_tx,
                    &cancel,
                )
                .await
            }
        };

        if run.opened {
            attempts = 0;
        }
        if let Some(err) = run.error {
            warn!("transport error: {err}");
            if events_tx.send(TransportEvent::Error(err)).await.is_err() {
                break;
            }
        }
        if run.stop || manual_close.load(Ordering::SeqCst) || cancel.is_cancelled() {
            break;
        }

        attempts = attempts.saturating_add(1);
        if let Some(max) = config.max_reconnect_attempts
            && attempts > max
        {
            let _ = status_tx.send(ConnectionStatus::Failed);
            let _ = events_tx
                .send(TransportEvent::Error(TransportError::RetriesExhausted {
                    attempts: attempts - 1,
                }))
                .await;
            failed = true;
            break;
        }

        let _ = status_tx.send(ConnectionStatus::Reconnecting);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    if !failed {
        let _ = status_tx.send(ConnectionStatus::Disconnected);
    }
    let _ = events_tx.send(TransportEvent::Closed).await;
}
