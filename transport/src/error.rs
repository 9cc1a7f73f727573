use thiserror::Error;

/// Connection-level failures. These are surfaced as
/// [`TransportEvent::Error`](crate::TransportEvent) and drive the
/// reconnect supervisor; they are never conflated with parser errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("server returned status {0}")]
    Status(http::StatusCode),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("gave up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },
}
