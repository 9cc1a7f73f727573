use std::time::Duration;

/// Tunables for a [`StreamingClient`](crate::StreamingClient).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Cap on consecutive failed attempts before the client gives up and
    /// reports [`ConnectionStatus::Failed`](crate::ConnectionStatus).
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// TCP/TLS connect timeout for the underlying channel.
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(1_000),
            max_reconnect_attempts: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
