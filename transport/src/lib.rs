//! Streaming transports for the operation event channel.
//!
//! Wraps the two channel shapes the backend exposes, a unidirectional
//! SSE endpoint and a bidirectional WebSocket, behind one
//! [`StreamingClient`] that delivers [`RawFrame`]s in arrival order and
//! supervises reconnection. No event interpretation happens here; frames
//! go to the parser in `opsync-core` untouched.
//!
//! [`RawFrame`]: opsync_protocol::RawFrame

mod client;
mod config;
mod error;
mod events;
mod sse;
mod websocket;

pub use client::StreamingClient;
pub use config::TransportConfig;
pub use error::TransportError;
pub use events::ConnectionStatus;
pub use events::FrameStream;
pub use events::TransportEvent;
