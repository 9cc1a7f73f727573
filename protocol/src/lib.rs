//! Wire-level types for the operation event stream.
//!
//! Defines the contract shared by every frontend and the streaming
//! backends: the closed set of event names, the operation taxonomy, and
//! the payload shapes carried over SSE and WebSocket channels. This
//! crate is deliberately dependency-light; everything stateful lives in
//! `opsync-core`.

mod event;
mod wire;

pub use event::EventName;
pub use event::OperationKind;
pub use event::OperationPhase;
pub use wire::CommandOperationData;
pub use wire::EventPayload;
pub use wire::FileOperationData;
pub use wire::OperationData;
pub use wire::OperationEvent;
pub use wire::RawFrame;
pub use wire::RawPayload;
pub use wire::WireError;
