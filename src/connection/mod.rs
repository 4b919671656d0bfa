//! Transport channels and their supervision
//!
//! - [`Channel`] / [`Connector`]: the transport abstraction the client consumes
//! - [`WsChannel`]: WebSocket implementation with MessagePack framing
//! - [`ConnectionSupervisor`]: per-client channel ownership and health

pub mod channel;
pub mod status;
pub mod supervisor;
pub mod websocket;

pub use channel::{Channel, Connector, DuplexStream, StreamEvent};
pub use status::TransportStatus;
pub use supervisor::{ChannelStatus, ConnectionSupervisor};
pub use websocket::{WsChannel, WsConnector};

pub(crate) use channel::{call, call_within};
