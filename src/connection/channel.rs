//! Transport abstraction consumed by the client
//!
//! A [`Channel`] is one logical connection to one server address. It answers
//! unary control requests and opens independent duplex streams that the
//! transmitter multiplexes transaction traffic over.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::TransportStatus;
use crate::classifier::classify;
use crate::types::{ClientError, Result};
use crate::wire::{Request, RequestEnvelope, Response, ResponseEnvelope};

/// Item delivered by a stream's inbound half.
///
/// An `Err` item, or the receiver ending, means the stream broke.
pub type StreamEvent = std::result::Result<ResponseEnvelope, TransportStatus>;

/// One persistent, ordered, bidirectional stream
pub struct DuplexStream {
    /// Envelopes are written to the server in the order they are sent here
    pub outbound: mpsc::UnboundedSender<RequestEnvelope>,
    pub inbound: mpsc::UnboundedReceiver<StreamEvent>,
}

impl DuplexStream {
    /// Create both halves of a stream, returning the server-facing ends
    pub fn pair() -> (
        Self,
        mpsc::UnboundedReceiver<RequestEnvelope>,
        mpsc::UnboundedSender<StreamEvent>,
    ) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        (
            Self { outbound: outbound_tx, inbound: inbound_rx },
            outbound_rx,
            inbound_tx,
        )
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    /// Server address this channel is bound to
    fn address(&self) -> &str;

    /// Send one control request and wait for its response
    async fn unary(&self, request: Request) -> std::result::Result<Response, TransportStatus>;

    /// Open a new duplex stream over this channel
    async fn open_stream(&self) -> std::result::Result<DuplexStream, TransportStatus>;

    /// Stop the channel; open streams end and further calls fail
    async fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// Opens channels to server addresses
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Channel>>;
}

/// Unary call with the failure already classified
pub(crate) async fn call(channel: &dyn Channel, request: Request) -> Result<Response> {
    channel.unary(request).await.map_err(|status| classify(&status))
}

/// Unary call bounded by a deadline; expiry surfaces as `ConnectionLost`
pub(crate) async fn call_within(
    channel: &dyn Channel,
    request: Request,
    deadline: Duration,
) -> Result<Response> {
    let name = request.name();
    match tokio::time::timeout(deadline, call(channel, request)).await {
        Ok(result) => result,
        Err(_) => Err(ClientError::ConnectionLost(format!(
            "No response to {} from {} within {:?}",
            name,
            channel.address(),
            deadline
        ))),
    }
}
