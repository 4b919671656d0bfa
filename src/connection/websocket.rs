//! WebSocket channel to a TypeDB server
//!
//! Each duplex stream is one persistent WebSocket connection served by a
//! writer task and a reader task. Unary control requests (handshake, database
//! management, session open/close) are infrequent, so each one uses a
//! short-lived WebSocket: connect, send one envelope, read until the matching
//! response arrives, close.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request as HttpRequest, protocol::Message, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tonic::Code;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::channel::{Channel, Connector, DuplexStream, StreamEvent};
use super::TransportStatus;
use crate::classifier::RST_STREAM_MARKER;
use crate::types::Result;
use crate::wire::{codec, Request, RequestEnvelope, Response, ResponseBody, ResponseEnvelope, StreamTarget};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Channel to one server address over WebSocket
pub struct WsChannel {
    address: String,
    url: String,
    unary_timeout: Duration,
    shutdown: AtomicBool,
    /// Writer and reader tasks of every stream opened so far
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WsChannel {
    pub fn new(address: &str, unary_timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            url: websocket_url(address),
            unary_timeout,
            shutdown: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn ensure_running(&self) -> std::result::Result<(), TransportStatus> {
        if self.is_shutdown() {
            Err(TransportStatus::unavailable(format!("Channel to {} is shut down", self.address)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Channel for WsChannel {
    fn address(&self) -> &str {
        &self.address
    }

    async fn unary(&self, request: Request) -> std::result::Result<Response, TransportStatus> {
        self.ensure_running()?;

        let name = request.name();
        let (mut sink, mut source) = connect_websocket(&self.url).await?;
        let id = Uuid::new_v4();
        let envelope = RequestEnvelope { id, target: StreamTarget::Connection, payload: request };
        let bytes = codec::encode(&envelope)
            .map_err(|e| TransportStatus::new(Code::Internal, e.to_string()))?;
        sink.send(Message::Binary(bytes)).await?;

        let result = timeout(self.unary_timeout, async {
            while let Some(msg) = source.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match codec::decode::<ResponseEnvelope>(&data) {
                        Ok(response) if response.id == id => {
                            return match response.body {
                                ResponseBody::Ok(response) => Ok(response),
                                ResponseBody::Err(status) => Err(status.into()),
                            };
                        }
                        Ok(response) => {
                            debug!(request_id = %response.id, "Ignoring unary response for another request");
                        }
                        Err(e) => {
                            return Err(TransportStatus::new(
                                Code::Internal,
                                format!("Undecodable unary response: {}", e),
                            ));
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        return Err(TransportStatus::unavailable(format!(
                            "{}: server closed connection ({:?})",
                            RST_STREAM_MARKER, frame
                        )));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(e.into()),
                }
            }
            Err(TransportStatus::unavailable("Connection ended without response"))
        })
        .await;

        let _ = sink.close().await;

        match result {
            Ok(response) => response,
            Err(_) => Err(TransportStatus::unavailable(format!(
                "No response to {} within {:?}",
                name, self.unary_timeout
            ))),
        }
    }

    async fn open_stream(&self) -> std::result::Result<DuplexStream, TransportStatus> {
        self.ensure_running()?;

        let (sink, source) = connect_websocket(&self.url).await?;
        let (stream, outbound_rx, inbound_tx) = DuplexStream::pair();

        let writer = tokio::spawn(write_loop(sink, outbound_rx, inbound_tx.clone()));
        let reader = tokio::spawn(read_loop(source, inbound_tx));

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(writer);
        tasks.push(reader);

        debug!(address = %self.address, "Opened duplex stream");
        Ok(stream)
    }

    async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        info!(address = %self.address, "Channel shut down");
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Connector producing [`WsChannel`]s
pub struct WsConnector {
    unary_timeout: Duration,
}

impl WsConnector {
    pub fn new(unary_timeout: Duration) -> Self {
        Self { unary_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Channel>> {
        Ok(Arc::new(WsChannel::new(address, self.unary_timeout)))
    }
}

fn websocket_url(address: &str) -> String {
    if address.starts_with("ws://") || address.starts_with("wss://") {
        address.to_string()
    } else {
        format!("ws://{}", address)
    }
}

/// Connect with explicit upgrade headers
async fn connect_websocket(url: &str) -> std::result::Result<(WsSink, WsSource), TransportStatus> {
    let request = HttpRequest::builder()
        .uri(url)
        .header("Host", url.split("//").last().unwrap_or("localhost"))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .body(())
        .map_err(|e| TransportStatus::new(Code::InvalidArgument, format!("Failed to build request: {}", e)))?;

    let (ws, _) = connect_async_with_config(request, None, false)
        .await
        .map_err(|e| TransportStatus::unavailable(format!("WebSocket connect to {} failed: {}", url, e)))?;

    Ok(ws.split())
}

/// Forward outbound envelopes to the socket in submission order
///
/// An envelope that cannot be encoded is answered locally with an error so its
/// caller is not left waiting.
async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::UnboundedReceiver<RequestEnvelope>,
    inbound: mpsc::UnboundedSender<StreamEvent>,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(envelope) = outbound.recv().await {
        let bytes = match codec::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(request_id = %envelope.id, error = %e, "Rejecting unencodable request");
                let status = TransportStatus::new(Code::Internal, format!("Failed to encode request: {}", e));
                let _ = inbound.send(Ok(ResponseEnvelope::err(envelope.id, status.to_wire())));
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Binary(bytes)).await {
            error!(error = %e, "Failed to write to stream");
            let _ = inbound.send(Err(TransportStatus::unavailable(format!("Stream write failed: {}", e))));
            break;
        }
    }
    let _ = sink.close().await;
}

/// Decode inbound frames until the socket ends; dropping the sender signals the break
///
/// A frame that does not decode breaks the stream, since its request can no
/// longer be matched to a caller.
async fn read_loop<St>(mut source: St, inbound: mpsc::UnboundedSender<StreamEvent>)
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = source.next().await {
        match msg {
            Ok(Message::Binary(data)) => match codec::decode::<ResponseEnvelope>(&data) {
                Ok(envelope) => {
                    if inbound.send(Ok(envelope)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Undecodable stream frame");
                    let _ = inbound.send(Err(TransportStatus::new(
                        Code::Internal,
                        format!("Undecodable stream frame: {}", e),
                    )));
                    break;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("Server closed stream: {:?}", frame);
                let _ = inbound.send(Err(TransportStatus::unavailable(format!(
                    "{}: server closed stream",
                    RST_STREAM_MARKER
                ))));
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "Stream read failed");
                let _ = inbound.send(Err(e.into()));
                break;
            }
        }
    }
}
