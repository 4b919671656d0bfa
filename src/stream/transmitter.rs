//! Request transmitter multiplexing logical requests over persistent streams
//!
//! - Fixed set of duplex streams opened once per client
//! - Each stream target is pinned to one stream, so requests of one
//!   transaction reach the server in submission order
//! - Responses are correlated back to their caller by request ID
//!
//! Every [`PendingResult`] is fulfilled exactly once: with the decoded
//! response, with a classified error, with `ConnectionLost` when its stream
//! breaks, or with `IllegalState` when the transmitter closes.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::classify;
use crate::connection::{Channel, DuplexStream, StreamEvent, TransportStatus};
use crate::types::{ClientError, RequestId, Result};
use crate::wire::{Request, RequestEnvelope, Response, ResponseBody, ResponseEnvelope, StreamTarget};

type ResultSlot = oneshot::Sender<Result<Response>>;

/// One persistent stream and the requests still waiting on it
struct StreamSlot {
    /// `None` while the stream is broken or the transmitter is closed
    sender: RwLock<Option<mpsc::UnboundedSender<RequestEnvelope>>>,
    /// request ID → result slot
    pending: DashMap<RequestId, ResultSlot>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSlot {
    fn new() -> Self {
        Self {
            sender: RwLock::new(None),
            pending: DashMap::new(),
            reader: Mutex::new(None),
        }
    }

    /// Fail every pending request with the given error
    fn drain(&self, error: &ClientError) -> usize {
        let ids: Vec<RequestId> = self.pending.iter().map(|entry| *entry.key()).collect();
        let mut drained = 0;
        for id in ids {
            if let Some((_, slot)) = self.pending.remove(&id) {
                let _ = slot.send(Err(error.clone()));
                drained += 1;
            }
        }
        drained
    }
}

struct Inner {
    channel: Arc<dyn Channel>,
    streams: Vec<StreamSlot>,
    closed: AtomicBool,
}

/// Shared handle to the transmitter of one client
#[derive(Clone)]
pub struct RequestTransmitter {
    inner: Arc<Inner>,
}

impl RequestTransmitter {
    /// Open `parallelisation` streams over the channel
    pub async fn open(parallelisation: usize, channel: Arc<dyn Channel>) -> Result<Self> {
        let count = parallelisation.max(1);
        let transmitter = Self {
            inner: Arc::new(Inner {
                channel,
                streams: (0..count).map(|_| StreamSlot::new()).collect(),
                closed: AtomicBool::new(false),
            }),
        };

        for stream_id in 0..count {
            let stream = transmitter
                .inner
                .channel
                .open_stream()
                .await
                .map_err(|status| classify(&status))?;
            transmitter.attach(stream_id, stream);
        }

        info!(
            address = %transmitter.inner.channel.address(),
            "Request transmitter opened with {} streams", count
        );
        Ok(transmitter)
    }

    fn attach(&self, stream_id: usize, stream: DuplexStream) {
        let DuplexStream { outbound, inbound } = stream;
        let slot = &self.inner.streams[stream_id];
        *slot.sender.write() = Some(outbound);

        let reader = tokio::spawn(read_stream(Arc::downgrade(&self.inner), stream_id, inbound));
        if let Some(previous) = slot.reader.lock().replace(reader) {
            previous.abort();
        }
    }

    /// Stream a target is pinned to
    pub fn stream_for(&self, target: &StreamTarget) -> usize {
        (target.affinity() % self.inner.streams.len() as u64) as usize
    }

    /// Enqueue a request without waiting for its response
    pub fn submit(&self, target: StreamTarget, request: Request) -> PendingResult {
        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        let stream_id = self.stream_for(&target);
        let pending = PendingResult {
            id,
            stream_id,
            rx,
            transmitter: Arc::downgrade(&self.inner),
        };

        if self.is_closed() {
            let _ = tx.send(Err(transmitter_closed()));
            return pending;
        }

        let slot = &self.inner.streams[stream_id];
        // Held across insert + send so a concurrent break or close drains this entry
        let sender = slot.sender.read();
        let Some(sender) = sender.as_ref() else {
            let error = if self.is_closed() {
                transmitter_closed()
            } else {
                ClientError::ConnectionLost(format!("Stream {} is broken", stream_id))
            };
            let _ = tx.send(Err(error));
            return pending;
        };

        debug!(request_id = %id, stream = stream_id, "Submitting {}", request.name());
        slot.pending.insert(id, tx);

        let envelope = RequestEnvelope { id, target, payload: request };
        if sender.send(envelope).is_err() {
            if let Some((_, tx)) = slot.pending.remove(&id) {
                let _ = tx.send(Err(ClientError::ConnectionLost(format!(
                    "Stream {} stopped accepting requests",
                    stream_id
                ))));
            }
        }
        pending
    }

    /// Deliver an inbound response to its caller
    ///
    /// A response for an unknown or already fulfilled ID is dropped.
    pub fn on_message(&self, stream_id: usize, envelope: ResponseEnvelope) {
        let Some(slot) = self.inner.streams.get(stream_id) else {
            warn!(stream = stream_id, "Response on unknown stream dropped");
            return;
        };
        let Some((_, tx)) = slot.pending.remove(&envelope.id) else {
            debug!(request_id = %envelope.id, stream = stream_id, "Dropping response for unknown request");
            return;
        };

        let result = match envelope.body {
            ResponseBody::Ok(response) => Ok(response),
            ResponseBody::Err(status) => Err(classify(&TransportStatus::from(status))),
        };
        let _ = tx.send(result);
    }

    /// Mark a stream unusable and fail everything still waiting on it
    pub fn on_stream_broken(&self, stream_id: usize, cause: ClientError) {
        let Some(slot) = self.inner.streams.get(stream_id) else {
            return;
        };
        slot.sender.write().take();
        let drained = slot.drain(&cause);
        if !self.is_closed() {
            warn!(stream = stream_id, drained, "Stream broken: {}", cause);
        }
    }

    /// Replace a stream with a freshly opened one
    ///
    /// Requests still waiting on a stream that was not broken can no longer be
    /// answered once it is replaced; they fail with `ConnectionLost`.
    pub async fn recreate_stream(&self, stream_id: usize) -> Result {
        if self.is_closed() {
            return Err(transmitter_closed());
        }
        let Some(slot) = self.inner.streams.get(stream_id) else {
            return Err(ClientError::IllegalState(format!("No stream {}", stream_id)));
        };
        let stream = self
            .inner
            .channel
            .open_stream()
            .await
            .map_err(|status| classify(&status))?;

        if let Some(reader) = slot.reader.lock().take() {
            reader.abort();
        }
        if slot.sender.write().take().is_some() {
            let drained = slot.drain(&ClientError::ConnectionLost(format!("Stream {} was replaced", stream_id)));
            debug!(stream = stream_id, drained, "Retired live stream");
        }
        self.attach(stream_id, stream);
        info!(stream = stream_id, "Stream recreated");
        Ok(())
    }

    pub fn is_stream_broken(&self, stream_id: usize) -> bool {
        self.inner
            .streams
            .get(stream_id)
            .map_or(true, |slot| slot.sender.read().is_none())
    }

    pub fn stream_count(&self) -> usize {
        self.inner.streams.len()
    }

    /// Requests submitted but not yet fulfilled, across all streams
    pub fn pending_count(&self) -> usize {
        self.inner.streams.iter().map(|slot| slot.pending.len()).sum()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting requests and fail everything still pending
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let error = transmitter_closed();
        let mut drained = 0;
        for slot in &self.inner.streams {
            slot.sender.write().take();
            drained += slot.drain(&error);
            if let Some(reader) = slot.reader.lock().take() {
                reader.abort();
            }
        }
        info!(drained, "Request transmitter closed");
    }
}

fn transmitter_closed() -> ClientError {
    ClientError::IllegalState("The request transmitter has been closed.".into())
}

/// Feed one stream's inbound half into the transmitter until it ends
async fn read_stream(
    inner: Weak<Inner>,
    stream_id: usize,
    mut inbound: mpsc::UnboundedReceiver<StreamEvent>,
) {
    loop {
        let event = inbound.recv().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let transmitter = RequestTransmitter { inner };
        match event {
            Some(Ok(envelope)) => transmitter.on_message(stream_id, envelope),
            Some(Err(status)) => {
                transmitter.on_stream_broken(stream_id, classify(&status));
                return;
            }
            None => {
                transmitter.on_stream_broken(
                    stream_id,
                    ClientError::ConnectionLost(format!("Stream {} ended", stream_id)),
                );
                return;
            }
        }
    }
}

/// Handle to the single result of a submitted request
pub struct PendingResult {
    id: RequestId,
    stream_id: usize,
    rx: oneshot::Receiver<Result<Response>>,
    transmitter: Weak<Inner>,
}

impl PendingResult {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn stream_id(&self) -> usize {
        self.stream_id
    }

    /// Wait until the request is fulfilled
    pub async fn wait(self) -> Result<Response> {
        self.rx.await.unwrap_or_else(|_| Err(abandoned()))
    }

    /// Wait at most `deadline`; on expiry the request is forgotten and
    /// `ConnectionLost` is returned
    pub async fn wait_timeout(mut self, deadline: Duration) -> Result<Response> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(result) => result.unwrap_or_else(|_| Err(abandoned())),
            Err(_) => {
                if let Some(inner) = self.transmitter.upgrade() {
                    if let Some(slot) = inner.streams.get(self.stream_id) {
                        slot.pending.remove(&self.id);
                    }
                }
                Err(ClientError::ConnectionLost(format!(
                    "No response within {:?}",
                    deadline
                )))
            }
        }
    }

    /// Take the result if it has already arrived
    pub fn try_take(&mut self) -> Option<Result<Response>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(abandoned())),
        }
    }
}

fn abandoned() -> ClientError {
    ClientError::ConnectionLost("Request was abandoned without a response".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorKind;
    use async_trait::async_trait;
    use tonic::Code;

    /// Channel whose streams are driven by the test
    struct ScriptedChannel {
        server_ends: Mutex<Vec<(mpsc::UnboundedReceiver<RequestEnvelope>, mpsc::UnboundedSender<StreamEvent>)>>,
    }

    impl ScriptedChannel {
        fn new() -> Arc<Self> {
            Arc::new(Self { server_ends: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Channel for ScriptedChannel {
        fn address(&self) -> &str {
            "scripted:1729"
        }

        async fn unary(&self, _request: Request) -> std::result::Result<Response, TransportStatus> {
            Ok(Response::Unit)
        }

        async fn open_stream(&self) -> std::result::Result<DuplexStream, TransportStatus> {
            let (stream, outbound_rx, inbound_tx) = DuplexStream::pair();
            self.server_ends.lock().push((outbound_rx, inbound_tx));
            Ok(stream)
        }

        async fn shutdown(&self) {}

        fn is_shutdown(&self) -> bool {
            false
        }
    }

    fn target() -> StreamTarget {
        StreamTarget::Transaction {
            session: crate::types::SessionId::new(vec![7]),
            transaction: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_delivery_fulfils_once() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel.clone()).await.unwrap();

        let mut pending = transmitter.submit(target(), Request::TransactionCommit);
        let id = pending.id();
        for _ in 0..5 {
            transmitter.on_message(0, ResponseEnvelope::ok(id, Response::Unit));
        }

        assert_eq!(pending.try_take(), Some(Ok(Response::Unit)));
        assert_eq!(transmitter.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_error_body_is_classified() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel).await.unwrap();

        let pending = transmitter.submit(target(), Request::TransactionCommit);
        let status = TransportStatus::new(Code::Internal, "[RPL01] not primary");
        transmitter.on_message(0, ResponseEnvelope::err(pending.id(), status.to_wire()));

        assert_eq!(pending.wait().await, Err(ClientError::ReplicaNotPrimary));
    }

    #[tokio::test]
    async fn test_broken_stream_drains_and_rejects() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel).await.unwrap();

        let waiting: Vec<_> = (0..3).map(|_| transmitter.submit(target(), Request::TransactionClose)).collect();
        transmitter.on_stream_broken(0, ClientError::ConnectionLost("reset".into()));

        for pending in waiting {
            assert_eq!(pending.wait().await.unwrap_err().kind(), ErrorKind::ConnectionLost);
        }
        assert!(transmitter.is_stream_broken(0));

        let late = transmitter.submit(target(), Request::TransactionClose);
        assert_eq!(late.wait().await.unwrap_err().kind(), ErrorKind::ConnectionLost);

        transmitter.recreate_stream(0).await.unwrap();
        assert!(!transmitter.is_stream_broken(0));
    }

    #[tokio::test]
    async fn test_replacing_live_stream_fails_its_requests() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel.clone()).await.unwrap();

        let in_flight = transmitter.submit(target(), Request::TransactionCommit);
        transmitter.recreate_stream(0).await.unwrap();

        let result = in_flight.wait_timeout(Duration::from_secs(5)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConnectionLost);
        assert_eq!(transmitter.pending_count(), 0);
        assert!(!transmitter.is_stream_broken(0));

        // The replacement stream carries new requests
        let mut next = transmitter.submit(target(), Request::TransactionCommit);
        let (mut outbound, _inbound) = channel.server_ends.lock().pop().unwrap();
        let envelope = outbound.recv().await.unwrap();
        assert_eq!(envelope.id, next.id());
        transmitter.on_message(0, ResponseEnvelope::ok(envelope.id, Response::Unit));
        assert_eq!(next.try_take(), Some(Ok(Response::Unit)));
    }

    #[tokio::test]
    async fn test_server_hangup_breaks_stream() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel.clone()).await.unwrap();

        let pending = transmitter.submit(target(), Request::TransactionCommit);
        channel.server_ends.lock().clear();

        let result = pending.wait_timeout(Duration::from_secs(5)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConnectionLost);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_fails_pending() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(2, channel).await.unwrap();

        let pending = transmitter.submit(target(), Request::TransactionCommit);
        transmitter.close();
        transmitter.close();

        assert_eq!(pending.wait().await.unwrap_err().kind(), ErrorKind::IllegalState);
        let after = transmitter.submit(target(), Request::TransactionCommit);
        assert_eq!(after.wait().await.unwrap_err().kind(), ErrorKind::IllegalState);
    }

    #[tokio::test]
    async fn test_timeout_forgets_request() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(1, channel).await.unwrap();

        let pending = transmitter.submit(target(), Request::TransactionCommit);
        let result = pending.wait_timeout(Duration::from_millis(20)).await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ConnectionLost);
        assert_eq!(transmitter.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_same_target_uses_same_stream() {
        let channel = ScriptedChannel::new();
        let transmitter = RequestTransmitter::open(4, channel).await.unwrap();
        let target = target();
        let first = transmitter.stream_for(&target);
        for _ in 0..10 {
            assert_eq!(transmitter.stream_for(&target), first);
        }
    }
}
