//! Call adapters: the view of a call a handler body gets to see.
//!
//! Each call kind gets its own adapter exposing only what that shape
//! supports:
//!
//! | kind            | adapter               | body can                       |
//! |-----------------|-----------------------|--------------------------------|
//! | unary           | [`UnaryCall`]         | read metadata, return one      |
//! | server stream   | [`ServerStreamCall`]  | write many                     |
//! | client stream   | [`ClientStreamCall`]  | consume many, return one       |
//! | bidi stream     | [`BidiStreamCall`]    | consume many and write many    |
//!
//! Responses are written through a [`ResponseSink`], supplied by the
//! transport (see [`ChannelSink`]) or by the test harness ([`MemorySink`]).

use crate::call::{CallHead, Metadata};
use crate::status::{Code, Status};
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use tokio::sync::mpsc;

/// Destination for the responses of a stream-producing call.
pub trait ResponseSink<Res>: Send + Sync {
    /// Deliver one response.
    ///
    /// Fails once the stream has been finished or the peer is gone.
    fn send(&self, item: Res) -> BoxFuture<'_, Result<(), Status>>;

    /// End the stream: `Ok(())` is a clean end-of-stream, `Err` destroys
    /// the stream with a status.
    fn finish(&self, outcome: Result<(), Status>) -> BoxFuture<'_, ()>;
}

/// Sink backed by a bounded `tokio::sync::mpsc` channel.
///
/// Backpressure comes from the channel capacity. Finishing drops the sender,
/// so the receiver observes the end of the stream.
pub struct ChannelSink<Res> {
    tx: Mutex<Option<mpsc::Sender<Result<Res, Status>>>>,
}

impl<Res> ChannelSink<Res> {
    fn sender(&self) -> Option<mpsc::Sender<Result<Res, Status>>> {
        self.tx.lock().ok().and_then(|tx| tx.as_ref().cloned())
    }
}

/// Create a channel-backed sink and the receiver a transport drains.
///
/// A `capacity` of zero is treated as one.
#[must_use]
pub fn channel_sink<Res>(
    capacity: usize,
) -> (Arc<ChannelSink<Res>>, mpsc::Receiver<Result<Res, Status>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Arc::new(ChannelSink {
            tx: Mutex::new(Some(tx)),
        }),
        rx,
    )
}

impl<Res> ResponseSink<Res> for ChannelSink<Res>
where
    Res: Send + 'static,
{
    fn send(&self, item: Res) -> BoxFuture<'_, Result<(), Status>> {
        let tx = self.sender();
        Box::pin(async move {
            let tx = tx.ok_or_else(|| Status::new(Code::FailedPrecondition, "stream already finished"))?;
            tx.send(Ok(item))
                .await
                .map_err(|_| Status::cancelled("response stream closed by peer"))
        })
    }

    fn finish(&self, outcome: Result<(), Status>) -> BoxFuture<'_, ()> {
        let tx = self.tx.lock().ok().and_then(|mut tx| tx.take());
        Box::pin(async move {
            if let (Some(tx), Err(status)) = (tx, outcome) {
                // The peer may already be gone; nothing left to tell it.
                let _ = tx.send(Err(status)).await;
            }
        })
    }
}

impl<Res> fmt::Debug for ChannelSink<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("open", &self.sender().is_some())
            .finish()
    }
}

/// In-memory sink collecting every written response.
#[derive(Debug)]
pub struct MemorySink<Res> {
    items: Mutex<Vec<Res>>,
    outcome: Mutex<Option<Result<(), Status>>>,
}

impl<Res> Default for MemorySink<Res> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            outcome: Mutex::new(None),
        }
    }
}

impl<Res> MemorySink<Res> {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the collected responses, in write order.
    #[must_use]
    pub fn take(&self) -> Vec<Res> {
        self.items
            .lock()
            .map(|mut items| std::mem::take(&mut *items))
            .unwrap_or_default()
    }

    /// How the stream was finished, if it was.
    #[must_use]
    pub fn outcome(&self) -> Option<Result<(), Status>> {
        self.outcome.lock().ok().and_then(|outcome| outcome.clone())
    }

    /// Whether `finish` has been called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }
}

impl<Res> MemorySink<Res>
where
    Res: Clone,
{
    /// Copy of the collected responses, in write order.
    #[must_use]
    pub fn items(&self) -> Vec<Res> {
        self.items
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }
}

impl<Res> ResponseSink<Res> for MemorySink<Res>
where
    Res: Send + 'static,
{
    fn send(&self, item: Res) -> BoxFuture<'_, Result<(), Status>> {
        let result = if self.is_finished() {
            Err(Status::new(Code::FailedPrecondition, "stream already finished"))
        } else {
            self.items
                .lock()
                .map(|mut items| items.push(item))
                .map_err(|_| Status::internal("response buffer poisoned"))
        };
        Box::pin(async move { result })
    }

    fn finish(&self, outcome: Result<(), Status>) -> BoxFuture<'_, ()> {
        if let Ok(mut slot) = self.outcome.lock() {
            slot.get_or_insert(outcome);
        }
        Box::pin(async {})
    }
}

/// Cloneable write handle over a call's response sink.
pub struct ResponseWriter<Res> {
    sink: Arc<dyn ResponseSink<Res>>,
}

impl<Res> ResponseWriter<Res> {
    /// Wrap a sink.
    #[must_use]
    pub fn new(sink: Arc<dyn ResponseSink<Res>>) -> Self {
        Self { sink }
    }

    /// Write one response.
    ///
    /// # Errors
    ///
    /// Returns the sink's status when the stream is finished or the peer
    /// went away.
    pub async fn write(&self, item: Res) -> Result<(), Status> {
        self.sink.send(item).await
    }
}

impl<Res> Clone for ResponseWriter<Res> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<Res> fmt::Debug for ResponseWriter<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseWriter")
    }
}

/// Incoming request messages of a stream-consuming call.
pub type RequestStream<Req> = BoxStream<'static, Result<Req, Status>>;

/// Adapter for single-request, single-response calls.
#[derive(Debug, Clone)]
pub struct UnaryCall {
    head: CallHead,
}

impl UnaryCall {
    /// Create the adapter.
    #[must_use]
    pub const fn new(head: CallHead) -> Self {
        Self { head }
    }

    /// Path, metadata and cancellation of the call.
    #[must_use]
    pub const fn head(&self) -> &CallHead {
        &self.head
    }

    /// Call metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        self.head.metadata()
    }
}

/// Adapter for single-request, streamed-response calls.
#[derive(Debug)]
pub struct ServerStreamCall<Res> {
    head: CallHead,
    writer: ResponseWriter<Res>,
}

impl<Res> ServerStreamCall<Res> {
    /// Create the adapter.
    #[must_use]
    pub const fn new(head: CallHead, writer: ResponseWriter<Res>) -> Self {
        Self { head, writer }
    }

    /// Path, metadata and cancellation of the call.
    #[must_use]
    pub const fn head(&self) -> &CallHead {
        &self.head
    }

    /// Call metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        self.head.metadata()
    }

    /// Write one response.
    ///
    /// # Errors
    ///
    /// Returns a status when the stream can no longer be written.
    pub async fn write(&self, item: Res) -> Result<(), Status> {
        self.writer.write(item).await
    }

    /// A handle for writing from spawned tasks.
    #[must_use]
    pub fn writer(&self) -> ResponseWriter<Res> {
        self.writer.clone()
    }
}

/// Adapter for streamed-request, single-response calls.
///
/// The adapter is itself a [`Stream`] of incoming messages.
pub struct ClientStreamCall<Req> {
    head: CallHead,
    requests: RequestStream<Req>,
}

impl<Req> ClientStreamCall<Req> {
    /// Create the adapter.
    #[must_use]
    pub fn new(head: CallHead, requests: RequestStream<Req>) -> Self {
        Self { head, requests }
    }

    /// Path, metadata and cancellation of the call.
    #[must_use]
    pub const fn head(&self) -> &CallHead {
        &self.head
    }

    /// Call metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        self.head.metadata()
    }

    /// Give up the adapter for the underlying request stream.
    #[must_use]
    pub fn into_requests(self) -> RequestStream<Req> {
        self.requests
    }
}

impl<Req> Stream for ClientStreamCall<Req> {
    type Item = Result<Req, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().requests.poll_next_unpin(cx)
    }
}

impl<Req> fmt::Debug for ClientStreamCall<Req> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStreamCall")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

/// Adapter for calls streaming in both directions.
///
/// Reading and writing are independent: use [`split`](Self::split) to read
/// and write from different tasks.
pub struct BidiStreamCall<Req, Res> {
    head: CallHead,
    requests: RequestStream<Req>,
    writer: ResponseWriter<Res>,
}

impl<Req, Res> BidiStreamCall<Req, Res> {
    /// Create the adapter.
    #[must_use]
    pub fn new(head: CallHead, requests: RequestStream<Req>, writer: ResponseWriter<Res>) -> Self {
        Self {
            head,
            requests,
            writer,
        }
    }

    /// Path, metadata and cancellation of the call.
    #[must_use]
    pub const fn head(&self) -> &CallHead {
        &self.head
    }

    /// Call metadata.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        self.head.metadata()
    }

    /// Write one response.
    ///
    /// # Errors
    ///
    /// Returns a status when the stream can no longer be written.
    pub fn write(&self, item: Res) -> impl Future<Output = Result<(), Status>> {
        // Hold the writer handle rather than `&self` so the future stays
        // `Send` even though the request stream is not `Sync`.
        let writer = self.writer.clone();
        async move { writer.write(item).await }
    }

    /// A handle for writing from spawned tasks.
    #[must_use]
    pub fn writer(&self) -> ResponseWriter<Res> {
        self.writer.clone()
    }

    /// Separate the incoming stream from the write handle.
    #[must_use]
    pub fn split(self) -> (RequestStream<Req>, ResponseWriter<Res>) {
        (self.requests, self.writer)
    }
}

impl<Req, Res> Stream for BidiStreamCall<Req, Res> {
    type Item = Result<Req, Status>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().requests.poll_next_unpin(cx)
    }
}

impl<Req, Res> fmt::Debug for BidiStreamCall<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BidiStreamCall")
            .field("head", &self.head)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::stream;

    #[tokio::test]
    async fn test_memory_sink_collects_in_order() {
        let sink = Arc::new(MemorySink::<&str>::new());
        let call = ServerStreamCall::new(CallHead::default(), ResponseWriter::new(sink.clone()));

        call.write("a").await.unwrap();
        call.writer().write("b").await.unwrap();
        sink.finish(Ok(())).await;

        assert_eq!(sink.items(), vec!["a", "b"]);
        assert_eq!(sink.outcome(), Some(Ok(())));
        assert_eq!(
            call.write("c").await.unwrap_err().code(),
            Code::FailedPrecondition
        );
    }

    #[tokio::test]
    async fn test_channel_sink_end_of_stream() {
        let (sink, mut rx) = channel_sink::<u32>(4);

        sink.send(1).await.unwrap();
        sink.finish(Ok(())).await;

        assert_eq!(rx.recv().await, Some(Ok(1)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_channel_sink_destroy_with_status() {
        let (sink, mut rx) = channel_sink::<u32>(4);

        sink.finish(Err(Status::internal("boom"))).await;

        assert_eq!(rx.recv().await, Some(Err(Status::internal("boom"))));
        assert_eq!(rx.recv().await, None);
        assert!(sink.send(2).await.is_err());
    }

    #[tokio::test]
    async fn test_channel_sink_peer_gone() {
        let (sink, rx) = channel_sink::<u32>(1);
        drop(rx);

        assert_eq!(sink.send(1).await.unwrap_err().code(), Code::Cancelled);
    }

    #[tokio::test]
    async fn test_channel_sink_zero_capacity_holds_one() {
        let (sink, mut rx) = channel_sink::<u32>(0);

        sink.send(7).await.unwrap();
        sink.finish(Ok(())).await;

        assert_eq!(rx.recv().await, Some(Ok(7)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_client_stream_yields_requests() {
        let requests = stream::iter(vec![Ok(1), Ok(2), Ok(3)]).boxed();
        let call = ClientStreamCall::new(CallHead::default(), requests);

        let seen: Vec<i32> = call.map(Result::unwrap).collect().await;
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bidi_split() {
        let sink = Arc::new(MemorySink::<String>::new());
        let requests = stream::iter(vec![Ok("x"), Ok("y")]).boxed();
        let call = BidiStreamCall::new(CallHead::default(), requests, ResponseWriter::new(sink.clone()));

        let (mut incoming, writer) = call.split();
        while let Some(item) = incoming.next().await {
            writer.write(item.unwrap().to_uppercase()).await.unwrap();
        }

        assert_eq!(sink.take(), vec!["X".to_string(), "Y".to_string()]);
        assert!(sink.take().is_empty());
    }
}
