//! Raw calls as handed over by a transport.
//!
//! An [`IncomingCall`] is everything the dispatcher needs from the wire
//! layer for one invocation: the [`CallHead`], the request (or request
//! stream), and the channel the outcome goes back through. Single-response
//! kinds answer through a [`Reply`] callback, stream-producing kinds through
//! a [`ResponseSink`].
//!
//! Transports that route by path hand calls over with erased messages
//! ([`AnyMessage`]); [`IncomingCall::downcast`] recovers the typed call a
//! [`ResolvedHandler`](crate::handler::ResolvedHandler) expects.

use crate::adapter::{RequestStream, ResponseSink};
use crate::call::{CallHead, CallKind};
use crate::status::Status;
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// A message whose concrete type is only known to the handler.
pub type AnyMessage = Box<dyn Any + Send>;

type ReplyFn<Res> = Box<dyn FnOnce(Result<Res, Status>) + Send>;

/// One-shot callback delivering the outcome of a single-response call.
pub struct Reply<Res> {
    callback: ReplyFn<Res>,
}

impl<Res> Reply<Res>
where
    Res: Send + 'static,
{
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(Result<Res, Status>) + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// A reply that forwards to a oneshot channel.
    #[must_use]
    pub fn channel() -> (Self, oneshot::Receiver<Result<Res, Status>>) {
        let (tx, rx) = oneshot::channel();
        let reply = Self::new(move |outcome| {
            // A dropped receiver means nobody is waiting for the answer.
            let _ = tx.send(outcome);
        });
        (reply, rx)
    }

    /// Deliver the outcome.
    pub fn send(self, outcome: Result<Res, Status>) {
        (self.callback)(outcome);
    }

    /// A reply accepting `T`, converted to `Res` before delivery.
    #[must_use]
    pub fn contramap<T, F>(self, convert: F) -> Reply<T>
    where
        T: Send + 'static,
        F: FnOnce(T) -> Res + Send + 'static,
    {
        Reply::new(move |outcome: Result<T, Status>| self.send(outcome.map(convert)))
    }
}

impl<Res> fmt::Debug for Reply<Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Reply(<fn>)")
    }
}

/// Raw unary call.
#[derive(Debug)]
pub struct IncomingUnary<Req, Res> {
    /// Call head.
    pub head: CallHead,
    /// The request message.
    pub request: Req,
    /// Where the response goes.
    pub reply: Reply<Res>,
}

/// Raw server-streaming call.
pub struct IncomingServerStream<Req, Res> {
    /// Call head.
    pub head: CallHead,
    /// The request message.
    pub request: Req,
    /// Where responses are written.
    pub sink: Arc<dyn ResponseSink<Res>>,
}

/// Raw client-streaming call.
pub struct IncomingClientStream<Req, Res> {
    /// Call head.
    pub head: CallHead,
    /// Incoming request messages.
    pub requests: RequestStream<Req>,
    /// Where the response goes.
    pub reply: Reply<Res>,
}

/// Raw bidirectional-streaming call.
pub struct IncomingBidiStream<Req, Res> {
    /// Call head.
    pub head: CallHead,
    /// Incoming request messages.
    pub requests: RequestStream<Req>,
    /// Where responses are written.
    pub sink: Arc<dyn ResponseSink<Res>>,
}

/// A raw call of any kind.
pub enum IncomingCall<Req, Res> {
    /// See [`IncomingUnary`].
    Unary(IncomingUnary<Req, Res>),
    /// See [`IncomingServerStream`].
    ServerStream(IncomingServerStream<Req, Res>),
    /// See [`IncomingClientStream`].
    ClientStream(IncomingClientStream<Req, Res>),
    /// See [`IncomingBidiStream`].
    BidiStream(IncomingBidiStream<Req, Res>),
}

impl<Req, Res> IncomingCall<Req, Res>
where
    Res: Send + 'static,
{
    /// The shape of this call.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::Unary(_) => CallKind::Unary,
            Self::ServerStream(_) => CallKind::ServerStream,
            Self::ClientStream(_) => CallKind::ClientStream,
            Self::BidiStream(_) => CallKind::BidiStream,
        }
    }

    /// Path, metadata and cancellation of the call.
    #[must_use]
    pub const fn head(&self) -> &CallHead {
        match self {
            Self::Unary(call) => &call.head,
            Self::ServerStream(call) => &call.head,
            Self::ClientStream(call) => &call.head,
            Self::BidiStream(call) => &call.head,
        }
    }

    /// Terminate the call with `status` through its kind's error channel.
    pub async fn fail(self, status: Status) {
        match self {
            Self::Unary(call) => call.reply.send(Err(status)),
            Self::ClientStream(call) => call.reply.send(Err(status)),
            Self::ServerStream(call) => call.sink.finish(Err(status)).await,
            Self::BidiStream(call) => call.sink.finish(Err(status)).await,
        }
    }
}

impl IncomingCall<AnyMessage, AnyMessage> {
    /// Recover typed messages from an erased call.
    ///
    /// Responses are boxed on their way out. Streamed requests are checked
    /// one by one as they arrive and a mismatch surfaces as an
    /// `INVALID_ARGUMENT` item.
    ///
    /// # Errors
    ///
    /// For kinds with a single request, returns the untouched call together
    /// with an `INVALID_ARGUMENT` status when the request is not a `Req`.
    pub fn downcast<Req, Res>(self) -> Result<IncomingCall<Req, Res>, (Status, Self)>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        match self {
            Self::Unary(call) => match call.request.downcast::<Req>() {
                Ok(request) => Ok(IncomingCall::Unary(IncomingUnary {
                    head: call.head,
                    request: *request,
                    reply: call.reply.contramap(box_message::<Res>),
                })),
                Err(request) => Err((
                    mismatch::<Req>(),
                    Self::Unary(IncomingUnary { request, ..call }),
                )),
            },
            Self::ServerStream(call) => match call.request.downcast::<Req>() {
                Ok(request) => Ok(IncomingCall::ServerStream(IncomingServerStream {
                    head: call.head,
                    request: *request,
                    sink: Arc::new(BoxingSink { inner: call.sink }),
                })),
                Err(request) => Err((
                    mismatch::<Req>(),
                    Self::ServerStream(IncomingServerStream { request, ..call }),
                )),
            },
            Self::ClientStream(call) => Ok(IncomingCall::ClientStream(IncomingClientStream {
                head: call.head,
                requests: downcast_stream(call.requests),
                reply: call.reply.contramap(box_message::<Res>),
            })),
            Self::BidiStream(call) => Ok(IncomingCall::BidiStream(IncomingBidiStream {
                head: call.head,
                requests: downcast_stream(call.requests),
                sink: Arc::new(BoxingSink { inner: call.sink }),
            })),
        }
    }
}

impl<Req, Res> fmt::Debug for IncomingCall<Req, Res>
where
    Res: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingCall")
            .field("kind", &self.kind())
            .field("head", self.head())
            .finish_non_exhaustive()
    }
}

impl<Req, Res> From<IncomingUnary<Req, Res>> for IncomingCall<Req, Res> {
    fn from(call: IncomingUnary<Req, Res>) -> Self {
        Self::Unary(call)
    }
}

impl<Req, Res> From<IncomingServerStream<Req, Res>> for IncomingCall<Req, Res> {
    fn from(call: IncomingServerStream<Req, Res>) -> Self {
        Self::ServerStream(call)
    }
}

impl<Req, Res> From<IncomingClientStream<Req, Res>> for IncomingCall<Req, Res> {
    fn from(call: IncomingClientStream<Req, Res>) -> Self {
        Self::ClientStream(call)
    }
}

impl<Req, Res> From<IncomingBidiStream<Req, Res>> for IncomingCall<Req, Res> {
    fn from(call: IncomingBidiStream<Req, Res>) -> Self {
        Self::BidiStream(call)
    }
}

fn box_message<Res>(message: Res) -> AnyMessage
where
    Res: Send + 'static,
{
    Box::new(message)
}

fn mismatch<Req>() -> Status {
    Status::invalid_argument(format!("expected a `{}` message", type_name::<Req>()))
}

fn downcast_stream<Req>(requests: RequestStream<AnyMessage>) -> RequestStream<Req>
where
    Req: Send + 'static,
{
    requests
        .map(|item| {
            item.and_then(|message| {
                message
                    .downcast::<Req>()
                    .map(|request| *request)
                    .map_err(|_| mismatch::<Req>())
            })
        })
        .boxed()
}

/// Typed view over an erased response sink.
struct BoxingSink {
    inner: Arc<dyn ResponseSink<AnyMessage>>,
}

impl<Res> ResponseSink<Res> for BoxingSink
where
    Res: Send + 'static,
{
    fn send(&self, item: Res) -> BoxFuture<'_, Result<(), Status>> {
        self.inner.send(Box::new(item))
    }

    fn finish(&self, outcome: Result<(), Status>) -> BoxFuture<'_, ()> {
        self.inner.finish(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Test code can unwrap and panic
mod tests {
    use super::*;
    use crate::adapter::MemorySink;
    use crate::status::Code;
    use futures::stream;

    #[tokio::test]
    async fn test_reply_channel() {
        let (reply, rx) = Reply::<u32>::channel();
        reply.send(Ok(7));
        assert_eq!(rx.await.unwrap(), Ok(7));
    }

    #[tokio::test]
    async fn test_downcast_unary_boxes_reply() {
        let (reply, rx) = Reply::<AnyMessage>::channel();
        let call: IncomingCall<AnyMessage, AnyMessage> = IncomingUnary {
            head: CallHead::new("/svc/Echo"),
            request: Box::new("ping".to_string()) as AnyMessage,
            reply,
        }
        .into();

        let Ok(IncomingCall::Unary(typed)) = call.downcast::<String, usize>() else {
            panic!("expected a typed unary call");
        };
        assert_eq!(typed.request, "ping");
        typed.reply.send(Ok(4));

        let answer = rx.await.unwrap().unwrap();
        assert_eq!(*answer.downcast::<usize>().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_downcast_wrong_request_type() {
        let (reply, rx) = Reply::<AnyMessage>::channel();
        let call: IncomingCall<AnyMessage, AnyMessage> = IncomingUnary {
            head: CallHead::new("/svc/Echo"),
            request: Box::new(42_u8) as AnyMessage,
            reply,
        }
        .into();

        let Err((status, call)) = call.downcast::<String, String>() else {
            panic!("expected a type mismatch");
        };
        assert_eq!(status.code(), Code::InvalidArgument);

        call.fail(status).await;
        assert_eq!(rx.await.unwrap().unwrap_err().code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_downcast_stream_items() {
        let sink = Arc::new(MemorySink::<AnyMessage>::new());
        let requests = stream::iter(vec![
            Ok(Box::new(1_i32) as AnyMessage),
            Ok(Box::new("two") as AnyMessage),
        ])
        .boxed();
        let call = IncomingCall::BidiStream(IncomingBidiStream {
            head: CallHead::default(),
            requests,
            sink: sink.clone(),
        });

        let Ok(IncomingCall::BidiStream(typed)) = call.downcast::<i32, i32>() else {
            panic!("expected a typed bidi call");
        };
        let items: Vec<_> = typed.requests.collect().await;

        assert_eq!(items[0], Ok(1));
        assert_eq!(items[1].as_ref().unwrap_err().code(), Code::InvalidArgument);

        typed.sink.send(9).await.unwrap();
        let written = sink.take();
        assert_eq!(*written[0].downcast_ref::<i32>().unwrap(), 9);
    }
}
