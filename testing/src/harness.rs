//! Run handlers and middleware without a transport.
//!
//! [`HandlerTest`] drives a resolved handler through the same
//! [`Dispatcher`] a server uses. The raw call is replaced by a request
//! value or a finite input stream, and written responses are collected in
//! a [`MemorySink`].

#![allow(clippy::module_name_repetitions)] // HandlerTest is the natural name

use futures::stream::{self, StreamExt};
use rpc_chain_core::adapter::{MemorySink, ResponseSink};
use rpc_chain_core::call::{CallHead, CallKind, Metadata};
use rpc_chain_core::context::Context;
use rpc_chain_core::handler::{Pipeline, ResolvedHandler};
use rpc_chain_core::middleware::{Cleanup, Injector, Middleware};
use rpc_chain_core::status::Status;
use rpc_chain_core::transport::{
    IncomingBidiStream, IncomingCall, IncomingClientStream, IncomingServerStream, IncomingUnary, Reply,
};
use rpc_chain_runtime::config::CleanupPolicy;
use rpc_chain_runtime::dispatch::Dispatcher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Path used when the test does not set one.
pub const TEST_PATH: &str = "/test.Service/Method";

/// Fluent runner for one handler invocation
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use rpc_chain_core::handler::HandlerBuilder;
/// use rpc_chain_testing::HandlerTest;
///
/// # tokio_test::block_on(async {
/// let sum = HandlerBuilder::new()
///     .request::<u32>()
///     .reply::<u32>()
///     .client_stream(|_ctx, call| async move {
///         let mut total = 0;
///         let mut requests = call.into_requests();
///         while let Some(n) = requests.next().await {
///             total += n?;
///         }
///         Ok(total)
///     });
///
/// let outcome = HandlerTest::new(&sum).with_stream_input([1, 2, 3]).run().await.unwrap();
/// assert_eq!(outcome.into_reply(), Some(6));
/// # });
/// ```
pub struct HandlerTest<Req, Res> {
    handler: ResolvedHandler<Req, Res>,
    injectors: Vec<Injector>,
    request: Option<Req>,
    inputs: Vec<Result<Req, Status>>,
    path: String,
    metadata: Metadata,
    cancellation: CancellationToken,
    cleanup_policy: CleanupPolicy,
}

impl<Req, Res> HandlerTest<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Test `handler`.
    #[must_use]
    pub fn new(handler: &ResolvedHandler<Req, Res>) -> Self {
        Self {
            handler: handler.clone(),
            injectors: Vec::new(),
            request: None,
            inputs: Vec::new(),
            path: TEST_PATH.to_string(),
            metadata: Metadata::new(),
            cancellation: CancellationToken::new(),
            cleanup_policy: CleanupPolicy::default(),
        }
    }

    /// Start from `base` instead of an empty context.
    ///
    /// Applied after any injectors added so far.
    #[must_use]
    pub fn with_base_context(mut self, base: Context) -> Self {
        self.injectors.push(Arc::new(move |_: Option<&CallHead>| -> anyhow::Result<Context> {
            Ok(base.clone())
        }));
        self
    }

    /// Run the pipeline's base injectors, as a server would.
    #[must_use]
    pub fn with_pipeline(mut self, pipeline: &Pipeline) -> Self {
        self.injectors.extend(pipeline.injectors().iter().cloned());
        self
    }

    /// The request, for unary and server-streaming handlers.
    #[must_use]
    pub fn with_request(mut self, request: Req) -> Self {
        self.request = Some(request);
        self
    }

    /// Requests fed to client-streaming and bidi handlers, in order.
    #[must_use]
    pub fn with_stream_input(mut self, inputs: impl IntoIterator<Item = Req>) -> Self {
        self.inputs.extend(inputs.into_iter().map(Ok));
        self
    }

    /// Make the input stream fail with `status` after the items so far.
    #[must_use]
    pub fn with_stream_error(mut self, status: Status) -> Self {
        self.inputs.push(Err(status));
        self
    }

    /// Call path seen by injectors and the adapter.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Add one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.append(key, value);
        self
    }

    /// Cancel through `token`.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Cleanup policy of the dispatcher.
    #[must_use]
    pub const fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// Dispatch the call and collect its outcome.
    ///
    /// # Errors
    ///
    /// Returns the status the call ended with. A unary or server-streaming
    /// handler run without [`with_request`](Self::with_request) fails with
    /// `INVALID_ARGUMENT`.
    pub async fn run(self) -> Result<TestOutcome<Res>, Status> {
        let head = CallHead::new(self.path)
            .with_metadata(self.metadata)
            .with_cancellation(self.cancellation);
        let dispatcher = Dispatcher::new(&self.injectors).with_cleanup_policy(self.cleanup_policy);
        let requests = stream::iter(self.inputs).boxed();

        match self.handler.kind() {
            CallKind::Unary => {
                let request = self.request.ok_or_else(missing_request)?;
                let (reply, rx) = Reply::channel();
                dispatcher
                    .dispatch(&self.handler, IncomingUnary { head, request, reply }.into())
                    .await;
                Ok(TestOutcome::replied(await_reply(rx).await?))
            }
            CallKind::ClientStream => {
                let (reply, rx) = Reply::channel();
                dispatcher
                    .dispatch(&self.handler, IncomingClientStream { head, requests, reply }.into())
                    .await;
                Ok(TestOutcome::replied(await_reply(rx).await?))
            }
            CallKind::ServerStream => {
                let request = self.request.ok_or_else(missing_request)?;
                let sink = Arc::new(MemorySink::<Res>::new());
                let call: IncomingCall<Req, Res> = IncomingServerStream {
                    head,
                    request,
                    sink: Arc::clone(&sink) as Arc<dyn ResponseSink<Res>>,
                }
                .into();
                dispatcher.dispatch(&self.handler, call).await;
                collect_stream(&sink)
            }
            CallKind::BidiStream => {
                let sink = Arc::new(MemorySink::<Res>::new());
                let call: IncomingCall<Req, Res> = IncomingBidiStream {
                    head,
                    requests,
                    sink: Arc::clone(&sink) as Arc<dyn ResponseSink<Res>>,
                }
                .into();
                dispatcher.dispatch(&self.handler, call).await;
                collect_stream(&sink)
            }
        }
    }
}

fn missing_request() -> Status {
    Status::invalid_argument("no request given, use `with_request`")
}

async fn await_reply<Res>(rx: tokio::sync::oneshot::Receiver<Result<Res, Status>>) -> Result<Res, Status> {
    rx.await
        .map_err(|_| Status::internal("call ended without a reply"))?
}

fn collect_stream<Res>(sink: &MemorySink<Res>) -> Result<TestOutcome<Res>, Status> {
    match sink.outcome() {
        Some(Ok(())) => Ok(TestOutcome::streamed(sink.take())),
        Some(Err(status)) => Err(status),
        None => Err(Status::internal("stream was never finished")),
    }
}

/// What a successful call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome<Res> {
    reply: Option<Res>,
    output: Vec<Res>,
}

impl<Res> TestOutcome<Res> {
    const fn replied(reply: Res) -> Self {
        Self {
            reply: Some(reply),
            output: Vec::new(),
        }
    }

    const fn streamed(output: Vec<Res>) -> Self {
        Self { reply: None, output }
    }

    /// The returned response, for unary and client-streaming handlers.
    #[must_use]
    pub const fn reply(&self) -> Option<&Res> {
        self.reply.as_ref()
    }

    /// Responses written, in write order.
    #[must_use]
    pub fn output(&self) -> &[Res] {
        &self.output
    }

    /// Take the returned response.
    #[must_use]
    pub fn into_reply(self) -> Option<Res> {
        self.reply
    }

    /// Take the written responses.
    #[must_use]
    pub fn into_output(self) -> Vec<Res> {
        self.output
    }
}

/// Result of [`test_middleware`].
#[derive(Debug)]
pub struct MiddlewareProbe {
    /// Base context with the step's fields merged in
    pub context: Context,
    /// Fields the step returned
    pub fields: Context,
    /// Cleanup the step registered, if any
    pub cleanup: Option<Cleanup>,
}

impl MiddlewareProbe {
    /// Run the registered cleanup, if any. Returns whether one ran.
    ///
    /// # Errors
    ///
    /// Returns the cleanup's error.
    pub async fn run_cleanup(&mut self) -> anyhow::Result<bool> {
        match self.cleanup.take() {
            Some(cleanup) => cleanup.run().await.map(|()| true),
            None => Ok(false),
        }
    }
}

/// Run one middleware step over `base`.
///
/// # Errors
///
/// Returns the step's error.
pub async fn test_middleware<M>(middleware: &M, base: Context) -> anyhow::Result<MiddlewareProbe>
where
    M: Middleware + ?Sized,
{
    let (fields, cleanup) = middleware.call(base.clone()).await?.into_parts();
    Ok(MiddlewareProbe {
        context: base.merge(&fields),
        fields,
        cleanup,
    })
}
