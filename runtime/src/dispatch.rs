//! The dispatcher: one raw call against one resolved handler.
//!
//! For every call:
//!
//! 1. fold the base injectors over an empty context
//! 2. run the handler's middleware over that base context
//! 3. build the call adapter and invoke the body
//! 4. on success, run cleanups last-registered-first, then deliver the
//!    response or end the stream
//! 5. on failure, convert it to a [`Status`] and deliver it through the
//!    call's error channel
//!
//! Whether cleanups also run after a failure is decided by
//! [`CleanupPolicy`]. A call whose cancellation token trips before its body
//! settles is abandoned wherever it is suspended: no further middleware, no
//! body, no cleanups. Cancellation arriving after that point is ignored.

use crate::config::CleanupPolicy;
use crate::metrics::CallMetrics;
use futures::future::BoxFuture;
use rpc_chain_core::adapter::{
    BidiStreamCall, ClientStreamCall, ResponseWriter, ServerStreamCall, UnaryCall,
};
use rpc_chain_core::call::CallHead;
use rpc_chain_core::context::Context;
use rpc_chain_core::handler::{HandlerBody, Pipeline, ResolvedHandler};
use rpc_chain_core::middleware::{inject_base, Cleanup, Injector, SharedMiddleware};
use rpc_chain_core::resolve::{resolve_context, run_cleanups, MergeFailure};
use rpc_chain_core::status::{Code, Status};
use rpc_chain_core::transport::{
    IncomingBidiStream, IncomingCall, IncomingClientStream, IncomingServerStream, IncomingUnary,
};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Runs resolved handlers against raw calls.
///
/// Cheap to clone; holds no per-call state.
#[derive(Clone)]
pub struct Dispatcher {
    injectors: Arc<[Injector]>,
    cleanup_policy: CleanupPolicy,
}

impl Dispatcher {
    /// A dispatcher running `injectors` before every call.
    #[must_use]
    pub fn new(injectors: &[Injector]) -> Self {
        Self {
            injectors: injectors.into(),
            cleanup_policy: CleanupPolicy::default(),
        }
    }

    /// A dispatcher using the pipeline's base injectors.
    #[must_use]
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self::new(pipeline.injectors())
    }

    /// Set the cleanup policy.
    #[must_use]
    pub fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// The cleanup policy in effect.
    #[must_use]
    pub const fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup_policy
    }

    /// Base context for `call`, or for server startup when `call` is `None`.
    ///
    /// # Errors
    ///
    /// Returns the first injector failure.
    pub fn base_context(&self, call: Option<&CallHead>) -> anyhow::Result<Context> {
        inject_base(&self.injectors, call)
    }

    /// Serve one call.
    ///
    /// The outcome, success or failure, is always delivered through the
    /// call's own reply channel or sink; nothing is returned.
    pub async fn dispatch<Req, Res>(&self, handler: &ResolvedHandler<Req, Res>, call: IncomingCall<Req, Res>)
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        let span = tracing::info_span!(
            "rpc_call",
            path = call.head().path(),
            kind = %call.kind(),
        );
        self.dispatch_inner(handler, call).instrument(span).await;
    }

    async fn dispatch_inner<Req, Res>(&self, handler: &ResolvedHandler<Req, Res>, call: IncomingCall<Req, Res>)
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        let kind = call.kind();
        let started = Instant::now();
        let middlewares = handler.middlewares();

        let code = match (handler.body(), call) {
            (HandlerBody::Unary(body), IncomingCall::Unary(call)) => {
                let IncomingUnary { head, request, reply } = call;
                let outcome = self
                    .invoke(&head, middlewares, |ctx| body(request, ctx, UnaryCall::new(head.clone())))
                    .await;
                let code = outcome_code(&outcome);
                reply.send(outcome);
                code
            }
            (HandlerBody::ServerStream(body), IncomingCall::ServerStream(call)) => {
                let IncomingServerStream { head, request, sink } = call;
                let writer = ResponseWriter::new(Arc::clone(&sink));
                let outcome = self
                    .invoke(&head, middlewares, |ctx| {
                        body(request, ctx, ServerStreamCall::new(head.clone(), writer))
                    })
                    .await;
                let code = outcome_code(&outcome);
                sink.finish(outcome).await;
                code
            }
            (HandlerBody::ClientStream(body), IncomingCall::ClientStream(call)) => {
                let IncomingClientStream { head, requests, reply } = call;
                let outcome = self
                    .invoke(&head, middlewares, |ctx| {
                        body(ctx, ClientStreamCall::new(head.clone(), requests))
                    })
                    .await;
                let code = outcome_code(&outcome);
                reply.send(outcome);
                code
            }
            (HandlerBody::BidiStream(body), IncomingCall::BidiStream(call)) => {
                let IncomingBidiStream { head, requests, sink } = call;
                let writer = ResponseWriter::new(Arc::clone(&sink));
                let outcome = self
                    .invoke(&head, middlewares, |ctx| {
                        body(ctx, BidiStreamCall::new(head.clone(), requests, writer))
                    })
                    .await;
                let code = outcome_code(&outcome);
                sink.finish(outcome).await;
                code
            }
            (body, call) => {
                let status = Status::unimplemented(format!(
                    "{} is a {} method, called as {}",
                    call.head().path(),
                    body.kind(),
                    call.kind()
                ));
                tracing::warn!(served = %body.kind(), "Call kind does not match handler");
                CallMetrics::record_rejected(status.code());
                call.fail(status).await;
                return;
            }
        };

        let elapsed = started.elapsed();
        CallMetrics::record_call(kind, code, elapsed);
        tracing::debug!(code = %code, elapsed = ?elapsed, "Call finished");
    }

    /// Run the call to completion or until it is cancelled.
    ///
    /// Cancellation is observed up to the end of the body. Once the body
    /// has settled, the due cleanups all run and the outcome is kept.
    async fn invoke<T, F>(&self, head: &CallHead, middlewares: &[SharedMiddleware], body: F) -> Result<T, Status>
    where
        F: FnOnce(Context) -> BoxFuture<'static, anyhow::Result<T>>,
    {
        let cancellation = head.cancellation();

        let settled = tokio::select! {
            biased;
            () = cancellation.cancelled() => None,
            settled = self.run(head, middlewares, body) => Some(settled),
        };
        let Some((outcome, cleanups)) = settled else {
            tracing::debug!("Call cancelled");
            return Err(Status::cancelled("call cancelled"));
        };

        run_cleanups(cleanups).await;
        outcome
    }

    /// Injection, middleware and body. Returns the outcome with the
    /// cleanups the policy says are due.
    async fn run<T, F>(
        &self,
        head: &CallHead,
        middlewares: &[SharedMiddleware],
        body: F,
    ) -> (Result<T, Status>, Vec<Cleanup>)
    where
        F: FnOnce(Context) -> BoxFuture<'static, anyhow::Result<T>>,
    {
        let base = match self.base_context(Some(head)) {
            Ok(base) => base,
            Err(error) => return (Err(failure("injection", error)), Vec::new()),
        };

        let resolved = match resolve_context(base, middlewares).await {
            Ok(resolved) => resolved,
            Err(MergeFailure { error, cleanups, .. }) => {
                return (Err(failure("middleware", error)), self.due_on_failure(cleanups));
            }
        };

        match body(resolved.context).await {
            Ok(value) => (Ok(value), resolved.cleanups),
            Err(error) => (Err(failure("handler", error)), self.due_on_failure(resolved.cleanups)),
        }
    }

    fn due_on_failure(&self, cleanups: Vec<Cleanup>) -> Vec<Cleanup> {
        if self.cleanup_policy.runs_on_failure() {
            cleanups
        } else {
            Vec::new()
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("injectors", &self.injectors.len())
            .field("cleanup_policy", &self.cleanup_policy)
            .finish()
    }
}

fn failure(stage: &'static str, error: anyhow::Error) -> Status {
    let status = Status::from_error(error);
    if status.is_server_error() {
        tracing::error!(stage, code = %status.code(), error = status.message(), "Call failed");
    } else {
        tracing::debug!(stage, code = %status.code(), error = status.message(), "Call rejected");
    }
    status
}

fn outcome_code<T>(outcome: &Result<T, Status>) -> Code {
    outcome.as_ref().map_or_else(Status::code, |_| Code::Ok)
}
