//! Greeter service built with rpc-chain.
//!
//! One handler per call kind, all sharing a pipeline that injects a
//! greeting, request info and a clock, and logs every request.

use futures::StreamExt;
use rpc_chain_core::call::CallKind;
use rpc_chain_core::context::{Context, Field};
use rpc_chain_core::handler::{Pipeline, ResolvedHandler};
use rpc_chain_runtime::middleware::{inject_request_info, with_clock, with_request_logging, CLOCK};
use rpc_chain_runtime::service::{MethodDescriptor, ServiceDescriptor, ServiceHandlers};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Greeting used by [`chat_hello`].
pub const MESSAGE: Field<String> = Field::new("message");

/// Pause before each reply of [`stream_hello`].
pub const STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// Replies written by [`stream_hello`].
pub const STREAM_REPLIES: usize = 3;

/// The greeter service contract.
pub static GREETER: ServiceDescriptor = ServiceDescriptor::new(
    "greeter.Greeter",
    &[
        MethodDescriptor::new("SayHello", CallKind::Unary),
        MethodDescriptor::new("SayHelloReversed", CallKind::Unary),
        MethodDescriptor::new("StreamHello", CallKind::ServerStream),
        MethodDescriptor::new("CollectHellos", CallKind::ClientStream),
        MethodDescriptor::new("ChatHello", CallKind::BidiStream),
    ],
);

/// Who to greet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    /// Name
    pub name: String,
}

impl HelloRequest {
    /// Greet `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A greeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Greeting text
    pub message: String,
}

impl HelloReply {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Base injectors and default middleware shared by every greeter handler.
#[must_use]
pub fn pipeline() -> Pipeline {
    Pipeline::new()
        .inject(|_call| Ok(Context::new().with(MESSAGE, "Hello".to_string())))
        .inject(inject_request_info)
        .with(with_clock())
        .with(with_request_logging())
}

/// `hello, {name}!`
#[must_use]
pub fn say_hello(pipeline: &Pipeline) -> ResolvedHandler<HelloRequest, HelloReply> {
    pipeline
        .handler()
        .request::<HelloRequest>()
        .reply::<HelloReply>()
        .unary(|request, _ctx, _call| async move { Ok(HelloReply::new(format!("hello, {}!", request.name))) })
}

/// [`say_hello`], reversed character by character.
#[must_use]
pub fn say_hello_reversed(pipeline: &Pipeline) -> ResolvedHandler<HelloRequest, HelloReply> {
    pipeline
        .handler()
        .request::<HelloRequest>()
        .reply::<HelloReply>()
        .unary(|request, _ctx, _call| async move {
            let reversed: String = format!("hello, {}!", request.name).chars().rev().collect();
            Ok(HelloReply::new(reversed))
        })
}

/// Three numbered greetings, one per [`STREAM_INTERVAL`].
#[must_use]
pub fn stream_hello(pipeline: &Pipeline) -> ResolvedHandler<HelloRequest, HelloReply> {
    pipeline
        .handler()
        .request::<HelloRequest>()
        .reply::<HelloReply>()
        .server_stream(|request, ctx, call| async move {
            let clock = ctx.require(CLOCK)?;
            for i in 1..=STREAM_REPLIES {
                clock.sleep(STREAM_INTERVAL).await;
                call.write(HelloReply::new(format!("hello {}! ({i})", request.name)))
                    .await?;
            }
            Ok(())
        })
}

/// One greeting for everyone sent: `hello, a & b!`
#[must_use]
pub fn collect_hellos(pipeline: &Pipeline) -> ResolvedHandler<HelloRequest, HelloReply> {
    pipeline
        .handler()
        .request::<HelloRequest>()
        .reply::<HelloReply>()
        .client_stream(|_ctx, call| async move {
            let mut names = Vec::new();
            let mut requests = call.into_requests();
            while let Some(request) = requests.next().await {
                names.push(request?.name);
            }
            Ok(HelloReply::new(format!("hello, {}!", names.join(" & "))))
        })
}

/// Answers every request with `{message}, {name}!`
#[must_use]
pub fn chat_hello(pipeline: &Pipeline) -> ResolvedHandler<HelloRequest, HelloReply> {
    pipeline
        .handler()
        .request::<HelloRequest>()
        .reply::<HelloReply>()
        .bidi_stream(|ctx, mut call| async move {
            let message = ctx.require(MESSAGE)?;
            while let Some(request) = call.next().await {
                call.write(HelloReply::new(format!("{message}, {}!", request?.name)))
                    .await?;
            }
            Ok(())
        })
}

/// All greeter handlers, keyed by method name.
#[must_use]
pub fn service_handlers(pipeline: &Pipeline) -> ServiceHandlers {
    ServiceHandlers::new()
        .method("SayHello", say_hello(pipeline))
        .method("SayHelloReversed", say_hello_reversed(pipeline))
        .method("StreamHello", stream_hello(pipeline))
        .method("CollectHellos", collect_hellos(pipeline))
        .method("ChatHello", chat_hello(pipeline))
}
