//! Integration tests for service registration, startup and routing.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use rpc_chain_core::adapter::{channel_sink, MemorySink, ResponseSink};
use rpc_chain_core::call::{CallHead, CallKind};
use rpc_chain_core::context::{Context, Field};
use rpc_chain_core::handler::Pipeline;
use rpc_chain_core::middleware::{middleware, with_cleanup, Cleanup};
use rpc_chain_core::status::{Code, Status};
use rpc_chain_core::transport::{AnyMessage, IncomingServerStream, IncomingUnary, Reply};
use rpc_chain_runtime::error::{RegistrationError, ServerError};
use rpc_chain_runtime::middleware::{inject_request_info, with_clock, with_request_logging, REQUEST};
use rpc_chain_runtime::{
    CleanupPolicy, MethodDescriptor, Server, ServerConfig, ServiceDescriptor, ServiceHandlers, StartEvent,
};
use rpc_chain_testing::init_tracing;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const SERVICE: Field<&'static str> = Field::new("service");

static ECHO: ServiceDescriptor = ServiceDescriptor::new(
    "test.Echo",
    &[
        MethodDescriptor::new("Echo", CallKind::Unary),
        MethodDescriptor::new("Repeat", CallKind::ServerStream),
    ],
);

fn pipeline() -> Pipeline {
    Pipeline::new()
        .inject(inject_request_info)
        .inject(|_call| Ok(Context::new().with(SERVICE, "echo")))
        .with(with_clock())
        .with(with_request_logging())
}

fn echo_handlers(pipeline: &Pipeline) -> ServiceHandlers {
    let echo = pipeline
        .handler()
        .request::<String>()
        .reply::<String>()
        .unary(|message, ctx, _call| async move {
            let id = &ctx.require(REQUEST)?.id;
            Ok(format!("{message} ({id})"))
        });
    let repeat = pipeline
        .handler()
        .request::<u32>()
        .reply::<u32>()
        .server_stream(|count, _ctx, call| async move {
            for i in 0..count {
                call.write(i).await?;
            }
            Ok(())
        });

    ServiceHandlers::new().method("Echo", echo).method("Repeat", repeat)
}

fn local() -> ServerConfig {
    ServerConfig::default().with_host("127.0.0.1").with_port(0)
}

// ============================================================================
// Registration
// ============================================================================

#[test]
fn test_add_service_registers_routes() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());

    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let router = server.router();
    let mut paths: Vec<_> = router.paths().collect();
    paths.sort_unstable();
    assert_eq!(paths, ["/test.Echo/Echo", "/test.Echo/Repeat"]);
}

#[test]
fn test_duplicate_service_rejected() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let err = server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap_err();

    assert_eq!(err, RegistrationError::DuplicateService("test.Echo".to_string()));
}

#[test]
fn test_incomplete_service_registers_nothing() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    let echo_only = ServiceHandlers::new().method(
        "Echo",
        pipeline
            .handler()
            .request::<String>()
            .reply::<String>()
            .unary(|message, _ctx, _call| async move { Ok(message) }),
    );

    let err = server.add_service(&ECHO, echo_only).unwrap_err();

    assert!(matches!(err, RegistrationError::MissingMethod { ref method, .. } if method == "Repeat"));
    assert_eq!(server.router().paths().count(), 0);
}

#[test]
fn test_wrong_kind_rejected() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    let echo = pipeline
        .handler()
        .request::<String>()
        .reply::<String>()
        .unary(|message, _ctx, _call| async move { Ok(message) });
    let handlers = ServiceHandlers::new().method("Echo", echo.clone()).method("Repeat", echo);

    let err = server.add_service(&ECHO, handlers).unwrap_err();

    assert_eq!(
        err,
        RegistrationError::KindMismatch {
            service: "test.Echo".to_string(),
            method: "Repeat".to_string(),
            declared: CallKind::ServerStream,
            provided: CallKind::Unary,
        }
    );
    assert_eq!(
        err.to_string(),
        "`test.Echo/Repeat` is declared server_stream but its handler is unary"
    );
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_start_hook_receives_port_and_context() {
    init_tracing();
    let seen: Arc<Mutex<Option<StartEvent>>> = Arc::default();
    let slot = Arc::clone(&seen);

    let mut server = Server::new(pipeline(), local()).on_start(move |event| async move {
        *slot.lock().unwrap() = Some(event);
        Ok(())
    });
    let addr = server.listen().await.unwrap();

    let event = seen.lock().unwrap().take().unwrap();
    assert_eq!(event.port(), Some(addr.port()));
    assert_ne!(addr.port(), 0);
    assert_eq!(event.context.get(SERVICE), Some(&"echo"));
    assert!(event.context.get(REQUEST).is_none());
    assert!(server.take_listener().is_some());
    assert!(server.take_listener().is_none());
}

#[tokio::test]
async fn test_start_hook_receives_bind_error() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap();
    let seen: Arc<Mutex<Option<StartEvent>>> = Arc::default();
    let slot = Arc::clone(&seen);

    let mut server = Server::new(pipeline(), local()).on_start(move |event| async move {
        *slot.lock().unwrap() = Some(event);
        Ok(())
    });
    let err = server.listen_on(&addr.to_string()).await.unwrap_err();

    assert!(matches!(err, ServerError::Bind { .. }));
    let event = seen.lock().unwrap().take().unwrap();
    assert!(event.outcome.is_err());
    assert_eq!(event.port(), None);
    assert!(server.take_listener().is_none());
}

#[tokio::test]
async fn test_start_hook_failure_surfaces() {
    let mut server =
        Server::new(pipeline(), local()).on_start(|_event| async { Err(anyhow::anyhow!("migrations failed")) });

    let err = server.listen().await.unwrap_err();

    assert!(matches!(err, ServerError::StartHook(_)));
    assert!(err.to_string().contains("migrations failed"));
}

#[tokio::test]
async fn test_start_context_failure_skips_hook() {
    let pipeline = Pipeline::new().inject(|call| match call {
        Some(_) => Ok(Context::new()),
        None => Err(anyhow::anyhow!("no tenant at startup")),
    });
    let called = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&called);

    let mut server = Server::new(pipeline, local()).on_start(move |_event| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let err = server.listen().await.unwrap_err();

    assert!(matches!(err, ServerError::StartContext(_)));
    assert!(err.to_string().contains("no tenant at startup"));
    assert_eq!(called.load(Ordering::SeqCst), 0);
    assert!(server.take_listener().is_none());
}

#[tokio::test]
async fn test_startup_cleanups_never_run() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closed);
    let pipeline = Pipeline::new().with(middleware(move |_ctx: Context| {
        let counter = Arc::clone(&counter);
        async move {
            let cleanup = Cleanup::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok::<_, anyhow::Error>(with_cleanup(Context::new(), cleanup))
        }
    }));

    let mut server = Server::new(pipeline, local()).on_start(|_event| async { Ok(()) });
    server.listen().await.unwrap();

    assert_eq!(closed.load(Ordering::SeqCst), 0);
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_router_serves_unary() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let head = CallHead::new("/test.Echo/Echo")
        .with_metadata(rpc_chain_core::call::Metadata::new().with("x-request-id", "r-1"));
    let reply: String = server.router().call_unary(head, "hi".to_string()).await.unwrap();

    assert_eq!(reply, "hi (r-1)");
}

#[tokio::test]
async fn test_router_serves_server_stream() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let (sink, rx) = channel_sink::<AnyMessage>(8);
    let request: AnyMessage = Box::new(3_u32);
    server
        .router()
        .handle(
            IncomingServerStream {
                head: CallHead::new("/test.Echo/Repeat"),
                request,
                sink,
            }
            .into(),
        )
        .await;

    let items: Vec<u32> = drain_counts(rx).await;
    assert_eq!(items, vec![0, 1, 2]);
}

async fn drain_counts(
    mut rx: tokio::sync::mpsc::Receiver<Result<AnyMessage, Status>>,
) -> Vec<u32> {
    let mut items = Vec::new();
    while let Some(item) = rx.recv().await {
        items.push(*item.unwrap().downcast::<u32>().unwrap());
    }
    items
}

#[tokio::test]
async fn test_unknown_path_is_unimplemented() {
    let router = Server::new(pipeline(), local()).router();

    let result = router
        .call_unary::<String, String>(CallHead::new("/test.Echo/Nope"), "hi".to_string())
        .await;

    assert_eq!(result.unwrap_err().code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_wrong_message_type_is_invalid_argument() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let result = server
        .router()
        .call_unary::<u64, String>(CallHead::new("/test.Echo/Echo"), 7)
        .await;

    assert_eq!(result.unwrap_err().code(), Code::InvalidArgument);
}

#[tokio::test]
async fn test_wrong_call_kind_is_unimplemented() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();

    let sink = Arc::new(MemorySink::<AnyMessage>::new());
    let request: AnyMessage = Box::new("hi".to_string());
    server
        .router()
        .handle(
            IncomingServerStream {
                head: CallHead::new("/test.Echo/Echo"),
                request,
                sink: Arc::clone(&sink) as Arc<dyn ResponseSink<AnyMessage>>,
            }
            .into(),
        )
        .await;

    let outcome = sink.outcome().unwrap();
    assert_eq!(outcome.unwrap_err().code(), Code::Unimplemented);
}

#[tokio::test]
async fn test_configured_cleanup_policy_applies() {
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closed);
    let pipeline = Pipeline::new().with(middleware(move |_ctx: Context| {
        let counter = Arc::clone(&counter);
        async move {
            let cleanup = Cleanup::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            Ok::<_, anyhow::Error>(with_cleanup(Context::new(), cleanup))
        }
    }));
    let fail = pipeline
        .handler()
        .request::<String>()
        .reply::<String>()
        .unary(|_message, _ctx, _call| async { Err(Status::unavailable("try later").into()) });
    let repeat = pipeline
        .handler()
        .request::<u32>()
        .reply::<u32>()
        .server_stream(|_count, _ctx, _call| async { Ok(()) });

    let config = local().with_cleanup_policy(CleanupPolicy::Always);
    let mut server = Server::new(pipeline, config);
    server
        .add_service(&ECHO, ServiceHandlers::new().method("Echo", fail).method("Repeat", repeat))
        .unwrap();

    let (reply, rx) = Reply::<AnyMessage>::channel();
    let request: AnyMessage = Box::new("hi".to_string());
    server
        .router()
        .handle(
            IncomingUnary {
                head: CallHead::new("/test.Echo/Echo"),
                request,
                reply,
            }
            .into(),
        )
        .await;

    let outcome = rx.await.unwrap();
    assert_eq!(outcome.map(|_| ()), Err(Status::unavailable("try later")));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_calls_are_independent() {
    let pipeline = pipeline();
    let mut server = Server::new(pipeline.clone(), local());
    server.add_service(&ECHO, echo_handlers(&pipeline)).unwrap();
    let router = server.router();

    let calls = (0..16).map(|i| {
        let router = router.clone();
        tokio::spawn(async move {
            let head = CallHead::new("/test.Echo/Echo")
                .with_metadata(rpc_chain_core::call::Metadata::new().with("x-request-id", format!("r{i}")));
            router.call_unary::<String, String>(head, format!("m{i}")).await
        })
    });

    let replies: Vec<String> = futures::future::join_all(calls)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    for (i, reply) in replies.iter().enumerate() {
        assert_eq!(reply, &format!("m{i} (r{i})"));
    }
}
