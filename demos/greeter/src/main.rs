//! Greeter example binary
//!
//! Binds the configured address, reports startup through the start hook,
//! then exercises every greeter method in-process through the router and
//! prints the recorded call counters.

use greeter::{pipeline, service_handlers, HelloReply, HelloRequest, GREETER};
use rpc_chain_core::adapter::channel_sink;
use rpc_chain_core::call::{CallHead, Metadata};
use rpc_chain_core::status::Status;
use rpc_chain_core::transport::{AnyMessage, IncomingBidiStream, IncomingServerStream};
use rpc_chain_runtime::metrics::MetricsServer;
use rpc_chain_runtime::{Server, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "greeter=info,rpc_chain_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = MetricsServer::new(([0, 0, 0, 0], 9090).into());
    metrics.start()?;

    let config = ServerConfig::from_env()?;
    let pipeline = pipeline();

    let mut server = Server::new(pipeline.clone(), config).on_start(|event| async move {
        match &event.outcome {
            Ok(addr) => tracing::info!(%addr, "Server listening"),
            Err(error) => {
                tracing::error!(%error, "Failed to start server");
                anyhow::bail!("failed to start server: {error}");
            }
        }
        Ok(())
    });
    server.add_service(&GREETER, service_handlers(&pipeline))?;
    server.listen().await?;

    let router = server.router();
    let path = |method: &str| GREETER.path(method);

    println!("=== Greeter Example: rpc-chain ===\n");

    let head = CallHead::new(path("SayHello")).with_metadata(Metadata::new().with("x-request-id", "demo-1"));
    let reply: HelloReply = router.call_unary(head, HelloRequest::new("alice")).await?;
    println!("SayHello         -> {}", serde_json::to_string(&reply)?);

    let reply: HelloReply = router
        .call_unary(CallHead::new(path("SayHelloReversed")), HelloRequest::new("alice"))
        .await?;
    println!("SayHelloReversed -> {}", reply.message);

    let (sink, mut replies) = channel_sink::<AnyMessage>(4);
    let request: AnyMessage = Box::new(HelloRequest::new("bob"));
    let stream = tokio::spawn({
        let router = router.clone();
        async move {
            router
                .handle(
                    IncomingServerStream {
                        head: CallHead::new(path("StreamHello")),
                        request,
                        sink,
                    }
                    .into(),
                )
                .await;
        }
    });
    while let Some(reply) = replies.recv().await {
        println!("StreamHello      -> {}", into_reply(reply)?.message);
    }
    stream.await?;

    let (sink, mut replies) = channel_sink::<AnyMessage>(4);
    let names = ["carol", "dave"].map(|name| Ok::<_, Status>(Box::new(HelloRequest::new(name)) as AnyMessage));
    router
        .handle(
            IncomingBidiStream {
                head: CallHead::new(path("ChatHello")),
                requests: Box::pin(futures::stream::iter(names)),
                sink,
            }
            .into(),
        )
        .await;
    while let Some(reply) = replies.recv().await {
        println!("ChatHello        -> {}", into_reply(reply)?.message);
    }

    println!("\n=== Call metrics ===\n");
    for line in metrics.render().unwrap_or_default().lines() {
        if line.starts_with("rpc_calls_total") {
            println!("{line}");
        }
    }

    println!("\n=== Done ===");
    Ok(())
}

fn into_reply(item: Result<AnyMessage, Status>) -> anyhow::Result<HelloReply> {
    let message = item?;
    message
        .downcast::<HelloReply>()
        .map(|reply| *reply)
        .map_err(|_| anyhow::anyhow!("unexpected reply type"))
}
