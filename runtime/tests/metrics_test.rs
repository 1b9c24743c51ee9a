//! Call metrics rendered through the Prometheus recorder.
//!
//! The recorder is process-global, so this file holds a single test.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use rpc_chain_core::call::CallHead;
use rpc_chain_core::handler::{HandlerBuilder, Pipeline};
use rpc_chain_core::status::Status;
use rpc_chain_core::transport::{IncomingUnary, Reply};
use rpc_chain_runtime::metrics::MetricsServer;
use rpc_chain_runtime::{Dispatcher, Router, Server, ServerConfig};

#[tokio::test]
async fn test_dispatched_and_rejected_calls_are_rendered() {
    let mut metrics = MetricsServer::new("127.0.0.1:0".parse().unwrap());
    metrics.start().unwrap();

    let handler = HandlerBuilder::new()
        .request::<u32>()
        .reply::<u32>()
        .unary(|n, _ctx, _call| async move { Ok(n + 1) });
    let (reply, rx) = Reply::channel();
    Dispatcher::new(&[])
        .dispatch(
            &handler,
            IncomingUnary {
                head: CallHead::new("/num.Num/Next"),
                request: 1,
                reply,
            }
            .into(),
        )
        .await;
    assert_eq!(rx.await.unwrap(), Ok(2));

    let router: Router = Server::new(Pipeline::new(), ServerConfig::default()).router();
    let missing: Result<u32, Status> = router.call_unary(CallHead::new("/num.Num/Gone"), 1_u32).await;
    assert!(missing.is_err());

    let rendered = metrics.render().unwrap();
    assert!(rendered.contains("rpc_calls_total{"), "{rendered}");
    assert!(rendered.contains("kind=\"unary\""), "{rendered}");
    assert!(rendered.contains("rpc_call_duration_seconds"), "{rendered}");
    assert!(rendered.contains("rpc_calls_rejected_total{"), "{rendered}");
}
