//! Stock injectors and middleware.
//!
//! - [`inject_request_info`]: request id and path from the raw call
//! - [`with_clock`]: makes a [`Clock`](rpc_chain_core::clock::Clock) available as [`CLOCK`]
//! - [`with_request_logging`]: logs every completed request with its duration
//!
//! Typical wiring:
//!
//! ```
//! use rpc_chain_core::handler::Pipeline;
//! use rpc_chain_runtime::middleware::{inject_request_info, with_clock, with_request_logging};
//!
//! let pipeline = Pipeline::new()
//!     .inject(inject_request_info)
//!     .with(with_clock())
//!     .with(with_request_logging());
//! # let _ = pipeline;
//! ```

use rpc_chain_core::call::CallHead;
use rpc_chain_core::clock::{SharedClock, SystemClock};
use rpc_chain_core::context::{Context, Field};
use rpc_chain_core::middleware::{middleware, with_cleanup, Cleanup, Middleware, MiddlewareOutput};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata key carrying a caller-chosen request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logged in place of the path when no request info is present.
pub const UNKNOWN_REQUEST: &str = "unknown request";

/// Identity of the call being served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// `x-request-id` metadata, or a generated UUID
    pub id: String,
    /// Full method path
    pub path: String,
}

/// Request info; absent when there is no call.
pub const REQUEST: Field<RequestInfo> = Field::new("request");

/// Clock used by handlers and [`with_request_logging`].
pub const CLOCK: Field<SharedClock> = Field::new("clock");

/// Base injector adding [`REQUEST`].
///
/// # Errors
///
/// Never fails; the signature matches [`Pipeline::inject`](rpc_chain_core::handler::Pipeline::inject).
pub fn inject_request_info(call: Option<&CallHead>) -> anyhow::Result<Context> {
    let Some(head) = call else {
        return Ok(Context::new());
    };

    let id = head
        .metadata()
        .get(REQUEST_ID_HEADER)
        .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

    Ok(Context::new().with(
        REQUEST,
        RequestInfo {
            id,
            path: head.path().to_string(),
        },
    ))
}

/// Provide [`CLOCK`], keeping one that is already set.
#[must_use]
pub fn with_clock() -> impl Middleware {
    middleware(|ctx: Context| async move {
        let fields = if ctx.get(CLOCK).is_some() {
            Context::new()
        } else {
            let clock: SharedClock = Arc::new(SystemClock);
            Context::new().with(CLOCK, clock)
        };
        Ok::<_, anyhow::Error>(MiddlewareOutput::from(fields))
    })
    .named("with_clock")
}

/// Log each request once its handler has finished.
///
/// Requires [`CLOCK`], so [`with_clock`] must run first.
#[must_use]
pub fn with_request_logging() -> impl Middleware {
    middleware(|ctx: Context| async move {
        let clock = Arc::clone(ctx.require(CLOCK)?);
        let started = clock.now();
        let (request, request_id) = ctx.get(REQUEST).map_or_else(
            || (UNKNOWN_REQUEST.to_string(), None),
            |info| (info.path.clone(), Some(info.id.clone())),
        );

        Ok::<_, anyhow::Error>(with_cleanup(
            Context::new(),
            Cleanup::from_fn(move || {
                let duration_ms = (clock.now() - started).num_milliseconds();
                tracing::info!(request = %request, request_id = ?request_id, duration_ms, "Request completed");
            }),
        ))
    })
    .named("with_request_logging")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use futures::future::BoxFuture;
    use rpc_chain_core::call::Metadata;
    use rpc_chain_core::clock::Clock;
    use std::time::Duration;

    struct StoppedClock(DateTime<Utc>);

    impl Clock for StoppedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }

        fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
            Box::pin(std::future::ready(()))
        }
    }

    #[test]
    fn test_request_id_from_metadata() {
        let head = CallHead::new("/greeter.Greeter/SayHello")
            .with_metadata(Metadata::new().with("X-Request-Id", "req-42"));

        let ctx = inject_request_info(Some(&head)).unwrap();
        let info = ctx.get(REQUEST).unwrap();

        assert_eq!(info.id, "req-42");
        assert_eq!(info.path, "/greeter.Greeter/SayHello");
    }

    #[test]
    fn test_request_id_generated() {
        let ctx = inject_request_info(Some(&CallHead::new("/svc/M"))).unwrap();
        let info = ctx.get(REQUEST).unwrap();

        assert!(Uuid::parse_str(&info.id).is_ok());
    }

    #[test]
    fn test_no_request_info_without_call() {
        let ctx = inject_request_info(None).unwrap();
        assert!(ctx.get(REQUEST).is_none());
    }

    #[tokio::test]
    async fn test_with_clock_provides_system_clock() {
        let output = with_clock().call(Context::new()).await.unwrap();
        let (fields, cleanup) = output.into_parts();

        assert!(fields.get(CLOCK).is_some());
        assert!(cleanup.is_none());
    }

    #[tokio::test]
    async fn test_with_clock_keeps_existing_clock() {
        let stopped: SharedClock = Arc::new(StoppedClock(Utc.timestamp_opt(0, 0).unwrap()));
        let ctx = Context::new().with(CLOCK, stopped);

        let output = with_clock().call(ctx).await.unwrap();
        let (fields, _) = output.into_parts();

        assert!(fields.is_empty());
    }

    #[tokio::test]
    async fn test_request_logging_requires_clock() {
        let err = with_request_logging().call(Context::new()).await.unwrap_err();
        assert!(err.to_string().contains("clock"));
    }

    #[tokio::test]
    async fn test_request_logging_registers_cleanup() {
        let stopped: SharedClock = Arc::new(StoppedClock(Utc.timestamp_opt(0, 0).unwrap()));
        let ctx = Context::new().with(CLOCK, stopped);

        let output = with_request_logging().call(ctx).await.unwrap();
        let MiddlewareOutput::WithCleanup(fields, cleanup) = output else {
            unreachable!("request logging always registers a cleanup");
        };

        assert!(fields.is_empty());
        cleanup.run().await.unwrap();
    }

    #[test]
    fn test_names() {
        assert_eq!(with_clock().name(), "with_clock");
        assert_eq!(with_request_logging().name(), "with_request_logging");
    }
}
