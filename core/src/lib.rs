//! # rpc-chain Core
//!
//! Core types for building RPC handlers out of a middleware chain.
//!
//! A request is served in a fixed order:
//!
//! ```text
//! raw call → base injectors → middleware chain → handler body → cleanups (reversed) → response
//! ```
//!
//! ## Core Concepts
//!
//! - **Context**: immutable, typed field map accumulated along the chain
//! - **Middleware**: step producing context fields and optionally a cleanup
//! - **Pipeline**: base injectors and default middleware shared by a service
//! - **`HandlerBuilder`**: immutable builder; finishing it yields a
//!   **`ResolvedHandler`** of one of four call kinds
//! - **Call adapters**: what a body sees of the call (`UnaryCall`,
//!   `ServerStreamCall`, `ClientStreamCall`, `BidiStreamCall`)
//! - **Status**: the single error shape callers observe
//!
//! Dispatching a resolved handler against a transport lives in
//! `rpc-chain-runtime`; testing handlers in isolation lives in
//! `rpc-chain-testing`.
//!
//! ## Example
//!
//! ```
//! use rpc_chain_core::context::{Context, Field};
//! use rpc_chain_core::handler::Pipeline;
//! use rpc_chain_core::middleware::{middleware, MiddlewareOutput};
//!
//! const GREETING: Field<&'static str> = Field::new("greeting");
//!
//! let pipeline = Pipeline::new().with(middleware(|_ctx: Context| async {
//!     Ok(MiddlewareOutput::Fields(Context::new().with(GREETING, "Hello")))
//! }));
//!
//! let say_hello = pipeline
//!     .handler()
//!     .request::<String>()
//!     .reply::<String>()
//!     .unary(|name, ctx, _call| async move {
//!         Ok(format!("{}, {name}!", ctx.require(GREETING)?))
//!     });
//!
//! assert_eq!(say_hello.middlewares().len(), 1);
//! ```

pub mod adapter;
pub mod call;
pub mod chain;
pub mod clock;
pub mod context;
pub mod handler;
pub mod middleware;
pub mod resolve;
pub mod status;
pub mod transport;

// Re-export commonly used types
pub use adapter::{BidiStreamCall, ClientStreamCall, ResponseWriter, ServerStreamCall, UnaryCall};
pub use call::{CallHead, CallKind, Metadata};
pub use context::{Context, ContextError, Field};
pub use handler::{HandlerBuilder, Pipeline, ResolvedHandler};
pub use middleware::{middleware, with_cleanup, Cleanup, Middleware, MiddlewareOutput};
pub use status::{Code, Status};
pub use transport::{AnyMessage, IncomingCall};
