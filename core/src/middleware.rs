//! The middleware contract.
//!
//! A middleware step receives the context built so far and returns the
//! fields it wants to add. A step that opens something which must be closed
//! after the handler finishes returns its fields together with a
//! [`Cleanup`]:
//!
//! ```
//! use rpc_chain_core::context::{Context, Field};
//! use rpc_chain_core::middleware::{middleware, with_cleanup, Cleanup, MiddlewareOutput};
//!
//! const CONNECTION: Field<String> = Field::new("connection");
//!
//! let open_connection = middleware(|_ctx: Context| async move {
//!     let fields = Context::new().with(CONNECTION, "conn-1".to_string());
//!     Ok(with_cleanup(fields, Cleanup::from_fn(|| println!("closing conn-1"))))
//! });
//! # let _ = open_connection;
//! ```

use crate::call::CallHead;
use crate::context::Context;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Callback registered by a middleware step, run after a successful body.
///
/// `run` consumes the cleanup, so it fires at most once.
pub struct Cleanup {
    run: CleanupFn,
}

impl Cleanup {
    /// Wrap an async cleanup.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            run: Box::new(move || -> BoxFuture<'static, anyhow::Result<()>> { Box::pin(f()) }),
        }
    }

    /// Wrap a synchronous, infallible cleanup.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move || {
            f();
            std::future::ready(Ok(()))
        })
    }

    /// Run the cleanup to completion.
    ///
    /// # Errors
    ///
    /// Returns whatever error the callback produced.
    pub async fn run(self) -> anyhow::Result<()> {
        (self.run)().await
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup(<fn>)")
    }
}

/// What a middleware step produced.
#[derive(Debug)]
pub enum MiddlewareOutput {
    /// Fields to merge into the context.
    Fields(Context),
    /// Fields to merge plus a cleanup to run after the body.
    WithCleanup(Context, Cleanup),
}

impl MiddlewareOutput {
    /// Split into the fields and the optional cleanup.
    #[must_use]
    pub fn into_parts(self) -> (Context, Option<Cleanup>) {
        match self {
            Self::Fields(fields) => (fields, None),
            Self::WithCleanup(fields, cleanup) => (fields, Some(cleanup)),
        }
    }
}

impl From<Context> for MiddlewareOutput {
    fn from(fields: Context) -> Self {
        Self::Fields(fields)
    }
}

/// Pair context fields with a cleanup.
#[must_use]
pub const fn with_cleanup(fields: Context, cleanup: Cleanup) -> MiddlewareOutput {
    MiddlewareOutput::WithCleanup(fields, cleanup)
}

/// A step in a handler's middleware chain.
///
/// Implementations must not assume anything about concurrency: the same
/// instance is called by every invocation of every handler it is part of.
pub trait Middleware: Send + Sync + 'static {
    /// Produce fields (and optionally a cleanup) from the current context.
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<MiddlewareOutput>>;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Shared, type-erased middleware.
pub type SharedMiddleware = Arc<dyn Middleware>;

impl<M> Middleware for Arc<M>
where
    M: Middleware + ?Sized,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<MiddlewareOutput>> {
        (**self).call(ctx)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Middleware backed by an async closure. Created by [`middleware`].
#[derive(Clone)]
pub struct FnMiddleware<F> {
    f: F,
    name: &'static str,
}

impl<F> FnMiddleware<F> {
    /// Give the middleware a readable name for logs.
    #[must_use]
    pub const fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware").field("name", &self.name).finish()
    }
}

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MiddlewareOutput>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> BoxFuture<'static, anyhow::Result<MiddlewareOutput>> {
        Box::pin((self.f)(ctx))
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Lift an async closure into a [`Middleware`].
pub fn middleware<F, Fut>(f: F) -> FnMiddleware<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<MiddlewareOutput>> + Send + 'static,
{
    FnMiddleware {
        f,
        name: "middleware",
    }
}

/// Extracts base context fields from the raw call.
///
/// Injectors run before the middleware chain on every invocation, and once
/// with `None` when the server builds its startup context.
pub type Injector = Arc<dyn Fn(Option<&CallHead>) -> anyhow::Result<Context> + Send + Sync>;

/// Fold injectors over an empty context, later injectors winning.
///
/// # Errors
///
/// Stops at and returns the first injector failure.
pub fn inject_base(injectors: &[Injector], call: Option<&CallHead>) -> anyhow::Result<Context> {
    injectors
        .iter()
        .try_fold(Context::new(), |base, inject| Ok(base.merge(&inject(call)?)))
}
