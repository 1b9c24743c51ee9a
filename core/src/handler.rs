//! Handler builder and resolved handlers.
//!
//! A [`Pipeline`] holds what every handler of a service shares: base
//! injectors and default middleware. [`Pipeline::handler`] starts a
//! [`HandlerBuilder`]; appending middleware returns a new builder and
//! leaves the old one usable, so common prefixes can be reused:
//!
//! ```
//! use rpc_chain_core::context::{Context, Field};
//! use rpc_chain_core::handler::Pipeline;
//! use rpc_chain_core::middleware::{middleware, MiddlewareOutput};
//!
//! const USER: Field<String> = Field::new("user");
//!
//! let pipeline = Pipeline::new();
//! let authenticated = pipeline.handler().with(middleware(|_ctx: Context| async {
//!     Ok(MiddlewareOutput::Fields(Context::new().with(USER, "alice".to_string())))
//! }));
//!
//! let whoami = authenticated
//!     .request::<()>()
//!     .reply::<String>()
//!     .unary(|(), ctx, _call| async move { Ok(ctx.require(USER)?.clone()) });
//!
//! assert_eq!(whoami.middlewares().len(), 1);
//! ```

use crate::adapter::{BidiStreamCall, ClientStreamCall, ServerStreamCall, UnaryCall};
use crate::call::{CallHead, CallKind};
use crate::chain::MiddlewareChain;
use crate::context::Context;
use crate::middleware::{Injector, Middleware, SharedMiddleware};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Body of a unary handler.
pub type UnaryBody<Req, Res> =
    Arc<dyn Fn(Req, Context, UnaryCall) -> BoxFuture<'static, anyhow::Result<Res>> + Send + Sync>;

/// Body of a server-streaming handler.
pub type ServerStreamBody<Req, Res> = Arc<
    dyn Fn(Req, Context, ServerStreamCall<Res>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// Body of a client-streaming handler.
pub type ClientStreamBody<Req, Res> = Arc<
    dyn Fn(Context, ClientStreamCall<Req>) -> BoxFuture<'static, anyhow::Result<Res>> + Send + Sync,
>;

/// Body of a bidirectional-streaming handler.
pub type BidiStreamBody<Req, Res> = Arc<
    dyn Fn(Context, BidiStreamCall<Req, Res>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// A handler body; the variant is the call kind.
pub enum HandlerBody<Req, Res> {
    /// Request in, response out.
    Unary(UnaryBody<Req, Res>),
    /// Request in, responses written.
    ServerStream(ServerStreamBody<Req, Res>),
    /// Requests consumed, response out.
    ClientStream(ClientStreamBody<Req, Res>),
    /// Requests consumed, responses written.
    BidiStream(BidiStreamBody<Req, Res>),
}

impl<Req, Res> HandlerBody<Req, Res> {
    /// The call kind this body serves.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        match self {
            Self::Unary(_) => CallKind::Unary,
            Self::ServerStream(_) => CallKind::ServerStream,
            Self::ClientStream(_) => CallKind::ClientStream,
            Self::BidiStream(_) => CallKind::BidiStream,
        }
    }
}

impl<Req, Res> Clone for HandlerBody<Req, Res> {
    fn clone(&self) -> Self {
        match self {
            Self::Unary(body) => Self::Unary(Arc::clone(body)),
            Self::ServerStream(body) => Self::ServerStream(Arc::clone(body)),
            Self::ClientStream(body) => Self::ClientStream(Arc::clone(body)),
            Self::BidiStream(body) => Self::BidiStream(Arc::clone(body)),
        }
    }
}

impl<Req, Res> fmt::Debug for HandlerBody<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerBody::{}", self.kind())
    }
}

/// Call kind, ordered middleware and body, ready for dispatch.
///
/// Immutable once built. Clones share the middleware list and the body.
pub struct ResolvedHandler<Req, Res> {
    middlewares: Arc<[SharedMiddleware]>,
    body: HandlerBody<Req, Res>,
}

impl<Req, Res> ResolvedHandler<Req, Res> {
    /// Assemble a handler from its parts.
    #[must_use]
    pub fn new(middlewares: Vec<SharedMiddleware>, body: HandlerBody<Req, Res>) -> Self {
        Self {
            middlewares: middlewares.into(),
            body,
        }
    }

    /// The call kind.
    #[must_use]
    pub const fn kind(&self) -> CallKind {
        self.body.kind()
    }

    /// Default middleware followed by the handler's own, in run order.
    #[must_use]
    pub fn middlewares(&self) -> &[SharedMiddleware] {
        &self.middlewares
    }

    /// The body.
    #[must_use]
    pub const fn body(&self) -> &HandlerBody<Req, Res> {
        &self.body
    }

    /// Whether both handlers run the same middleware instances in the same
    /// order.
    #[must_use]
    pub fn same_middlewares(&self, other: &Self) -> bool {
        self.middlewares.len() == other.middlewares.len()
            && self
                .middlewares
                .iter()
                .zip(other.middlewares.iter())
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl<Req, Res> Clone for ResolvedHandler<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            middlewares: Arc::clone(&self.middlewares),
            body: self.body.clone(),
        }
    }
}

impl<Req, Res> fmt::Debug for ResolvedHandler<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedHandler")
            .field("kind", &self.kind())
            .field(
                "middlewares",
                &self.middlewares.iter().map(|m| m.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Incremental, immutable handler definition.
///
/// `Req` and `Res` are fixed with [`request`](Self::request) and
/// [`reply`](Self::reply); they have no effect at runtime.
pub struct HandlerBuilder<Req = (), Res = ()> {
    chain: MiddlewareChain,
    _messages: PhantomData<fn(Req) -> Res>,
}

impl HandlerBuilder {
    /// A builder with no middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self::from_chain(MiddlewareChain::new())
    }
}

impl Default for HandlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Res> HandlerBuilder<Req, Res> {
    const fn from_chain(chain: MiddlewareChain) -> Self {
        Self {
            chain,
            _messages: PhantomData,
        }
    }

    /// A builder with `middleware` appended.
    #[must_use]
    pub fn with<M>(&self, middleware: M) -> Self
    where
        M: Middleware,
    {
        self.with_shared(Arc::new(middleware))
    }

    /// A builder with an already shared middleware appended.
    #[must_use]
    pub fn with_shared(&self, middleware: SharedMiddleware) -> Self {
        Self::from_chain(self.chain.push(middleware))
    }

    /// Fix the request message type.
    #[must_use]
    pub fn request<R>(&self) -> HandlerBuilder<R, Res> {
        HandlerBuilder::from_chain(self.chain.clone())
    }

    /// Fix the response message type.
    #[must_use]
    pub fn reply<S>(&self) -> HandlerBuilder<Req, S> {
        HandlerBuilder::from_chain(self.chain.clone())
    }

    /// The middleware appended so far.
    #[must_use]
    pub const fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    fn resolve(&self, body: HandlerBody<Req, Res>) -> ResolvedHandler<Req, Res> {
        ResolvedHandler::new(self.chain.to_vec(), body)
    }
}

impl<Req, Res> HandlerBuilder<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    /// Finish as a unary handler.
    pub fn unary<F, Fut>(&self, body: F) -> ResolvedHandler<Req, Res>
    where
        F: Fn(Req, Context, UnaryCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        let body: UnaryBody<Req, Res> = Arc::new(
            move |request: Req, ctx: Context, call: UnaryCall| -> BoxFuture<'static, anyhow::Result<Res>> {
                Box::pin(body(request, ctx, call))
            },
        );
        self.resolve(HandlerBody::Unary(body))
    }

    /// Finish as a server-streaming handler.
    pub fn server_stream<F, Fut>(&self, body: F) -> ResolvedHandler<Req, Res>
    where
        F: Fn(Req, Context, ServerStreamCall<Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: ServerStreamBody<Req, Res> = Arc::new(
            move |request: Req,
                  ctx: Context,
                  call: ServerStreamCall<Res>|
                  -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(body(request, ctx, call))
            },
        );
        self.resolve(HandlerBody::ServerStream(body))
    }

    /// Finish as a client-streaming handler.
    pub fn client_stream<F, Fut>(&self, body: F) -> ResolvedHandler<Req, Res>
    where
        F: Fn(Context, ClientStreamCall<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Res>> + Send + 'static,
    {
        let body: ClientStreamBody<Req, Res> = Arc::new(
            move |ctx: Context, call: ClientStreamCall<Req>| -> BoxFuture<'static, anyhow::Result<Res>> {
                Box::pin(body(ctx, call))
            },
        );
        self.resolve(HandlerBody::ClientStream(body))
    }

    /// Finish as a bidirectional-streaming handler.
    pub fn bidi_stream<F, Fut>(&self, body: F) -> ResolvedHandler<Req, Res>
    where
        F: Fn(Context, BidiStreamCall<Req, Res>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let body: BidiStreamBody<Req, Res> = Arc::new(
            move |ctx: Context, call: BidiStreamCall<Req, Res>| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(body(ctx, call))
            },
        );
        self.resolve(HandlerBody::BidiStream(body))
    }
}

impl<Req, Res> Clone for HandlerBuilder<Req, Res> {
    fn clone(&self) -> Self {
        Self::from_chain(self.chain.clone())
    }
}

impl<Req, Res> fmt::Debug for HandlerBuilder<Req, Res> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerBuilder")
            .field("chain", &self.chain)
            .finish()
    }
}

/// Base injectors and default middleware shared by a service's handlers.
#[derive(Clone, Default)]
pub struct Pipeline {
    injectors: Vec<Injector>,
    defaults: MiddlewareChain,
}

impl Pipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a base injector. Later injectors win on conflicting fields.
    #[must_use]
    pub fn inject<F>(self, injector: F) -> Self
    where
        F: Fn(Option<&CallHead>) -> anyhow::Result<Context> + Send + Sync + 'static,
    {
        self.inject_shared(Arc::new(injector))
    }

    /// Add an already shared base injector.
    #[must_use]
    pub fn inject_shared(mut self, injector: Injector) -> Self {
        self.injectors.push(injector);
        self
    }

    /// Append default middleware, run before every handler's own.
    #[must_use]
    pub fn with<M>(self, middleware: M) -> Self
    where
        M: Middleware,
    {
        self.with_shared(Arc::new(middleware))
    }

    /// Append already shared default middleware.
    #[must_use]
    pub fn with_shared(mut self, middleware: SharedMiddleware) -> Self {
        self.defaults = self.defaults.push(middleware);
        self
    }

    /// Start a handler seeded with the default middleware.
    #[must_use]
    pub fn handler(&self) -> HandlerBuilder {
        HandlerBuilder::from_chain(self.defaults.clone())
    }

    /// Base injectors, in run order.
    #[must_use]
    pub fn injectors(&self) -> &[Injector] {
        &self.injectors
    }

    /// Default middleware, in run order.
    #[must_use]
    pub const fn default_middleware(&self) -> &MiddlewareChain {
        &self.defaults
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("injectors", &self.injectors.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}
