//! Server wiring: registration, binding, startup hook and routing.
//!
//! A [`Server`] owns the pipeline and configuration. Services are checked
//! against their contract as they are added. [`Server::listen`] binds the
//! socket and runs the startup hook exactly once, with a context built
//! without a call and the bound address or the bind error.
//!
//! Calls reach handlers through a [`Router`], which matches the call path
//! against the registered methods.

use crate::config::ServerConfig;
use crate::dispatch::Dispatcher;
use crate::error::{RegistrationError, ServerError};
use crate::metrics::CallMetrics;
use crate::service::{ErasedHandler, ServiceDescriptor, ServiceHandlers};
use futures::future::BoxFuture;
use rpc_chain_core::call::CallHead;
use rpc_chain_core::context::Context;
use rpc_chain_core::handler::Pipeline;
use rpc_chain_core::resolve::resolve_context;
use rpc_chain_core::status::Status;
use rpc_chain_core::transport::{AnyMessage, IncomingCall, IncomingUnary, Reply};
use std::any::type_name;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// What the startup hook is told.
#[derive(Debug, Clone)]
pub struct StartEvent {
    /// Base injectors and default middleware, resolved without a call
    pub context: Context,
    /// Bound address, or the reason binding failed
    pub outcome: Result<SocketAddr, Arc<io::Error>>,
}

impl StartEvent {
    /// Bound port, if binding succeeded.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.outcome.as_ref().ok().map(SocketAddr::port)
    }
}

type StartHook = Box<dyn FnOnce(StartEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// An RPC server under construction.
pub struct Server {
    pipeline: Pipeline,
    config: ServerConfig,
    dispatcher: Dispatcher,
    routes: HashMap<String, Arc<dyn ErasedHandler>>,
    services: BTreeSet<&'static str>,
    on_start: Option<StartHook>,
    listener: Option<TcpListener>,
}

impl Server {
    /// A server for handlers built from `pipeline`.
    #[must_use]
    pub fn new(pipeline: Pipeline, config: ServerConfig) -> Self {
        let dispatcher = Dispatcher::from_pipeline(&pipeline).with_cleanup_policy(config.cleanup_policy);
        Self {
            pipeline,
            config,
            dispatcher,
            routes: HashMap::new(),
            services: BTreeSet::new(),
            on_start: None,
            listener: None,
        }
    }

    /// Run `hook` once when listening starts or fails to start.
    #[must_use]
    pub fn on_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: FnOnce(StartEvent) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_start = Some(Box::new(move |event| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(hook(event))
        }));
        self
    }

    /// Register the implementation of a service.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if the handlers do not match the
    /// descriptor or the service is already registered. Nothing is
    /// registered in that case.
    pub fn add_service(
        &mut self,
        descriptor: &ServiceDescriptor,
        handlers: ServiceHandlers,
    ) -> Result<(), RegistrationError> {
        if self.services.contains(descriptor.name) {
            return Err(RegistrationError::DuplicateService(descriptor.name.to_string()));
        }

        let routes = handlers.into_routes(descriptor)?;
        tracing::info!(service = descriptor.name, methods = routes.len(), "Service registered");

        self.services.insert(descriptor.name);
        self.routes.extend(routes);
        Ok(())
    }

    /// Bind the configured address and run the startup hook.
    ///
    /// # Errors
    ///
    /// See [`listen_on`](Self::listen_on).
    pub async fn listen(&mut self) -> Result<SocketAddr, ServerError> {
        let addr = self.config.addr();
        self.listen_on(&addr).await
    }

    /// Bind `addr` and run the startup hook.
    ///
    /// The hook runs whether or not binding succeeded. If the startup
    /// context cannot be built, the hook is not run at all: the bind outcome
    /// is logged and a bound socket is released.
    ///
    /// # Errors
    ///
    /// - [`ServerError::StartContext`] if the startup context cannot be built,
    ///   regardless of the bind outcome
    /// - [`ServerError::StartHook`] if the hook fails
    /// - [`ServerError::Bind`] if the address could not be bound
    pub async fn listen_on(&mut self, addr: &str) -> Result<SocketAddr, ServerError> {
        let (listener, outcome) = match bind(addr).await {
            Ok((listener, local)) => (Some(listener), Ok(local)),
            Err(error) => (None, Err(Arc::new(error))),
        };

        if let Some(hook) = self.on_start.take() {
            let context = match self.start_context().await {
                Ok(context) => context,
                Err(error) => {
                    match &outcome {
                        Ok(local) => tracing::error!(addr = %local, "Releasing socket, startup context failed"),
                        Err(source) => tracing::error!(addr, error = %source, "Failed to bind"),
                    }
                    return Err(error);
                }
            };
            hook(StartEvent {
                context,
                outcome: outcome.clone(),
            })
            .await
            .map_err(ServerError::StartHook)?;
        }

        match outcome {
            Ok(local) => {
                tracing::info!(addr = %local, routes = self.routes.len(), "Server listening");
                self.listener = listener;
                Ok(local)
            }
            Err(source) => {
                tracing::error!(addr, error = %source, "Failed to bind");
                Err(ServerError::Bind {
                    addr: addr.to_string(),
                    source,
                })
            }
        }
    }

    async fn start_context(&self) -> Result<Context, ServerError> {
        let base = self.dispatcher.base_context(None).map_err(ServerError::StartContext)?;
        let middlewares = self.pipeline.default_middleware().to_vec();

        let resolved = resolve_context(base, &middlewares)
            .await
            .map_err(|failure| ServerError::StartContext(failure.error))?;
        if !resolved.cleanups.is_empty() {
            tracing::debug!(count = resolved.cleanups.len(), "Dropping cleanups registered at startup");
        }
        Ok(resolved.context)
    }

    /// The bound socket, for the wire layer to accept on.
    pub fn take_listener(&mut self) -> Option<TcpListener> {
        self.listener.take()
    }

    /// A router over the services registered so far.
    #[must_use]
    pub fn router(&self) -> Router {
        Router {
            routes: Arc::new(self.routes.clone()),
            dispatcher: self.dispatcher.clone(),
        }
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The pipeline handlers were built from.
    #[must_use]
    pub const fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("services", &self.services)
            .field("listening", &self.listener.is_some())
            .finish_non_exhaustive()
    }
}

async fn bind(addr: &str) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Routes erased calls to registered handlers by path.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct Router {
    routes: Arc<HashMap<String, Arc<dyn ErasedHandler>>>,
    dispatcher: Dispatcher,
}

impl Router {
    /// Serve one call.
    ///
    /// A path with no registered method is answered `UNIMPLEMENTED`.
    pub async fn handle(&self, call: IncomingCall<AnyMessage, AnyMessage>) {
        let Some(handler) = self.routes.get(call.head().path()) else {
            let status = Status::unimplemented(format!("unknown method {}", call.head().path()));
            tracing::warn!(path = call.head().path(), "No route for call");
            CallMetrics::record_rejected(status.code());
            call.fail(status).await;
            return;
        };

        handler.dispatch(&self.dispatcher, call).await;
    }

    /// Serve a unary call with typed messages.
    ///
    /// # Errors
    ///
    /// Returns the status the call ended with, or `INTERNAL` if the reply
    /// is not a `Res`.
    pub async fn call_unary<Req, Res>(&self, head: CallHead, request: Req) -> Result<Res, Status>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        let (reply, rx) = Reply::<AnyMessage>::channel();
        let request: AnyMessage = Box::new(request);
        self.handle(IncomingUnary { head, request, reply }.into()).await;

        let message = rx
            .await
            .map_err(|_| Status::internal("call ended without a reply"))??;
        message
            .downcast::<Res>()
            .map(|message| *message)
            .map_err(|_| Status::internal(format!("reply is not a {}", type_name::<Res>())))
    }

    /// Whether a method is registered under `path`.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Registered paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.routes.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
