//! # rpc-chain Runtime
//!
//! Runtime for rpc-chain handlers.
//!
//! This crate turns resolved handlers into served RPC methods: it builds the
//! request context for every call, runs the handler body through the right
//! call adapter, runs cleanups and maps failures to a [`Status`].
//!
//! ## Core Components
//!
//! - **Dispatcher**: runs one raw call against one resolved handler
//! - **Service registration**: checks handlers against a service contract
//! - **Server**: binds, runs the startup hook and routes calls by path
//! - **Stock middleware**: request info, clock and request logging
//!
//! ## Example
//!
//! ```no_run
//! use rpc_chain_core::handler::Pipeline;
//! use rpc_chain_core::call::CallKind;
//! use rpc_chain_runtime::config::ServerConfig;
//! use rpc_chain_runtime::middleware::{inject_request_info, with_clock, with_request_logging};
//! use rpc_chain_runtime::server::Server;
//! use rpc_chain_runtime::service::{MethodDescriptor, ServiceDescriptor, ServiceHandlers};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! static ECHO: ServiceDescriptor =
//!     ServiceDescriptor::new("echo.Echo", &[MethodDescriptor::new("Echo", CallKind::Unary)]);
//!
//! let pipeline = Pipeline::new()
//!     .inject(inject_request_info)
//!     .with(with_clock())
//!     .with(with_request_logging());
//!
//! let echo = pipeline
//!     .handler()
//!     .request::<String>()
//!     .reply::<String>()
//!     .unary(|message, _ctx, _call| async move { Ok(message) });
//!
//! let mut server = Server::new(pipeline, ServerConfig::from_env()?);
//! server.add_service(&ECHO, ServiceHandlers::new().method("Echo", echo))?;
//! let addr = server.listen().await?;
//! println!("listening on {addr}");
//! # Ok(())
//! # }
//! ```
//!
//! [`Status`]: rpc_chain_core::status::Status

pub mod config;
pub mod dispatch;
pub mod metrics;
pub mod middleware;
pub mod server;
pub mod service;

pub use config::{CleanupPolicy, ServerConfig};
pub use dispatch::Dispatcher;
pub use server::{Router, Server, StartEvent};
pub use service::{MethodDescriptor, ServiceDescriptor, ServiceHandlers};

/// Error types for the runtime
pub mod error {
    use rpc_chain_core::call::CallKind;
    use std::sync::Arc;
    use thiserror::Error;

    /// A service implementation does not match its contract.
    ///
    /// Raised by [`Server::add_service`](crate::server::Server::add_service)
    /// while wiring, never on first call.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RegistrationError {
        /// A declared method has no handler.
        #[error("service `{service}` declares `{method}` but no handler was provided")]
        MissingMethod {
            /// Service name
            service: String,
            /// Method name
            method: String,
        },

        /// A handler's call kind differs from the declared one.
        #[error("`{service}/{method}` is declared {declared} but its handler is {provided}")]
        KindMismatch {
            /// Service name
            service: String,
            /// Method name
            method: String,
            /// Kind in the service contract
            declared: CallKind,
            /// Kind of the supplied handler
            provided: CallKind,
        },

        /// A handler was supplied for a method the service does not declare.
        #[error("service `{service}` has no method `{method}`")]
        UnknownMethod {
            /// Service name
            service: String,
            /// Method name
            method: String,
        },

        /// The service was registered twice.
        #[error("service `{0}` is already registered")]
        DuplicateService(String),
    }

    /// Invalid configuration value.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum ConfigError {
        /// An environment variable could not be parsed.
        #[error("invalid value `{value}` for {key}: {reason}")]
        InvalidValue {
            /// Variable name
            key: &'static str,
            /// Raw value
            value: String,
            /// What was wrong with it
            reason: String,
        },
    }

    /// Errors that can occur while setting up or starting a server
    #[derive(Error, Debug)]
    pub enum ServerError {
        /// Binding the listening socket failed.
        ///
        /// The startup hook has already observed the same error.
        #[error("failed to bind {addr}: {source}")]
        Bind {
            /// Address that was requested
            addr: String,
            /// Underlying I/O error
            #[source]
            source: Arc<std::io::Error>,
        },

        /// The startup context could not be built.
        #[error("failed to build startup context: {0:#}")]
        StartContext(anyhow::Error),

        /// The startup hook returned an error.
        #[error("startup hook failed: {0:#}")]
        StartHook(anyhow::Error),

        /// A service did not match its contract.
        #[error(transparent)]
        Registration(#[from] RegistrationError),

        /// Configuration could not be loaded.
        #[error(transparent)]
        Config(#[from] ConfigError),
    }
}
