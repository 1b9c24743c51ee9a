//! Service contracts and their implementations.
//!
//! A [`ServiceDescriptor`] is the transport's view of a service: its full
//! name and the call kind of every method, as a code generator would emit
//! it. [`ServiceHandlers`] maps method names to resolved handlers; the two
//! are checked against each other when the service is added to a server.

use crate::dispatch::Dispatcher;
use crate::error::RegistrationError;
use crate::metrics::CallMetrics;
use futures::future::BoxFuture;
use rpc_chain_core::call::CallKind;
use rpc_chain_core::handler::ResolvedHandler;
use rpc_chain_core::transport::{AnyMessage, IncomingCall};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One method of a service contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method name, e.g. `SayHello`
    pub name: &'static str,
    /// Declared call kind
    pub kind: CallKind,
}

impl MethodDescriptor {
    /// Describe a method.
    #[must_use]
    pub const fn new(name: &'static str, kind: CallKind) -> Self {
        Self { name, kind }
    }
}

/// A service contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Fully qualified service name, e.g. `greeter.Greeter`
    pub name: &'static str,
    /// Declared methods
    pub methods: &'static [MethodDescriptor],
}

impl ServiceDescriptor {
    /// Describe a service.
    #[must_use]
    pub const fn new(name: &'static str, methods: &'static [MethodDescriptor]) -> Self {
        Self { name, methods }
    }

    /// Look up a declared method.
    #[must_use]
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Routing path of a method: `/{service}/{method}`.
    #[must_use]
    pub fn path(&self, method: &str) -> String {
        format!("/{}/{method}", self.name)
    }
}

/// A resolved handler with its message types erased.
pub(crate) trait ErasedHandler: Send + Sync {
    fn kind(&self) -> CallKind;

    fn dispatch(&self, dispatcher: &Dispatcher, call: IncomingCall<AnyMessage, AnyMessage>) -> BoxFuture<'static, ()>;
}

impl<Req, Res> ErasedHandler for ResolvedHandler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn kind(&self) -> CallKind {
        ResolvedHandler::kind(self)
    }

    fn dispatch(&self, dispatcher: &Dispatcher, call: IncomingCall<AnyMessage, AnyMessage>) -> BoxFuture<'static, ()> {
        let handler = self.clone();
        let dispatcher = dispatcher.clone();
        Box::pin(async move {
            match call.downcast::<Req, Res>() {
                Ok(call) => dispatcher.dispatch(&handler, call).await,
                Err((status, call)) => {
                    tracing::warn!(path = call.head().path(), error = status.message(), "Undecodable request");
                    CallMetrics::record_rejected(status.code());
                    call.fail(status).await;
                }
            }
        })
    }
}

/// The implementation of a service: method name to resolved handler.
#[derive(Default, Clone)]
pub struct ServiceHandlers {
    handlers: BTreeMap<String, Arc<dyn ErasedHandler>>,
}

impl ServiceHandlers {
    /// No methods yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the handler for `name`, replacing any earlier one.
    #[must_use]
    pub fn method<Req, Res>(mut self, name: impl Into<String>, handler: ResolvedHandler<Req, Res>) -> Self
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Method names with a handler.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Check the handlers against `descriptor`.
    ///
    /// # Errors
    ///
    /// - [`RegistrationError::MissingMethod`] if a declared method has no handler
    /// - [`RegistrationError::KindMismatch`] if a handler serves another call kind
    /// - [`RegistrationError::UnknownMethod`] if a handler matches no declared method
    pub fn validate(&self, descriptor: &ServiceDescriptor) -> Result<(), RegistrationError> {
        for method in descriptor.methods {
            let handler = self
                .handlers
                .get(method.name)
                .ok_or_else(|| RegistrationError::MissingMethod {
                    service: descriptor.name.to_string(),
                    method: method.name.to_string(),
                })?;
            if handler.kind() != method.kind {
                return Err(RegistrationError::KindMismatch {
                    service: descriptor.name.to_string(),
                    method: method.name.to_string(),
                    declared: method.kind,
                    provided: handler.kind(),
                });
            }
        }

        if let Some(extra) = self.names().find(|name| descriptor.method(name).is_none()) {
            return Err(RegistrationError::UnknownMethod {
                service: descriptor.name.to_string(),
                method: extra.to_string(),
            });
        }

        Ok(())
    }

    /// Validate and produce the routes for `descriptor`.
    pub(crate) fn into_routes(
        self,
        descriptor: &ServiceDescriptor,
    ) -> Result<Vec<(String, Arc<dyn ErasedHandler>)>, RegistrationError> {
        self.validate(descriptor)?;
        Ok(self
            .handlers
            .into_iter()
            .map(|(name, handler)| (descriptor.path(&name), handler))
            .collect())
    }
}

impl fmt::Debug for ServiceHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(name, handler)| (name, handler.kind())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_chain_core::handler::HandlerBuilder;

    static ECHO: ServiceDescriptor = ServiceDescriptor::new(
        "test.Echo",
        &[
            MethodDescriptor::new("Echo", CallKind::Unary),
            MethodDescriptor::new("Collect", CallKind::ClientStream),
        ],
    );

    fn echo() -> ResolvedHandler<String, String> {
        HandlerBuilder::new()
            .request::<String>()
            .reply::<String>()
            .unary(|message, _ctx, _call| async move { Ok(message) })
    }

    fn collect() -> ResolvedHandler<String, String> {
        HandlerBuilder::new()
            .request::<String>()
            .reply::<String>()
            .client_stream(|_ctx, _call| async { Ok(String::new()) })
    }

    #[test]
    fn test_complete_service_validates() {
        let handlers = ServiceHandlers::new().method("Echo", echo()).method("Collect", collect());
        assert_eq!(handlers.validate(&ECHO), Ok(()));

        let routes = handlers.into_routes(&ECHO).map(|routes| {
            routes.into_iter().map(|(path, _)| path).collect::<Vec<_>>()
        });
        assert_eq!(
            routes,
            Ok(vec!["/test.Echo/Collect".to_string(), "/test.Echo/Echo".to_string()])
        );
    }

    #[test]
    fn test_missing_method() {
        let handlers = ServiceHandlers::new().method("Echo", echo());
        assert_eq!(
            handlers.validate(&ECHO),
            Err(RegistrationError::MissingMethod {
                service: "test.Echo".to_string(),
                method: "Collect".to_string(),
            })
        );
    }

    #[test]
    fn test_kind_mismatch() {
        let handlers = ServiceHandlers::new().method("Echo", collect()).method("Collect", collect());
        assert_eq!(
            handlers.validate(&ECHO),
            Err(RegistrationError::KindMismatch {
                service: "test.Echo".to_string(),
                method: "Echo".to_string(),
                declared: CallKind::Unary,
                provided: CallKind::ClientStream,
            })
        );
    }

    #[test]
    fn test_unknown_method() {
        let handlers = ServiceHandlers::new()
            .method("Echo", echo())
            .method("Collect", collect())
            .method("Shout", echo());
        assert!(matches!(
            handlers.validate(&ECHO),
            Err(RegistrationError::UnknownMethod { method, .. }) if method == "Shout"
        ));
    }
}
