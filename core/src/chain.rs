//! Persistent middleware list.

use crate::middleware::SharedMiddleware;
use std::fmt;
use std::sync::Arc;

struct Node {
    step: SharedMiddleware,
    prev: Option<Arc<Node>>,
}

/// An append-only, structurally shared list of middleware.
///
/// [`push`](Self::push) returns a new chain and leaves `self` untouched, so
/// two builders derived from a common prefix share that prefix instead of
/// copying it.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    last: Option<Arc<Node>>,
    len: usize,
}

impl MiddlewareChain {
    /// The empty chain.
    #[must_use]
    pub const fn new() -> Self {
        Self { last: None, len: 0 }
    }

    /// A chain with `step` appended.
    #[must_use]
    pub fn push(&self, step: SharedMiddleware) -> Self {
        Self {
            last: Some(Arc::new(Node {
                step,
                prev: self.last.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Every step of `other` appended after the steps of `self`.
    #[must_use]
    pub fn concat(&self, other: &Self) -> Self {
        other.to_vec().into_iter().fold(self.clone(), |chain, step| chain.push(step))
    }

    /// Number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the chain is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Steps in the order they were appended.
    #[must_use]
    pub fn to_vec(&self) -> Vec<SharedMiddleware> {
        let mut steps = Vec::with_capacity(self.len);
        let mut cursor = self.last.as_deref();
        while let Some(node) = cursor {
            steps.push(Arc::clone(&node.step));
            cursor = node.prev.as_deref();
        }
        steps.reverse();
        steps
    }
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.to_vec().iter().map(|step| step.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::middleware::{middleware, MiddlewareOutput};

    fn named(name: &'static str) -> SharedMiddleware {
        Arc::new(
            middleware(|_ctx: Context| async { Ok(MiddlewareOutput::Fields(Context::new())) })
                .named(name),
        )
    }

    fn names(chain: &MiddlewareChain) -> Vec<&'static str> {
        chain.to_vec().iter().map(|step| step.name()).collect()
    }

    #[test]
    fn test_push_keeps_order() {
        let chain = MiddlewareChain::new().push(named("a")).push(named("b")).push(named("c"));
        assert_eq!(names(&chain), vec!["a", "b", "c"]);
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_push_does_not_mutate() {
        let base = MiddlewareChain::new().push(named("auth"));
        let left = base.push(named("left"));
        let right = base.push(named("right"));

        assert_eq!(names(&base), vec!["auth"]);
        assert_eq!(names(&left), vec!["auth", "left"]);
        assert_eq!(names(&right), vec!["auth", "right"]);
    }

    #[test]
    fn test_shared_prefix() {
        let base = MiddlewareChain::new().push(named("auth"));
        let left = base.push(named("left"));

        let shared = left.to_vec();
        assert!(Arc::ptr_eq(&shared[0], &base.to_vec()[0]));
    }

    #[test]
    fn test_concat() {
        let defaults = MiddlewareChain::new().push(named("log"));
        let own = MiddlewareChain::new().push(named("auth")).push(named("user"));

        assert_eq!(names(&defaults.concat(&own)), vec!["log", "auth", "user"]);
        assert!(MiddlewareChain::new().concat(&MiddlewareChain::new()).is_empty());
    }
}
