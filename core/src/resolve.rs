//! The context merger.
//!
//! [`resolve_context`] folds an ordered list of middleware steps over a base
//! context. Steps run one after another, each seeing every field produced
//! before it. Cleanups are collected in registration order; running them is
//! left to the caller ([`run_cleanups`] runs them last-registered-first).

use crate::context::Context;
use crate::middleware::{Cleanup, SharedMiddleware};
use std::fmt;

/// Final context of a successful merge plus the cleanups it registered.
#[derive(Debug, Default)]
pub struct ResolvedContext {
    /// Base context with every step's fields merged in.
    pub context: Context,
    /// Cleanups in registration order.
    pub cleanups: Vec<Cleanup>,
}

/// A step failed part-way through the merge.
///
/// Carries the cleanups registered by the steps that completed before the
/// failure. The merger never runs them; whoever handles the failure decides.
pub struct MergeFailure {
    /// The step's error.
    pub error: anyhow::Error,
    /// Index of the failing step.
    pub step: usize,
    /// Cleanups registered before the failure, in registration order.
    pub cleanups: Vec<Cleanup>,
}

impl fmt::Debug for MergeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeFailure")
            .field("error", &self.error)
            .field("step", &self.step)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

impl fmt::Display for MergeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "middleware step {} failed: {}", self.step, self.error)
    }
}

/// Run `steps` in order over `base`.
///
/// # Errors
///
/// Returns [`MergeFailure`] as soon as a step fails. Later steps are not
/// invoked.
pub async fn resolve_context(
    base: Context,
    steps: &[SharedMiddleware],
) -> Result<ResolvedContext, MergeFailure> {
    let mut context = base;
    let mut cleanups = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        tracing::trace!(step = index, middleware = step.name(), "Running middleware");

        match step.call(context.clone()).await {
            Ok(output) => {
                let (fields, cleanup) = output.into_parts();
                context = context.merge(&fields);
                cleanups.extend(cleanup);
            }
            Err(error) => {
                tracing::debug!(step = index, middleware = step.name(), error = %error, "Middleware failed");
                return Err(MergeFailure {
                    error,
                    step: index,
                    cleanups,
                });
            }
        }
    }

    Ok(ResolvedContext { context, cleanups })
}

/// Run cleanups last-registered-first, awaiting each before the next.
///
/// A failing cleanup is logged at `warn` and does not stop the rest.
pub async fn run_cleanups(cleanups: Vec<Cleanup>) {
    let total = cleanups.len();
    for (offset, cleanup) in cleanups.into_iter().rev().enumerate() {
        let index = total - offset - 1;
        if let Err(error) = cleanup.run().await {
            tracing::warn!(cleanup = index, error = %error, "Cleanup failed");
        }
    }
}
