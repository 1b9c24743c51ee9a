//! Prometheus metrics for served calls.
//!
//! The dispatcher records every call through [`CallMetrics`]. Recording is
//! a no-op until a recorder is installed, e.g. with [`MetricsServer`]:
//!
//! ```rust,no_run
//! use rpc_chain_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut metrics = MetricsServer::new("0.0.0.0:9090".parse()?);
//! metrics.start()?;
//!
//! // Later, e.g. from an HTTP handler:
//! let body = metrics.render().unwrap_or_default();
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rpc_chain_core::call::CallKind;
use rpc_chain_core::status::Code;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installs the Prometheus recorder and renders the scrape payload.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server for the given scrape address.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe the call metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed. A recorder
    /// that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Address the scrape endpoint should be served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder was not installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!("rpc_calls_total", "Total number of calls, by kind and status code");
    describe_histogram!(
        "rpc_call_duration_seconds",
        "Time from receiving a call to delivering its outcome"
    );
    describe_counter!(
        "rpc_calls_rejected_total",
        "Calls answered without dispatch (unknown path, wrong kind or message type)"
    );
}

/// Call metrics recorder.
pub struct CallMetrics;

impl CallMetrics {
    /// Record a dispatched call.
    pub fn record_call(kind: CallKind, code: Code, duration: Duration) {
        counter!("rpc_calls_total", "kind" => kind.to_string(), "code" => code.as_str()).increment(1);
        histogram!("rpc_call_duration_seconds", "kind" => kind.to_string()).record(duration.as_secs_f64());
    }

    /// Record a call rejected before dispatch.
    pub fn record_rejected(code: Code) {
        counter!("rpc_calls_rejected_total", "code" => code.as_str()).increment(1);
    }
}
