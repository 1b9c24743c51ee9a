//! Server configuration.
//!
//! Defaults can be overridden from the environment:
//!
//! | variable                   | field            | default        |
//! |----------------------------|------------------|----------------|
//! | `RPC_CHAIN_HOST`           | `host`           | `0.0.0.0`      |
//! | `RPC_CHAIN_PORT`           | `port`           | `50051`        |
//! | `RPC_CHAIN_CLEANUP_POLICY` | `cleanup_policy` | `success_only` |

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 50051;

/// When registered cleanups run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Only after the handler body succeeded.
    ///
    /// A failing middleware step or body leaves every registered cleanup
    /// unrun.
    #[default]
    SuccessOnly,

    /// Also after a failure, for the steps that completed before it.
    Always,
}

impl CleanupPolicy {
    /// Whether cleanups run after a failed call.
    #[must_use]
    pub const fn runs_on_failure(self) -> bool {
        matches!(self, Self::Always)
    }
}

impl fmt::Display for CleanupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SuccessOnly => f.write_str("success_only"),
            Self::Always => f.write_str("always"),
        }
    }
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success_only" | "success-only" => Ok(Self::SuccessOnly),
            "always" => Ok(Self::Always),
            other => Err(format!("expected `success_only` or `always`, got `{other}`")),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind
    pub host: String,
    /// Port to bind (0 picks a free port)
    pub port: u16,
    /// When cleanups run
    pub cleanup_policy: CleanupPolicy,
}

impl ServerConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            cleanup_policy: CleanupPolicy::default(),
        }
    }

    /// Set the host
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the cleanup policy
    #[must_use]
    pub const fn with_cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = policy;
        self
    }

    /// `host:port`, as passed to the listener.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Defaults overridden by `RPC_CHAIN_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(host) = lookup("RPC_CHAIN_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("RPC_CHAIN_PORT") {
            config.port = port.trim().parse::<u16>().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    key: "RPC_CHAIN_PORT",
                    value: port.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(policy) = lookup("RPC_CHAIN_CLEANUP_POLICY") {
            config.cleanup_policy = policy.parse::<CleanupPolicy>().map_err(|reason| ConfigError::InvalidValue {
                key: "RPC_CHAIN_CLEANUP_POLICY",
                value: policy.clone(),
                reason,
            })?;
        }

        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}
