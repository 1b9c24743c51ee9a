//! # rpc-chain Testing
//!
//! Testing utilities for rpc-chain handlers and middleware.
//!
//! This crate provides:
//! - [`HandlerTest`]: runs a resolved handler through the real dispatcher
//!   with in-memory input and output
//! - [`test_middleware`]: runs one middleware step in isolation
//! - Deterministic clocks
//!
//! ## Example
//!
//! ```
//! use rpc_chain_core::handler::HandlerBuilder;
//! use rpc_chain_testing::HandlerTest;
//!
//! # tokio_test::block_on(async {
//! let shout = HandlerBuilder::new()
//!     .request::<String>()
//!     .reply::<String>()
//!     .unary(|name, _ctx, _call| async move { Ok(name.to_uppercase()) });
//!
//! let outcome = HandlerTest::new(&shout)
//!     .with_request("alice".to_string())
//!     .run()
//!     .await
//!     .unwrap();
//!
//! assert_eq!(outcome.reply(), Some(&"ALICE".to_string()));
//! # });
//! ```

use chrono::{DateTime, Utc};
use rpc_chain_core::clock::Clock;

pub mod harness;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use futures::future::BoxFuture;
    use rpc_chain_core::clock::SharedClock;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, and `sleep` completes immediately.
    /// Requested sleeps are recorded and shared between clones.
    ///
    /// # Example
    ///
    /// ```
    /// use rpc_chain_testing::mocks::FixedClock;
    /// use rpc_chain_core::clock::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
        slept: Arc<Mutex<Vec<Duration>>>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time,
                slept: Arc::default(),
            }
        }

        /// Sleeps requested so far, in order.
        #[must_use]
        pub fn slept(&self) -> Vec<Duration> {
            self.slept.lock().map(|slept| slept.clone()).unwrap_or_default()
        }

        /// A shared handle, as stored under a context field.
        #[must_use]
        pub fn shared(&self) -> SharedClock {
            Arc::new(self.clone())
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }

        fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
            if let Ok(mut slept) = self.slept.lock() {
                slept.push(duration);
            }
            Box::pin(std::future::ready(()))
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Route `tracing` output to the test harness.
    ///
    /// Honors `RUST_LOG`. Safe to call from every test; only the first call
    /// installs the subscriber.
    pub fn init_tracing() {
        // Another test may have installed it already.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Field writes for a middleware chain: `(field index, value)` per step.
    ///
    /// Field indices are drawn from `0..fields`, so steps overwrite each
    /// other often.
    pub fn field_writes(fields: usize, max_steps: usize) -> impl Strategy<Value = Vec<(usize, i64)>> {
        prop::collection::vec((0..fields.max(1), any::<i64>()), 0..=max_steps)
    }

    /// The value each field ends with after applying `writes` in order.
    #[must_use]
    pub fn last_writes(fields: usize, writes: &[(usize, i64)]) -> Vec<Option<i64>> {
        let mut last = vec![None; fields];
        for &(field, value) in writes {
            if let Some(slot) = last.get_mut(field) {
                *slot = Some(value);
            }
        }
        last
    }
}

// Re-export commonly used items
pub use harness::{test_middleware, HandlerTest, MiddlewareProbe, TestOutcome};
pub use helpers::init_tracing;
pub use mocks::{test_clock, FixedClock};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
    }

    #[tokio::test]
    async fn test_fixed_clock_records_sleeps() {
        let clock = test_clock();
        let shared = clock.shared();

        shared.sleep(Duration::from_secs(1)).await;
        shared.sleep(Duration::from_millis(5)).await;

        assert_eq!(clock.slept(), vec![Duration::from_secs(1), Duration::from_millis(5)]);
    }

    #[test]
    fn test_last_writes() {
        assert_eq!(
            properties::last_writes(3, &[(0, 1), (2, 5), (0, 7)]),
            vec![Some(7), None, Some(5)]
        );
    }
}
