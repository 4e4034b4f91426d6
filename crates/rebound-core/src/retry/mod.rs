//! Retry execution engine with policy-based configuration
//!
//! An operation is attempted until it succeeds or its [`RetryPolicy`] refuses
//! another attempt. Between attempts a [`BackoffPolicy`] decides how long to
//! wait. Once attempts are exhausted an optional recovery handler may produce
//! a fallback result.
//!
//! # Features
//!
//! - Type-aware retry policies driven by [`FailureType`](crate::types::FailureType) lineages
//! - Fixed, exponential (with jitter) and linear backoff
//! - Lifecycle listeners via the [`RetryListener`] trait, with [`TracingListener`] built in
//! - Shared, thread-safe [`RetryStatistics`]
//! - Recovery handlers, either inline or resolved from a [`RecoveryRegistry`]
//! - Cooperative cancellation and per-attempt timeouts
//!
//! # Example
//!
//! ```rust,no_run
//! use rebound_core::retry::{RetryExecutorBuilder, RetryError, TracingListener};
//! use rebound_core::types::RetryDefinition;
//!
//! async fn example() -> Result<String, RetryError<std::io::Error>> {
//!     let definition = RetryDefinition::new(3)
//!         .retry_on("io::TimedOut")
//!         .with_label("fetch");
//!
//!     let executor = RetryExecutorBuilder::from_definition(&definition)
//!         .with_listener(TracingListener::new("fetch"))
//!         .build();
//!
//!     executor
//!         .execute(|ctx| {
//!             let attempt = ctx.attempt_count() + 1;
//!             async move { Ok(format!("fetched on attempt {attempt}")) }
//!         })
//!         .await
//! }
//! ```

mod backoff;
mod context;
mod error;
mod executor;
mod listener;
mod policy;
mod recovery;
mod statistics;

pub use backoff::{
    BackoffPolicy, ExponentialBackoff, FixedBackoff, LinearBackoff, NoBackoff, JITTER_FACTOR,
};
pub use context::{RetryContext, RetryState};
pub use error::{ExhaustionReason, RetryError};
pub use executor::{retry_with_definition, RetryExecutor, RetryExecutorBuilder};
pub use listener::{AttemptEvent, AttemptNotifier, NoOpListener, RetryListener, TracingListener};
pub use policy::{
    MaxAttemptsPolicy, NeverRetryPolicy, PredicatePolicy, RetryPolicy, TypeMatchPolicy,
};
pub use recovery::{
    OperationSignature, RecoveryDescriptor, RecoveryFuture, RecoveryRegistry, TypeHierarchy,
};
pub use statistics::{RetryStatistics, StatisticsSnapshot};
