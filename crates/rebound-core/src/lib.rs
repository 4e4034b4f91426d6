//! # rebound-core
//!
//! Retry execution engine providing:
//! - Policy-driven retry loops with fixed, exponential and linear backoff
//! - Lifecycle listeners and shared, thread-safe retry statistics
//! - Recovery handlers selected from an ordered registry
//! - Retry definitions loaded from embedded defaults, YAML and environment

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use retry::{
    retry_with_definition, RetryContext, RetryError, RetryExecutor, RetryExecutorBuilder,
};
pub use types::{RetryDefinition, RetryPoliciesConfig};
