//! Configuration loading and management

mod hierarchical_loader;

pub use hierarchical_loader::{
    HierarchicalConfigLoader, ENV_ATTEMPT_TIMEOUT_MS, ENV_BACKOFF_MULTIPLIER,
    ENV_INITIAL_DELAY_MS, ENV_JITTER, ENV_MAX_ATTEMPTS, ENV_MAX_DELAY_MS,
};
