//! Type definitions for retry configuration and failure classification

mod failure_types;
mod runtime_config;

pub use failure_types::*;
pub use runtime_config::*;
