//! Retry definitions and the per-operation policy table
//!
//! A [`RetryDefinition`] is the immutable description of how one kind of
//! operation is retried. Definitions are usually loaded from YAML by the
//! [`HierarchicalConfigLoader`](crate::config::HierarchicalConfigLoader) or
//! built in code with the `with_*` methods, and are consumed by
//! [`RetryExecutorBuilder::from_definition`](crate::retry::RetryExecutorBuilder::from_definition).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::TypeTag;
use crate::error::{Error, Result};
use crate::retry::{
    BackoffPolicy, ExponentialBackoff, FixedBackoff, LinearBackoff, NoBackoff, RetryListener,
};

/// Retry policy table: a default definition plus per-operation overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPoliciesConfig {
    /// Definition used by operations without an entry in `operations`
    #[serde(default)]
    pub default: RetryDefinition,

    /// Per-operation definitions, keyed by operation name
    #[serde(default)]
    pub operations: HashMap<String, RetryDefinition>,
}

impl Default for RetryPoliciesConfig {
    fn default() -> Self {
        let mut operations = HashMap::new();

        // Downloads back off exponentially and give up after 30s delays
        operations.insert(
            "download".to_string(),
            RetryDefinition::default().with_backoff(BackoffSettings {
                strategy: BackoffStrategy::ExponentialBackoff,
                initial_delay_ms: 1000,
                multiplier: 2.0,
                max_delay_ms: 30000,
                jitter: true,
            }),
        );

        Self {
            default: RetryDefinition::default(),
            operations,
        }
    }
}

impl RetryPoliciesConfig {
    /// Resolve the definition for an operation
    ///
    /// Returns the operation's own definition when one exists, otherwise the
    /// default. An unlabeled result is labeled with the operation name.
    pub fn for_operation(&self, operation: &str) -> RetryDefinition {
        let definition = self
            .operations
            .get(operation)
            .unwrap_or(&self.default)
            .clone();

        if definition.label().is_some() {
            definition
        } else {
            definition.with_label(operation)
        }
    }

    /// Validate the default and every per-operation definition
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for (name, definition) in &self.operations {
            definition
                .validate()
                .map_err(|e| Error::invalid_config(format!("operation '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

/// How an empty retryable-failure set is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyInclusion {
    /// Every failure not excluded is retryable (default)
    #[default]
    MatchAll,

    /// No failure is retryable
    MatchNone,
}

/// Immutable description of how an operation is retried
///
/// Fields are only set through the consuming `with_*` methods, so a
/// definition shared by reference can never change under an in-flight
/// execution.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryDefinition {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,

    /// Failure kinds that may be retried
    #[serde(default)]
    retryable_failure_types: BTreeSet<TypeTag>,

    /// Failure kinds that are never retried; wins over `retryable_failure_types`
    #[serde(default)]
    non_retryable_failure_types: BTreeSet<TypeTag>,

    /// Meaning of an empty `retryable_failure_types`
    #[serde(default)]
    empty_inclusion: EmptyInclusion,

    /// Delay computation between attempts
    #[serde(default)]
    backoff: BackoffSettings,

    /// Operation label, used for logging, statistics and recovery matching
    #[serde(default)]
    label: Option<String>,

    /// Upper bound for a single attempt
    #[serde(default)]
    attempt_timeout_ms: Option<u64>,

    #[serde(skip)]
    listeners: Vec<Arc<dyn RetryListener>>,
}

impl Default for RetryDefinition {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retryable_failure_types: BTreeSet::new(),
            non_retryable_failure_types: BTreeSet::new(),
            empty_inclusion: EmptyInclusion::default(),
            backoff: BackoffSettings::default(),
            label: None,
            attempt_timeout_ms: None,
            listeners: Vec::new(),
        }
    }
}

impl fmt::Debug for RetryDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryDefinition")
            .field("max_attempts", &self.max_attempts)
            .field("retryable_failure_types", &self.retryable_failure_types)
            .field("non_retryable_failure_types", &self.non_retryable_failure_types)
            .field("empty_inclusion", &self.empty_inclusion)
            .field("backoff", &self.backoff)
            .field("label", &self.label)
            .field("attempt_timeout_ms", &self.attempt_timeout_ms)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl RetryDefinition {
    /// Create a definition with the given attempt budget and default settings
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Add a retryable failure kind
    pub fn retry_on(mut self, tag: impl Into<TypeTag>) -> Self {
        self.retryable_failure_types.insert(tag.into());
        self
    }

    /// Add a failure kind that is never retried
    pub fn never_retry_on(mut self, tag: impl Into<TypeTag>) -> Self {
        self.non_retryable_failure_types.insert(tag.into());
        self
    }

    pub fn with_empty_inclusion(mut self, empty_inclusion: EmptyInclusion) -> Self {
        self.empty_inclusion = empty_inclusion;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffSettings) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Append a listener; listeners are notified in the order they were added
    pub fn with_listener(mut self, listener: impl RetryListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Append an already shared listener
    pub fn with_shared_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn retryable_failure_types(&self) -> &BTreeSet<TypeTag> {
        &self.retryable_failure_types
    }

    pub fn non_retryable_failure_types(&self) -> &BTreeSet<TypeTag> {
        &self.non_retryable_failure_types
    }

    pub fn empty_inclusion(&self) -> EmptyInclusion {
        self.empty_inclusion
    }

    pub fn backoff(&self) -> &BackoffSettings {
        &self.backoff
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout_ms.map(Duration::from_millis)
    }

    pub fn listeners(&self) -> &[Arc<dyn RetryListener>] {
        &self.listeners
    }

    /// Check the definition for values the executor cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::invalid_config("max-attempts must be at least 1"));
        }
        if let Some(tag) = self
            .retryable_failure_types
            .intersection(&self.non_retryable_failure_types)
            .next()
        {
            return Err(Error::invalid_config(format!(
                "failure type '{}' is both retryable and non-retryable",
                tag
            )));
        }
        self.backoff.validate()
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Backoff strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackoffStrategy {
    /// Retry immediately
    None,

    /// Constant `initial-delay-ms` between attempts
    FixedDelay,

    /// `initial-delay-ms * multiplier^(n-1)` (default)
    #[default]
    ExponentialBackoff,

    /// `initial-delay-ms * n`
    LinearBackoff,
}

/// Backoff parameters of a [`RetryDefinition`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BackoffSettings {
    #[serde(default)]
    pub strategy: BackoffStrategy,

    /// Initial (or fixed) delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Growth factor for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Cap applied to every computed delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Randomize exponential delays by up to 25% either way
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::default(),
            initial_delay_ms: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl BackoffSettings {
    /// Build the backoff policy these settings describe
    pub fn build(&self) -> Box<dyn BackoffPolicy> {
        let initial = Duration::from_millis(self.initial_delay_ms);
        let max = Duration::from_millis(self.max_delay_ms);

        match self.strategy {
            BackoffStrategy::None => Box::new(NoBackoff),
            BackoffStrategy::FixedDelay => Box::new(FixedBackoff::new(initial)),
            BackoffStrategy::ExponentialBackoff => Box::new(
                ExponentialBackoff::new(initial, self.multiplier, max).with_jitter(self.jitter),
            ),
            BackoffStrategy::LinearBackoff => Box::new(LinearBackoff::new(initial, max)),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier <= 0.0 {
            return Err(Error::invalid_config(format!(
                "multiplier must be a positive number, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "initial-delay-ms ({}) exceeds max-delay-ms ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

fn default_initial_delay() -> u64 {
    1000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_delay() -> u64 {
    30000
}
fn default_jitter() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::NoOpListener;

    #[test]
    fn test_default_definition() {
        let definition = RetryDefinition::default();
        assert_eq!(definition.max_attempts(), 3);
        assert_eq!(definition.empty_inclusion(), EmptyInclusion::MatchAll);
        assert_eq!(
            definition.backoff().strategy,
            BackoffStrategy::ExponentialBackoff
        );
        assert_eq!(definition.backoff().multiplier, 2.0);
        assert!(definition.label().is_none());
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_builder_methods_accumulate() {
        let definition = RetryDefinition::new(5)
            .retry_on("NetworkError")
            .retry_on("TimeoutError")
            .never_retry_on("ValidationError")
            .with_label("fetch")
            .with_listener(NoOpListener)
            .with_attempt_timeout(Duration::from_millis(250));

        assert_eq!(definition.max_attempts(), 5);
        assert_eq!(definition.retryable_failure_types().len(), 2);
        assert!(definition
            .non_retryable_failure_types()
            .contains(&TypeTag::from_static("ValidationError")));
        assert_eq!(definition.label(), Some("fetch"));
        assert_eq!(definition.listeners().len(), 1);
        assert_eq!(definition.attempt_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_yaml_definition() {
        let yaml = r#"
max-attempts: 4
retryable-failure-types: [NetworkError]
non-retryable-failure-types: [ValidationError]
empty-inclusion: match-none
label: checkout
backoff:
  strategy: fixed-delay
  initial-delay-ms: 250
"#;
        let definition: RetryDefinition = serde_yaml_ng::from_str(yaml).unwrap();

        assert_eq!(definition.max_attempts(), 4);
        assert_eq!(definition.empty_inclusion(), EmptyInclusion::MatchNone);
        assert_eq!(definition.label(), Some("checkout"));
        assert_eq!(definition.backoff().strategy, BackoffStrategy::FixedDelay);
        assert_eq!(definition.backoff().initial_delay_ms, 250);
        assert_eq!(definition.backoff().max_delay_ms, 30000);
        assert!(definition.listeners().is_empty());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RetryDefinition::new(0).validate().is_err());

        let overlapping = RetryDefinition::default()
            .retry_on("NetworkError")
            .never_retry_on("NetworkError");
        assert!(overlapping.validate().is_err());

        let bad_multiplier = RetryDefinition::default().with_backoff(BackoffSettings {
            multiplier: f64::NAN,
            ..BackoffSettings::default()
        });
        assert!(bad_multiplier.validate().is_err());

        let inverted = RetryDefinition::default().with_backoff(BackoffSettings {
            initial_delay_ms: 5000,
            max_delay_ms: 1000,
            ..BackoffSettings::default()
        });
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_for_operation_falls_back_to_default() {
        let config = RetryPoliciesConfig::default();

        let download = config.for_operation("download");
        assert_eq!(download.label(), Some("download"));
        assert!(download.backoff().jitter);

        let other = config.for_operation("upload");
        assert_eq!(other.label(), Some("upload"));
        assert_eq!(other.max_attempts(), config.default.max_attempts());
    }

    #[test]
    fn test_for_operation_keeps_explicit_label() {
        let mut config = RetryPoliciesConfig::default();
        config.operations.insert(
            "charge".to_string(),
            RetryDefinition::new(2).with_label("payments"),
        );

        assert_eq!(config.for_operation("charge").label(), Some("payments"));
    }
}
