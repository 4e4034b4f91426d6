//! Per-execution retry state

use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use tokio_util::sync::CancellationToken;

/// Mutable state of a single retry execution
///
/// A context is owned by exactly one execution. `attempt_count` counts
/// registered failures, not raw attempts: it is 0 until the first failure
/// and grows by one per [`register_failure`](Self::register_failure).
#[derive(Debug)]
pub struct RetryContext<E> {
    name: Option<String>,
    attempt_count: u32,
    last_failure: Option<E>,
    attributes: HashMap<String, Value>,
    cancellation: Option<CancellationToken>,
}

impl<E> Default for RetryContext<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryContext<E> {
    /// Create an unnamed context
    pub fn new() -> Self {
        Self {
            name: None,
            attempt_count: 0,
            last_failure: None,
            attributes: HashMap::new(),
            cancellation: None,
        }
    }

    /// Create a context labeled for logging and statistics
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new()
        }
    }

    /// Attach a cancellation token observed at every suspension point
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_failure(&self) -> Option<&E> {
        self.last_failure.as_ref()
    }

    /// Record a failed attempt, replacing the previous failure
    pub fn register_failure(&mut self, failure: E) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_failure = Some(failure);
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub(crate) fn set_default_name(&mut self, name: Option<&str>) {
        if self.name.is_none() {
            self.name = name.map(str::to_string);
        }
    }

    /// Move the last failure out, keeping the attempt count
    pub(crate) fn take_last_failure(&mut self) -> Option<E> {
        self.last_failure.take()
    }
}

/// Read-only, type-erased view of a [`RetryContext`] handed to listeners
pub trait RetryState {
    fn name(&self) -> Option<&str>;

    fn attempt_count(&self) -> u32;

    fn last_failure(&self) -> Option<&(dyn Error + 'static)>;

    fn attribute(&self, key: &str) -> Option<&Value>;
}

impl<E: Error + 'static> RetryState for RetryContext<E> {
    fn name(&self) -> Option<&str> {
        RetryContext::name(self)
    }

    fn attempt_count(&self) -> u32 {
        RetryContext::attempt_count(self)
    }

    fn last_failure(&self) -> Option<&(dyn Error + 'static)> {
        RetryContext::last_failure(self).map(|e| e as &(dyn Error + 'static))
    }

    fn attribute(&self, key: &str) -> Option<&Value> {
        RetryContext::attribute(self, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_new_context_is_empty() {
        let ctx: RetryContext<io::Error> = RetryContext::new();
        assert_eq!(ctx.attempt_count(), 0);
        assert!(ctx.last_failure().is_none());
        assert!(ctx.name().is_none());
        assert!(ctx.cancellation().is_none());
    }

    #[test]
    fn test_register_failure_counts_and_replaces() {
        let mut ctx = RetryContext::named("fetch");

        ctx.register_failure(io::Error::new(io::ErrorKind::TimedOut, "first"));
        ctx.register_failure(io::Error::new(io::ErrorKind::ConnectionReset, "second"));

        assert_eq!(ctx.attempt_count(), 2);
        assert_eq!(ctx.last_failure().unwrap().to_string(), "second");
        assert_eq!(ctx.name(), Some("fetch"));
    }

    #[test]
    fn test_take_last_failure_keeps_count() {
        let mut ctx = RetryContext::new();
        ctx.register_failure("boom".to_string());

        assert_eq!(ctx.take_last_failure(), Some("boom".to_string()));
        assert!(ctx.last_failure().is_none());
        assert_eq!(ctx.attempt_count(), 1);
    }

    #[test]
    fn test_attributes() {
        let mut ctx: RetryContext<io::Error> = RetryContext::new();
        ctx.set_attribute("request-id", "abc-123");
        ctx.set_attribute("shard", 7);

        assert!(ctx.has_attribute("request-id"));
        assert_eq!(ctx.attribute("shard"), Some(&Value::from(7)));
        assert_eq!(ctx.remove_attribute("request-id"), Some(Value::from("abc-123")));
        assert!(!ctx.has_attribute("request-id"));
    }

    #[test]
    fn test_default_name_does_not_override() {
        let mut named: RetryContext<io::Error> = RetryContext::named("explicit");
        named.set_default_name(Some("label"));
        assert_eq!(named.name(), Some("explicit"));

        let mut unnamed: RetryContext<io::Error> = RetryContext::new();
        unnamed.set_default_name(Some("label"));
        assert_eq!(unnamed.name(), Some("label"));
    }

    #[test]
    fn test_state_view_erases_failure_type() {
        let mut ctx = RetryContext::new();
        ctx.register_failure(io::Error::new(io::ErrorKind::TimedOut, "slow"));

        let state: &dyn RetryState = &ctx;
        assert_eq!(state.attempt_count(), 1);
        assert_eq!(state.last_failure().unwrap().to_string(), "slow");
    }
}
