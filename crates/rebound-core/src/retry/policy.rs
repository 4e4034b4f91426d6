//! Retry eligibility policies
//!
//! A [`RetryPolicy`] answers two questions after every failed attempt: is
//! there attempt budget left (`can_retry`), and is this particular failure
//! worth another attempt (`should_retry`).

use std::collections::BTreeSet;

use super::context::RetryContext;
use crate::types::{EmptyInclusion, FailureType, RetryDefinition, TypeTag};

/// Decides whether a failed execution gets another attempt
///
/// Implementations must be pure: the executor may call either method any
/// number of times for the same context.
pub trait RetryPolicy<E>: Send + Sync {
    /// Whether the attempt budget allows another attempt
    fn can_retry(&self, context: &RetryContext<E>) -> bool;

    /// Whether `failure` should be retried
    ///
    /// Implementations check [`can_retry`](Self::can_retry) first and return
    /// false when it does.
    fn should_retry(&self, failure: &E, context: &RetryContext<E>) -> bool;
}

impl<E, P: RetryPolicy<E> + ?Sized> RetryPolicy<E> for Box<P> {
    fn can_retry(&self, context: &RetryContext<E>) -> bool {
        (**self).can_retry(context)
    }

    fn should_retry(&self, failure: &E, context: &RetryContext<E>) -> bool {
        (**self).should_retry(failure, context)
    }
}

impl<E, P: RetryPolicy<E> + ?Sized> RetryPolicy<E> for std::sync::Arc<P> {
    fn can_retry(&self, context: &RetryContext<E>) -> bool {
        (**self).can_retry(context)
    }

    fn should_retry(&self, failure: &E, context: &RetryContext<E>) -> bool {
        (**self).should_retry(failure, context)
    }
}

/// Retries by failure type, within an attempt budget
///
/// Exclusions win over inclusions. An empty inclusion set follows the
/// configured [`EmptyInclusion`].
///
/// # Example
///
/// ```rust
/// use rebound_core::retry::{RetryPolicy, TypeMatchPolicy};
/// use rebound_core::types::RetryDefinition;
/// use rebound_core::RetryContext;
/// use std::io;
///
/// let definition = RetryDefinition::new(3).retry_on("io::TimedOut");
/// let policy = TypeMatchPolicy::from_definition(&definition);
/// let ctx = RetryContext::new();
///
/// assert!(policy.should_retry(&io::Error::from(io::ErrorKind::TimedOut), &ctx));
/// assert!(!policy.should_retry(&io::Error::from(io::ErrorKind::NotFound), &ctx));
/// ```
#[derive(Debug, Clone)]
pub struct TypeMatchPolicy {
    max_attempts: u32,
    retryable: BTreeSet<TypeTag>,
    non_retryable: BTreeSet<TypeTag>,
    empty_inclusion: EmptyInclusion,
}

impl TypeMatchPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            retryable: BTreeSet::new(),
            non_retryable: BTreeSet::new(),
            empty_inclusion: EmptyInclusion::default(),
        }
    }

    /// Snapshot the matching rules of a definition
    pub fn from_definition(definition: &RetryDefinition) -> Self {
        Self {
            max_attempts: definition.max_attempts(),
            retryable: definition.retryable_failure_types().clone(),
            non_retryable: definition.non_retryable_failure_types().clone(),
            empty_inclusion: definition.empty_inclusion(),
        }
    }

    pub fn including(mut self, tag: impl Into<TypeTag>) -> Self {
        self.retryable.insert(tag.into());
        self
    }

    pub fn excluding(mut self, tag: impl Into<TypeTag>) -> Self {
        self.non_retryable.insert(tag.into());
        self
    }

    pub fn with_empty_inclusion(mut self, empty_inclusion: EmptyInclusion) -> Self {
        self.empty_inclusion = empty_inclusion;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn matches_any<F: FailureType + ?Sized>(failure: &F, tags: &BTreeSet<TypeTag>) -> bool {
        failure.lineage().iter().any(|tag| tags.contains(tag))
    }

    /// Type rules alone, ignoring the attempt budget
    pub fn is_retryable<F: FailureType + ?Sized>(&self, failure: &F) -> bool {
        if Self::matches_any(failure, &self.non_retryable) {
            return false;
        }
        if self.retryable.is_empty() {
            return self.empty_inclusion == EmptyInclusion::MatchAll;
        }
        Self::matches_any(failure, &self.retryable)
    }
}

impl<E: FailureType> RetryPolicy<E> for TypeMatchPolicy {
    fn can_retry(&self, context: &RetryContext<E>) -> bool {
        context.attempt_count() < self.max_attempts
    }

    fn should_retry(&self, failure: &E, context: &RetryContext<E>) -> bool {
        self.can_retry(context) && self.is_retryable(failure)
    }
}

/// Treats every failure as retryable until the budget runs out
#[derive(Debug, Clone, Copy)]
pub struct MaxAttemptsPolicy {
    max_attempts: u32,
}

impl MaxAttemptsPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for MaxAttemptsPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl<E> RetryPolicy<E> for MaxAttemptsPolicy {
    fn can_retry(&self, context: &RetryContext<E>) -> bool {
        context.attempt_count() < self.max_attempts
    }

    fn should_retry(&self, _failure: &E, context: &RetryContext<E>) -> bool {
        self.can_retry(context)
    }
}

/// Never retries; the operation runs exactly once
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverRetryPolicy;

impl<E> RetryPolicy<E> for NeverRetryPolicy {
    fn can_retry(&self, _context: &RetryContext<E>) -> bool {
        false
    }

    fn should_retry(&self, _failure: &E, _context: &RetryContext<E>) -> bool {
        false
    }
}

/// Retries failures accepted by a closure, within an attempt budget
///
/// Useful for error types that do not implement [`FailureType`].
pub struct PredicatePolicy<F> {
    max_attempts: u32,
    predicate: F,
}

impl<F> PredicatePolicy<F> {
    pub fn new(max_attempts: u32, predicate: F) -> Self {
        Self {
            max_attempts,
            predicate,
        }
    }
}

impl<E, F> RetryPolicy<E> for PredicatePolicy<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn can_retry(&self, context: &RetryContext<E>) -> bool {
        context.attempt_count() < self.max_attempts
    }

    fn should_retry(&self, failure: &E, context: &RetryContext<E>) -> bool {
        self.can_retry(context) && (self.predicate)(failure)
    }
}
