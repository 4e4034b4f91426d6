//! Retry execution engine
//!
//! This module provides the core retry loop: it drives attempts, consults the
//! policy and backoff, notifies listeners, updates statistics and dispatches
//! recovery once attempts are exhausted.

use std::error::Error;
use std::fmt;
use std::future::{self, Future};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::types::{BackoffSettings, FailureType, RetryDefinition};

use super::backoff::BackoffPolicy;
use super::context::{RetryContext, RetryState};
use super::error::{ExhaustionReason, RetryError};
use super::listener::{AttemptEvent, AttemptNotifier, RetryListener};
use super::policy::{MaxAttemptsPolicy, RetryPolicy, TypeMatchPolicy};
use super::recovery::{OperationSignature, RecoveryRegistry};
use super::statistics::RetryStatistics;

/// Execute an async operation with the retry behaviour of a definition
///
/// This is a convenience function for simple retry scenarios. For listeners,
/// shared statistics or recovery, use [`RetryExecutorBuilder`].
///
/// # Example
///
/// ```rust,no_run
/// use rebound_core::retry::retry_with_definition;
/// use rebound_core::types::RetryDefinition;
///
/// async fn example() {
///     let definition = RetryDefinition::new(3).retry_on("io::TimedOut");
///
///     let result = retry_with_definition(&definition, |_ctx| async {
///         Ok::<_, std::io::Error>("success")
///     })
///     .await;
/// }
/// ```
pub async fn retry_with_definition<F, Fut, T, E>(
    definition: &RetryDefinition,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(&RetryContext<E>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Error + FailureType + 'static,
{
    RetryExecutorBuilder::from_definition(definition)
        .build()
        .execute(operation)
        .await
}

/// Builder for configuring a [`RetryExecutor`]
///
/// # Example
///
/// ```rust
/// use rebound_core::retry::{
///     FixedBackoff, MaxAttemptsPolicy, RetryExecutorBuilder, TracingListener,
/// };
/// use std::time::Duration;
///
/// let executor = RetryExecutorBuilder::<std::io::Error>::new()
///     .with_policy(MaxAttemptsPolicy::new(5))
///     .with_backoff(FixedBackoff::new(Duration::from_millis(200)))
///     .with_listener(TracingListener::new("download"))
///     .with_label("download")
///     .build();
///
/// assert_eq!(executor.label(), Some("download"));
/// ```
pub struct RetryExecutorBuilder<E> {
    policy: Box<dyn RetryPolicy<E>>,
    backoff: Box<dyn BackoffPolicy>,
    listeners: Vec<Arc<dyn RetryListener>>,
    statistics: Option<Arc<RetryStatistics>>,
    notifier: Option<Arc<dyn AttemptNotifier>>,
    attempt_timeout: Option<Duration>,
    label: Option<String>,
}

impl<E> Default for RetryExecutorBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryExecutorBuilder<E> {
    /// Create a builder with default settings
    ///
    /// Defaults: three attempts, every failure retryable, and the default
    /// exponential backoff with jitter.
    pub fn new() -> Self {
        Self {
            policy: Box::new(MaxAttemptsPolicy::default()),
            backoff: BackoffSettings::default().build(),
            listeners: Vec::new(),
            statistics: None,
            notifier: None,
            attempt_timeout: None,
            label: None,
        }
    }

    /// Set the retry policy
    pub fn with_policy(mut self, policy: impl RetryPolicy<E> + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Set the backoff policy
    pub fn with_backoff(mut self, backoff: impl BackoffPolicy + 'static) -> Self {
        self.backoff = Box::new(backoff);
        self
    }

    /// Append a listener; listeners are notified in the order they were added
    pub fn with_listener(mut self, listener: impl RetryListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Append a listener shared with other executors
    pub fn with_shared_listener(mut self, listener: Arc<dyn RetryListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Record outcomes into a statistics sink, possibly shared
    pub fn with_statistics(mut self, statistics: Arc<RetryStatistics>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Notify a sink before every attempt
    pub fn with_notifier(mut self, notifier: impl AttemptNotifier + 'static) -> Self {
        self.notifier = Some(Arc::new(notifier));
        self
    }

    /// Bound the duration of each individual attempt
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Label the operation for logging, statistics and error reporting
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Build the executor
    pub fn build(self) -> RetryExecutor<E> {
        let statistics = self.statistics.unwrap_or_else(|| {
            Arc::new(match &self.label {
                Some(label) => RetryStatistics::named(label.clone()),
                None => RetryStatistics::new(),
            })
        });

        RetryExecutor {
            policy: self.policy,
            backoff: self.backoff,
            listeners: self.listeners,
            statistics,
            notifier: self.notifier,
            attempt_timeout: self.attempt_timeout,
            label: self.label,
        }
    }
}

impl<E: FailureType + 'static> RetryExecutorBuilder<E> {
    /// Create a builder carrying everything a definition describes
    ///
    /// The definition is snapshotted: later changes to other definitions
    /// derived from the same source never reach this executor.
    pub fn from_definition(definition: &RetryDefinition) -> Self {
        Self {
            policy: Box::new(TypeMatchPolicy::from_definition(definition)),
            backoff: definition.backoff().build(),
            listeners: definition.listeners().to_vec(),
            statistics: None,
            notifier: None,
            attempt_timeout: definition.attempt_timeout(),
            label: definition.label().map(str::to_string),
        }
    }
}

/// A retry executor with configurable policy, backoff, listeners and statistics
///
/// Use [`RetryExecutorBuilder`] to create an instance. One executor may run
/// any number of concurrent executions; each execution owns its own
/// [`RetryContext`].
pub struct RetryExecutor<E> {
    policy: Box<dyn RetryPolicy<E>>,
    backoff: Box<dyn BackoffPolicy>,
    listeners: Vec<Arc<dyn RetryListener>>,
    statistics: Arc<RetryStatistics>,
    notifier: Option<Arc<dyn AttemptNotifier>>,
    attempt_timeout: Option<Duration>,
    label: Option<String>,
}

impl<E> fmt::Debug for RetryExecutor<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("label", &self.label)
            .field("listeners", &self.listeners.len())
            .field("attempt_timeout", &self.attempt_timeout)
            .field("statistics", &self.statistics.snapshot())
            .finish_non_exhaustive()
    }
}

impl<E> RetryExecutor<E> {
    pub fn builder() -> RetryExecutorBuilder<E> {
        RetryExecutorBuilder::new()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The statistics sink this executor records into
    pub fn statistics(&self) -> &Arc<RetryStatistics> {
        &self.statistics
    }
}

impl<E: Error + 'static> RetryExecutor<E> {
    /// Execute an operation with retry logic and a fresh context
    ///
    /// The operation receives the context before each attempt. The future it
    /// returns must not borrow the context.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut context = RetryContext::new();
        self.execute_with_context(operation, &mut context).await
    }

    /// Execute an operation with a caller-owned context
    ///
    /// The context remains readable after the call, e.g. to inspect the
    /// number of registered failures.
    pub async fn execute_with_context<F, Fut, T>(
        &self,
        operation: F,
        context: &mut RetryContext<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(
            operation,
            |_: &RetryContext<E>| None::<future::Ready<Result<T, E>>>,
            context,
        )
        .await
    }

    /// Execute an operation, falling back to `recovery` once exhausted
    ///
    /// `recovery` is invoked at most once, with the context holding the last
    /// failure and the attempt count.
    pub async fn execute_with_recovery<F, Fut, R, RFut, T>(
        &self,
        operation: F,
        recovery: R,
        context: &mut RetryContext<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> RFut,
        RFut: Future<Output = Result<T, E>>,
    {
        self.run(operation, |ctx| Some(recovery(ctx)), context).await
    }

    /// Execute an operation, falling back to the registry's matching handler
    ///
    /// The handler is resolved against `signature` and the last failure; the
    /// original `args` are passed to it. An unlabeled signature takes the
    /// executor's label. Without a match the execution ends with
    /// [`RetryError::Exhausted`].
    pub async fn execute_with_registry<F, Fut, A, T>(
        &self,
        operation: F,
        args: &A,
        registry: &RecoveryRegistry<A, T, E>,
        signature: &OperationSignature,
        context: &mut RetryContext<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: FailureType,
    {
        let labeled;
        let signature = match (signature.label(), self.label.as_deref()) {
            (None, Some(label)) => {
                labeled = signature.clone().with_label(label);
                &labeled
            }
            _ => signature,
        };

        self.run(
            operation,
            |ctx: &RetryContext<E>| {
                let failure = ctx.last_failure()?;
                registry
                    .resolve(signature, failure)
                    .map(|descriptor| descriptor.invoke(failure, args))
            },
            context,
        )
        .await
    }

    async fn run<F, Fut, R, RFut, T>(
        &self,
        mut operation: F,
        recover: R,
        context: &mut RetryContext<E>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(&RetryContext<E>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnOnce(&RetryContext<E>) -> Option<RFut>,
        RFut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        context.set_default_name(self.label.as_deref());
        let cancellation = context.cancellation().cloned();

        self.statistics.increment_started();
        let mut execution = Execution::open(context, &self.listeners);

        let reason = loop {
            let failures = execution.context().attempt_count();
            if failures > 0 {
                execution.retrying();

                let delay = self.backoff.compute_backoff(failures);
                if !delay.is_zero() {
                    tracing::debug!(
                        operation = ?execution.context().name(),
                        failures = failures,
                        delay_ms = delay.as_millis() as u64,
                        "backing off before retry"
                    );
                    if suspend(tokio::time::sleep(delay), cancellation.as_ref())
                        .await
                        .is_none()
                    {
                        return Err(execution.cancel());
                    }
                }
            }

            if cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
                return Err(execution.cancel());
            }

            let attempt = failures + 1;
            execution.transition(ExecutionState::Attempting);
            if let Some(notifier) = &self.notifier {
                notifier.attempt_starting(AttemptEvent {
                    label: execution.context().name().map(str::to_string),
                    attempt,
                });
            }

            let pending = operation(execution.context());
            let outcome = match self.attempt_timeout {
                Some(timeout) => {
                    match suspend(tokio::time::timeout(timeout, pending), cancellation.as_ref())
                        .await
                    {
                        Some(Ok(outcome)) => outcome,
                        Some(Err(_elapsed)) => return Err(execution.time_out(attempt, timeout)),
                        None => return Err(execution.cancel()),
                    }
                }
                None => match suspend(pending, cancellation.as_ref()).await {
                    Some(outcome) => outcome,
                    None => return Err(execution.cancel()),
                },
            };

            match outcome {
                Ok(value) => {
                    execution.transition(ExecutionState::Succeeded);
                    self.statistics.increment_success();
                    execution.close(false);
                    return Ok(value);
                }
                Err(failure) => {
                    execution.record_failure(failure);

                    let context = execution.context();
                    let Some(failure) = context.last_failure() else {
                        break ExhaustionReason::AttemptsExhausted;
                    };

                    tracing::debug!(
                        operation = ?context.name(),
                        attempt = attempt,
                        error = %failure,
                        "attempt failed"
                    );

                    if !self.policy.should_retry(failure, context) {
                        break if self.policy.can_retry(context) {
                            ExhaustionReason::NonRetryable
                        } else {
                            ExhaustionReason::AttemptsExhausted
                        };
                    }
                    if !self.policy.can_retry(context) {
                        break ExhaustionReason::AttemptsExhausted;
                    }
                }
            }
        };

        execution.transition(ExecutionState::Exhausted);
        self.statistics.increment_exhausted();
        let attempts = execution.context().attempt_count();

        match recover(execution.context()) {
            Some(recovery) => {
                self.statistics.increment_recovered();
                tracing::debug!(
                    operation = ?execution.context().name(),
                    attempts = attempts,
                    reason = %reason,
                    "invoking recovery"
                );

                let result = recovery.await;
                execution.close(true);
                result.map_err(|err| RetryError::recovery_failed(attempts, err))
            }
            None => {
                tracing::debug!(
                    operation = ?execution.context().name(),
                    attempts = attempts,
                    reason = %reason,
                    "retry exhausted without recovery"
                );

                execution.close(true);
                let label = execution.context().name().map(str::to_string);
                match execution.take_last_failure() {
                    Some(source) => Err(RetryError::exhausted(
                        attempts,
                        source,
                        start.elapsed(),
                        label,
                        reason,
                    )),
                    None => Err(RetryError::cancelled(attempts, None)),
                }
            }
        }
    }
}

/// Race a future against an optional cancellation token
///
/// A future that is already complete wins over a fired token, so a finished
/// attempt is never discarded.
async fn suspend<F: Future>(
    future: F,
    cancellation: Option<&CancellationToken>,
) -> Option<F::Output> {
    match cancellation {
        Some(token) => tokio::select! {
            biased;
            output = future => Some(output),
            _ = token.cancelled() => None,
        },
        None => Some(future.await),
    }
}

/// Lifecycle states of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecutionState {
    Open,
    Attempting,
    Succeeded,
    Failed,
    Retrying,
    Exhausted,
    Closed,
}

/// One in-flight execution
///
/// Owns the listener protocol: `on_open` when created, `on_close` exactly
/// once, either explicitly or on drop when the execution future is abandoned
/// or unwinds.
struct Execution<'a, E: Error + 'static> {
    context: &'a mut RetryContext<E>,
    listeners: &'a [Arc<dyn RetryListener>],
    state: ExecutionState,
}

impl<'a, E: Error + 'static> Execution<'a, E> {
    fn open(context: &'a mut RetryContext<E>, listeners: &'a [Arc<dyn RetryListener>]) -> Self {
        for listener in listeners {
            listener.on_open(&*context);
        }
        tracing::trace!(operation = ?context.name(), "retry execution opened");

        Self {
            context,
            listeners,
            state: ExecutionState::Open,
        }
    }

    fn context(&self) -> &RetryContext<E> {
        &*self.context
    }

    fn transition(&mut self, next: ExecutionState) {
        tracing::trace!(from = ?self.state, to = ?next, "retry state transition");
        self.state = next;
    }

    fn retrying(&mut self) {
        self.transition(ExecutionState::Retrying);
        for listener in self.listeners {
            listener.on_retry(&*self.context);
        }
    }

    fn record_failure(&mut self, failure: E) {
        self.transition(ExecutionState::Failed);
        self.context.register_failure(failure);

        let context: &RetryContext<E> = &*self.context;
        if let Some(failure) = context.last_failure() {
            for listener in self.listeners {
                listener.on_error(context, failure);
            }
        }
    }

    fn take_last_failure(&mut self) -> Option<E> {
        self.context.take_last_failure()
    }

    fn close(&mut self, with_failure: bool) {
        if self.state == ExecutionState::Closed {
            return;
        }
        self.transition(ExecutionState::Closed);

        let state: &dyn RetryState = &*self.context;
        let failure = if with_failure { state.last_failure() } else { None };
        for listener in self.listeners {
            listener.on_close(state, failure);
        }
    }

    fn cancel(&mut self) -> RetryError<E> {
        tracing::debug!(
            operation = ?self.context.name(),
            failures = self.context.attempt_count(),
            "retry execution cancelled"
        );
        self.close(true);
        RetryError::cancelled(self.context.attempt_count(), self.take_last_failure())
    }

    fn time_out(&mut self, attempt: u32, timeout: Duration) -> RetryError<E> {
        tracing::debug!(
            operation = ?self.context.name(),
            attempt = attempt,
            timeout_ms = timeout.as_millis() as u64,
            "attempt timed out"
        );
        self.close(true);
        RetryError::attempt_timeout(attempt, timeout)
    }
}

impl<E: Error + 'static> Drop for Execution<'_, E> {
    fn drop(&mut self) {
        if self.state != ExecutionState::Closed {
            tracing::debug!(
                operation = ?self.context.name(),
                state = ?self.state,
                "retry execution abandoned"
            );
            self.close(true);
        }
    }
}
