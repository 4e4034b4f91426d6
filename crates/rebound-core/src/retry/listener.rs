//! Retry lifecycle observation
//!
//! Listeners see every execution from the outside. They receive a read-only
//! [`RetryState`] and return nothing, so they cannot steer the retry loop.
//! Listeners shared between concurrent executions must be thread-safe; the
//! `Send + Sync` bound enforces that.

use serde::Serialize;
use std::error::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::context::RetryState;

/// Observer of the retry lifecycle
///
/// For every execution the executor calls `on_open` exactly once before
/// anything else and `on_close` exactly once after everything else. In
/// between, `on_error` follows every failed attempt and `on_retry` precedes
/// every attempt after the first.
///
/// # Example
///
/// ```rust
/// use rebound_core::retry::{RetryListener, RetryState};
/// use std::error::Error;
///
/// struct AlertOnExhaustion;
///
/// impl RetryListener for AlertOnExhaustion {
///     fn on_error(&self, _state: &dyn RetryState, _error: &dyn Error) {}
///
///     fn on_close(&self, state: &dyn RetryState, error: Option<&dyn Error>) {
///         if let Some(err) = error {
///             eprintln!("gave up after {} failures: {}", state.attempt_count(), err);
///         }
///     }
/// }
/// ```
pub trait RetryListener: Send + Sync {
    /// Called once when an execution starts
    fn on_open(&self, state: &dyn RetryState) {
        let _ = state;
    }

    /// Called before each attempt after the first, ahead of the backoff wait
    fn on_retry(&self, state: &dyn RetryState) {
        let _ = state;
    }

    /// Called after every failed attempt, once the failure is registered
    fn on_error(&self, state: &dyn RetryState, error: &dyn Error);

    /// Called once when an execution ends, with the last failure if any
    fn on_close(&self, state: &dyn RetryState, error: Option<&dyn Error>);
}

/// A listener that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl RetryListener for NoOpListener {
    fn on_error(&self, _state: &dyn RetryState, _error: &dyn Error) {}

    fn on_close(&self, _state: &dyn RetryState, _error: Option<&dyn Error>) {}
}

/// A listener that logs lifecycle events using the `tracing` crate
///
/// # Log Levels
///
/// - `on_open`, `on_retry`: DEBUG
/// - `on_error`: WARN
/// - `on_close`: ERROR with a failure, INFO after retries, DEBUG otherwise
#[derive(Debug, Clone)]
pub struct TracingListener {
    /// Fallback operation name when the context carries none
    operation: String,
}

impl TracingListener {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    fn operation_for<'a>(&'a self, state: &'a dyn RetryState) -> &'a str {
        state.name().unwrap_or(&self.operation)
    }
}

impl Default for TracingListener {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl RetryListener for TracingListener {
    fn on_open(&self, state: &dyn RetryState) {
        tracing::debug!(operation = %self.operation_for(state), "retry execution opened");
    }

    fn on_retry(&self, state: &dyn RetryState) {
        tracing::debug!(
            operation = %self.operation_for(state),
            attempt = state.attempt_count() + 1,
            "retrying"
        );
    }

    fn on_error(&self, state: &dyn RetryState, error: &dyn Error) {
        tracing::warn!(
            operation = %self.operation_for(state),
            failures = state.attempt_count(),
            error = %error,
            "attempt failed"
        );
    }

    fn on_close(&self, state: &dyn RetryState, error: Option<&dyn Error>) {
        let operation = self.operation_for(state);
        match error {
            Some(err) => tracing::error!(
                operation = %operation,
                failures = state.attempt_count(),
                error = %err,
                "retry execution closed with failure"
            ),
            None if state.attempt_count() > 0 => tracing::info!(
                operation = %operation,
                failures = state.attempt_count(),
                "succeeded after retry"
            ),
            None => tracing::debug!(operation = %operation, "succeeded on first attempt"),
        }
    }
}

impl<T: RetryListener + ?Sized> RetryListener for std::sync::Arc<T> {
    fn on_open(&self, state: &dyn RetryState) {
        (**self).on_open(state)
    }

    fn on_retry(&self, state: &dyn RetryState) {
        (**self).on_retry(state)
    }

    fn on_error(&self, state: &dyn RetryState, error: &dyn Error) {
        (**self).on_error(state, error)
    }

    fn on_close(&self, state: &dyn RetryState, error: Option<&dyn Error>) {
        (**self).on_close(state, error)
    }
}

impl<T: RetryListener + ?Sized> RetryListener for Box<T> {
    fn on_open(&self, state: &dyn RetryState) {
        (**self).on_open(state)
    }

    fn on_retry(&self, state: &dyn RetryState) {
        (**self).on_retry(state)
    }

    fn on_error(&self, state: &dyn RetryState, error: &dyn Error) {
        (**self).on_error(state, error)
    }

    fn on_close(&self, state: &dyn RetryState, error: Option<&dyn Error>) {
        (**self).on_close(state, error)
    }
}

/// "Attempt about to occur" notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AttemptEvent {
    /// Operation label, if the executor has one
    pub label: Option<String>,
    /// 1-indexed attempt number
    pub attempt: u32,
}

/// Sink receiving one [`AttemptEvent`] per attempt
///
/// Delivery is best effort; a sink must not block or fail the execution.
pub trait AttemptNotifier: Send + Sync {
    fn attempt_starting(&self, event: AttemptEvent);
}

impl AttemptNotifier for UnboundedSender<AttemptEvent> {
    fn attempt_starting(&self, event: AttemptEvent) {
        // A closed receiver only means nobody is listening anymore
        let _ = self.send(event);
    }
}

impl<T: AttemptNotifier + ?Sized> AttemptNotifier for std::sync::Arc<T> {
    fn attempt_starting(&self, event: AttemptEvent) {
        (**self).attempt_starting(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryContext;
    use std::io;

    #[test]
    fn test_noop_listener() {
        let mut ctx = RetryContext::new();
        ctx.register_failure(io::Error::other("test"));
        let error = io::Error::other("test");

        NoOpListener.on_open(&ctx);
        NoOpListener.on_retry(&ctx);
        NoOpListener.on_error(&ctx, &error);
        NoOpListener.on_close(&ctx, Some(&error));
        NoOpListener.on_close(&ctx, None);
    }

    #[test]
    fn test_tracing_listener_prefers_context_name() {
        let listener = TracingListener::new("fallback");
        let named: RetryContext<io::Error> = RetryContext::named("fetch");
        let unnamed: RetryContext<io::Error> = RetryContext::new();

        assert_eq!(listener.operation_for(&named), "fetch");
        assert_eq!(listener.operation_for(&unnamed), "fallback");
        assert_eq!(TracingListener::default().operation(), "retry");
    }

    #[test]
    fn test_unbounded_sender_notifier() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        tx.attempt_starting(AttemptEvent {
            label: Some("fetch".to_string()),
            attempt: 1,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.attempt, 1);
        assert_eq!(event.label.as_deref(), Some("fetch"));
    }

    #[test]
    fn test_notifier_ignores_closed_receiver() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);

        tx.attempt_starting(AttemptEvent {
            label: None,
            attempt: 2,
        });
    }
}
