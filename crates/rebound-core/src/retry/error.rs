//! Error types for the retry execution engine
//!
//! Only terminal outcomes cross the executor boundary: intermediate attempt
//! failures are visible to listeners, never to the caller.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Why an execution stopped retrying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionReason {
    /// The attempt budget was used up
    AttemptsExhausted,
    /// The policy rejected the failure before the budget ran out
    NonRetryable,
}

impl fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExhaustionReason::AttemptsExhausted => f.write_str("attempts exhausted"),
            ExhaustionReason::NonRetryable => f.write_str("non-retryable failure"),
        }
    }
}

/// Errors that can end a retry execution
///
/// The error type is generic over `E`, the underlying error type from the
/// operation being retried.
#[derive(Debug)]
pub enum RetryError<E> {
    /// No further attempt was permitted and no recovery applied
    Exhausted {
        /// Failed attempts registered in the context
        attempts: u32,
        /// The error from the final attempt
        source: E,
        /// Total duration spent across all attempts
        total_duration: Duration,
        /// Operation label, if any
        label: Option<String>,
        reason: ExhaustionReason,
    },

    /// The recovery handler itself failed
    RecoveryFailed {
        /// Failed attempts before recovery ran
        attempts: u32,
        /// The recovery handler's error
        source: E,
    },

    /// The execution's cancellation token fired
    Cancelled {
        /// Failed attempts before cancellation
        attempts: u32,
        /// The last error that occurred, if any
        last_error: Option<E>,
    },

    /// An individual attempt exceeded the per-attempt timeout
    AttemptTimeout {
        /// Which attempt timed out (1-indexed)
        attempt: u32,
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted {
                attempts,
                source,
                total_duration,
                label,
                reason,
            } => {
                if let Some(label) = label {
                    write!(f, "{}: ", label)?;
                }
                write!(
                    f,
                    "retry exhausted ({}) after {} attempts over {:.2}s: {}",
                    reason,
                    attempts,
                    total_duration.as_secs_f64(),
                    source
                )
            }
            RetryError::RecoveryFailed { attempts, source } => {
                write!(f, "recovery failed after {} attempts: {}", attempts, source)
            }
            RetryError::Cancelled {
                attempts,
                last_error,
            } => {
                if let Some(err) = last_error {
                    write!(f, "retry cancelled after {} attempts: {}", attempts, err)
                } else {
                    write!(f, "retry cancelled after {} attempts", attempts)
                }
            }
            RetryError::AttemptTimeout { attempt, timeout } => {
                write!(
                    f,
                    "attempt {} timed out after {}ms",
                    attempt,
                    timeout.as_millis()
                )
            }
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::RecoveryFailed { source, .. } => Some(source),
            RetryError::Cancelled {
                last_error: Some(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

impl<E> RetryError<E> {
    /// Create a new exhausted error
    pub fn exhausted(
        attempts: u32,
        source: E,
        total_duration: Duration,
        label: Option<String>,
        reason: ExhaustionReason,
    ) -> Self {
        RetryError::Exhausted {
            attempts,
            source,
            total_duration,
            label,
            reason,
        }
    }

    /// Create a new recovery failure error
    pub fn recovery_failed(attempts: u32, source: E) -> Self {
        RetryError::RecoveryFailed { attempts, source }
    }

    /// Create a new cancelled error
    pub fn cancelled(attempts: u32, last_error: Option<E>) -> Self {
        RetryError::Cancelled {
            attempts,
            last_error,
        }
    }

    /// Create a new attempt timeout error
    pub fn attempt_timeout(attempt: u32, timeout: Duration) -> Self {
        RetryError::AttemptTimeout { attempt, timeout }
    }

    /// Get the number of failed attempts registered before this error
    ///
    /// Always equals the context's `attempt_count()`. A timed-out attempt is
    /// not registered as a failure, so for [`RetryError::AttemptTimeout`]
    /// this is one less than its 1-based `attempt` number.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::RecoveryFailed { attempts, .. } => *attempts,
            RetryError::Cancelled { attempts, .. } => *attempts,
            RetryError::AttemptTimeout { attempt, .. } => attempt.saturating_sub(1),
        }
    }

    /// Check if this error indicates all retries were exhausted
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// Check if the execution stopped on a non-retryable failure
    pub fn is_non_retryable(&self) -> bool {
        matches!(
            self,
            RetryError::Exhausted {
                reason: ExhaustionReason::NonRetryable,
                ..
            }
        )
    }

    /// Check if the recovery handler failed
    pub fn is_recovery_failure(&self) -> bool {
        matches!(self, RetryError::RecoveryFailed { .. })
    }

    /// Check if this error indicates cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// Check if this error indicates a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RetryError::AttemptTimeout { .. })
    }

    /// Get the operation label carried by an exhaustion error
    pub fn label(&self) -> Option<&str> {
        match self {
            RetryError::Exhausted { label, .. } => label.as_deref(),
            _ => None,
        }
    }

    /// Get the underlying error, consuming this error
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::RecoveryFailed { source, .. } => Some(source),
            RetryError::Cancelled { last_error, .. } => last_error,
            RetryError::AttemptTimeout { .. } => None,
        }
    }

    /// Get a reference to the underlying error
    pub fn source_ref(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } => Some(source),
            RetryError::RecoveryFailed { source, .. } => Some(source),
            RetryError::Cancelled { last_error, .. } => last_error.as_ref(),
            RetryError::AttemptTimeout { .. } => None,
        }
    }

    /// Map the error type using a closure
    pub fn map_err<F, E2>(self, f: F) -> RetryError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            RetryError::Exhausted {
                attempts,
                source,
                total_duration,
                label,
                reason,
            } => RetryError::Exhausted {
                attempts,
                source: f(source),
                total_duration,
                label,
                reason,
            },
            RetryError::RecoveryFailed { attempts, source } => RetryError::RecoveryFailed {
                attempts,
                source: f(source),
            },
            RetryError::Cancelled {
                attempts,
                last_error,
            } => RetryError::Cancelled {
                attempts,
                last_error: last_error.map(f),
            },
            RetryError::AttemptTimeout { attempt, timeout } => {
                RetryError::AttemptTimeout { attempt, timeout }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn exhausted(reason: ExhaustionReason) -> RetryError<io::Error> {
        RetryError::exhausted(
            3,
            io::Error::new(io::ErrorKind::TimedOut, "connection timeout"),
            Duration::from_millis(5500),
            Some("fetch".to_string()),
            reason,
        )
    }

    #[test]
    fn test_exhausted_error() {
        let err = exhausted(ExhaustionReason::AttemptsExhausted);

        assert!(err.is_exhausted());
        assert!(!err.is_non_retryable());
        assert!(!err.is_cancelled());
        assert!(!err.is_timeout());
        assert!(!err.is_recovery_failure());
        assert_eq!(err.attempts(), 3);
        assert_eq!(err.label(), Some("fetch"));
        assert_eq!(err.source_ref().unwrap().kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_non_retryable_is_still_exhaustion() {
        let err = exhausted(ExhaustionReason::NonRetryable);
        assert!(err.is_exhausted());
        assert!(err.is_non_retryable());
    }

    #[test]
    fn test_cancelled_error() {
        let err: RetryError<io::Error> = RetryError::cancelled(2, None);

        assert!(err.is_cancelled());
        assert_eq!(err.attempts(), 2);
        assert!(err.source_ref().is_none());
    }

    #[test]
    fn test_timeout_error() {
        let err: RetryError<io::Error> = RetryError::attempt_timeout(3, Duration::from_millis(500));

        assert!(err.is_timeout());
        // The timed-out third attempt follows two registered failures
        assert_eq!(err.attempts(), 2);
    }

    #[test]
    fn test_into_source() {
        let err: RetryError<String> = RetryError::recovery_failed(3, "fallback broke".to_string());
        assert_eq!(err.into_source(), Some("fallback broke".to_string()));

        let err: RetryError<String> = RetryError::cancelled(2, Some("cancelled".to_string()));
        assert_eq!(err.into_source(), Some("cancelled".to_string()));

        let err: RetryError<String> = RetryError::attempt_timeout(1, Duration::from_millis(100));
        assert_eq!(err.into_source(), None);
    }

    #[test]
    fn test_map_err() {
        let err: RetryError<i32> = RetryError::exhausted(
            3,
            42,
            Duration::from_secs(1),
            None,
            ExhaustionReason::AttemptsExhausted,
        );

        let mapped = err.map_err(|n| format!("error code: {}", n));
        assert!(
            matches!(mapped, RetryError::Exhausted { source, .. } if source == "error code: 42")
        );
    }

    #[test]
    fn test_display() {
        let display = exhausted(ExhaustionReason::AttemptsExhausted).to_string();
        assert!(display.starts_with("fetch: retry exhausted"));
        assert!(display.contains("3 attempts"));
        assert!(display.contains("5.50s"));
        assert!(display.contains("connection timeout"));

        let display = exhausted(ExhaustionReason::NonRetryable).to_string();
        assert!(display.contains("non-retryable failure"));

        let timeout: RetryError<io::Error> =
            RetryError::attempt_timeout(1, Duration::from_millis(500));
        assert_eq!(timeout.to_string(), "attempt 1 timed out after 500ms");
    }

    #[test]
    fn test_error_source_chain() {
        let err = exhausted(ExhaustionReason::AttemptsExhausted);
        let source = Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "connection timeout");
    }
}
