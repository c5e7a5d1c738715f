use std::time::Duration;

/// Failure of a call made through a circuit breaker.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    /// Rejected without invoking the operation.
    #[error("circuit open for {dependency} after {failure_count} failures; retry in {retry_after:?}")]
    Open {
        dependency: String,
        failure_count: u32,
        /// Milliseconds since the Unix epoch.
        last_failure_time: Option<u64>,
        retry_after: Duration,
    },

    #[error("call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The operation's own error, unmodified.
    #[error("{0}")]
    Operation(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn map_operation<F, T>(self, f: F) -> CallError<T>
    where
        F: FnOnce(E) -> T,
    {
        match self {
            Self::Open {
                dependency,
                failure_count,
                last_failure_time,
                retry_after,
            } => CallError::Open {
                dependency,
                failure_count,
                last_failure_time,
                retry_after,
            },
            Self::Timeout { timeout } => CallError::Timeout { timeout },
            Self::Operation(e) => CallError::Operation(f(e)),
        }
    }
}

/// How an operation error affects breaker accounting.
///
/// Expected errors (bad input, business rule refusals) say nothing about the
/// dependency's health: they pass through without counting as failures.
pub trait FailureKind {
    fn is_expected(&self) -> bool {
        false
    }
}

impl FailureKind for std::io::Error {}

/// Lets the retry coordinator recognise breaker rejections in any error type.
pub trait RetrySignal {
    fn is_circuit_open(&self) -> bool;
}

impl<E> RetrySignal for CallError<E> {
    fn is_circuit_open(&self) -> bool {
        CallError::is_circuit_open(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_forms() {
        let open: CallError<String> = CallError::Open {
            dependency: "s3".into(),
            failure_count: 5,
            last_failure_time: Some(1),
            retry_after: Duration::from_secs(3),
        };
        assert!(open.to_string().starts_with("circuit open for s3 after 5 failures"));
        assert!(open.is_circuit_open());

        let op: CallError<String> = CallError::Operation("boom".into());
        assert_eq!(op.to_string(), "boom");
        assert_eq!(op.into_operation().as_deref(), Some("boom"));
    }

    #[test]
    fn map_keeps_breaker_variants() {
        let t: CallError<u8> = CallError::Timeout {
            timeout: Duration::from_millis(5),
        };
        let mapped: CallError<String> = t.map_operation(|n| n.to_string());
        assert!(matches!(mapped, CallError::Timeout { .. }));
    }
}
