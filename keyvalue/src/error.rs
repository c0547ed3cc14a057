//! Error types shared by all backends.

use std::sync::Arc;

/// Error type for store operations.
///
/// Predicate failures and compare-and-swap contention are not errors; they
/// surface as `Ok(false)` or handle-level flags. `Error` is `Clone` (inner
/// transport errors are reference-counted) so the read cache can memoise
/// errored reads the same way it memoises values.
#[derive(Debug, Clone)]
pub enum Error {
    /// Malformed input, such as an unparsable range delimiter or a
    /// non-integer value handed to an integer operation.
    InvalidArgument(String),

    /// More operations were queued on an atomic write than the store allows.
    TooManyOperations { count: usize, max: usize },

    /// A contended read-modify-write gave up after exhausting its retry
    /// budget.
    Contention { attempts: u32 },

    /// The backend returned a structurally unexpected response. Indicates a
    /// bug in the backend or in this library.
    Protocol(String),

    /// A failure reported by the underlying client or transport, wrapped
    /// with a short identifying context. The source error is preserved for
    /// callers to downcast or log.
    Transport {
        context: String,
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Error {
    /// Wraps a client or transport failure with an identifying context.
    pub fn transport(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Transport {
            context: context.into(),
            source: Arc::new(source),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Error::TooManyOperations { count, max } => {
                write!(f, "atomic write of {} operations exceeds limit of {}", count, max)
            }
            Error::Contention { attempts } => {
                write!(f, "operation abandoned after {} contended attempts", attempts)
            }
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Transport { context, source } => write!(f, "{}: {}", context, source),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Transport { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Inner;

    impl std::fmt::Display for Inner {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "connection reset")
        }
    }

    impl std::error::Error for Inner {}

    #[test]
    fn should_preserve_transport_source() {
        // given
        let err = Error::transport("table service query", Inner);

        // when
        let source = std::error::Error::source(&err);

        // then
        assert!(source.is_some());
        assert_eq!(err.to_string(), "table service query: connection reset");
    }

    #[test]
    fn should_clone_transport_errors() {
        // given
        let err = Error::transport("command dispatch", Inner);

        // when
        let cloned = err.clone();

        // then
        assert!(matches!(cloned, Error::Transport { .. }));
    }
}
