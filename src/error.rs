//! Error types for admission control.

use thiserror::Error;

/// Boxed error used for failures produced outside the crate (extractors, work).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for admission operations.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The execution context was cancelled before the work could start
    #[error("context canceled, logic not executed")]
    ContextCancelled,

    /// The identifier extractor could not derive an admission key
    #[error("identifier extraction failed: {0}")]
    ExtractionFailed(#[source] BoxError),

    /// The process-wide limiter has no tokens left
    #[error("total rate limiter denied")]
    TotalLimiterDenied,

    /// The per-identifier limiter has no tokens left for this identifier
    #[error("individual rate limiter denied for {identifier}")]
    IndividualLimiterDenied { identifier: String },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error returned by the unit of work itself
    #[error(transparent)]
    Work(BoxError),
}

impl AdmissionError {
    /// Wrap an error produced by a unit of work.
    pub fn work(err: impl Into<BoxError>) -> Self {
        AdmissionError::Work(err.into())
    }

    /// Check if the context was cancelled before execution.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::ContextCancelled)
    }

    /// Check if a limiter store refused admission.
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            Self::TotalLimiterDenied | Self::IndividualLimiterDenied { .. }
        )
    }

    /// Check if the identifier extractor failed.
    pub fn is_extraction_failed(&self) -> bool {
        matches!(self, Self::ExtractionFailed(_))
    }

    /// Borrow the work's own error, if this is one.
    pub fn work_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Work(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for admission operations.
pub type Result<T> = std::result::Result<T, AdmissionError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fmt;

    #[derive(Debug)]
    struct GatewayDown;

    impl fmt::Display for GatewayDown {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "gateway down")
        }
    }

    impl std::error::Error for GatewayDown {}

    #[test]
    fn test_denied_predicates() {
        assert!(AdmissionError::TotalLimiterDenied.is_denied());
        let individual = AdmissionError::IndividualLimiterDenied {
            identifier: "0966666666".to_string(),
        };
        assert!(individual.is_denied());
        assert!(individual.to_string().contains("0966666666"));
        assert!(!AdmissionError::ContextCancelled.is_denied());
    }

    #[test]
    fn test_cancelled_display() {
        let err = AdmissionError::ContextCancelled;
        assert!(err.is_cancelled());
        assert_eq!(err.to_string(), "context canceled, logic not executed");
    }

    #[test]
    fn test_work_error_is_transparent() {
        let err = AdmissionError::work(GatewayDown);
        assert_eq!(err.to_string(), "gateway down");
        assert!(err.work_error().is_some());
        assert!(!err.is_denied());
    }

    #[test]
    fn test_extraction_failed_keeps_source() {
        let err = AdmissionError::ExtractionFailed("no request in context".into());
        assert!(err.is_extraction_failed());
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("no request in context".to_string())
        );
    }
}
