use std::time::Duration;

use paeon_core::error::{EngineInitError, ProcessingError};
use paeon_core::AnnotationResult;

/// Why an `analyze` call did not produce a complete result.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    /// The pipeline could not be built. Permanent for this engine.
    #[error("annotation engine unavailable: {0}")]
    Initialization(#[source] EngineInitError),

    /// A stage failed on this document. `partial` holds whatever the
    /// earlier stages produced.
    #[error("document processing failed: {source}")]
    Processing {
        partial: Box<AnnotationResult>,
        #[source]
        source: ProcessingError,
    },

    /// The caller waited longer than the configured maximum for its turn.
    #[error("gave up after waiting {0:?} for the annotation engine")]
    QueueTimeout(Duration),

    /// The pipeline task panicked or was cancelled.
    #[error("annotation task aborted: {0}")]
    Aborted(String),
}

impl AnalyzeError {
    /// Best-effort result for a failed call, if any was produced.
    #[must_use]
    pub fn partial_result(&self) -> Option<&AnnotationResult> {
        match self {
            Self::Processing { partial, .. } => Some(partial),
            _ => None,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialization(_) => "initialization",
            Self::Processing { .. } => "processing",
            Self::QueueTimeout(_) => "queue_timeout",
            Self::Aborted(_) => "aborted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_processing_errors_carry_partial_results() {
        let err = AnalyzeError::Processing {
            partial: Box::new(AnnotationResult::empty("text")),
            source: ProcessingError::new("tokenizer", "boom"),
        };
        assert_eq!(err.partial_result().map(|r| r.text.as_str()), Some("text"));
        assert_eq!(err.kind(), "processing");

        let err = AnalyzeError::QueueTimeout(Duration::from_millis(5));
        assert!(err.partial_result().is_none());
        assert_eq!(err.kind(), "queue_timeout");
    }

    #[test]
    fn display_includes_cause() {
        let err = AnalyzeError::Initialization(EngineInitError::Unavailable("no model".into()));
        assert!(err.to_string().contains("no model"));
    }
}
