use crate::annotation::AnnotationResult;
use crate::error::{EngineInitError, ProcessingError};

/// A stateful text annotation engine.
///
/// An instance accumulates per-document state while processing and must be
/// [`reset`](Self::reset) before the next document. Instances are not safe
/// for concurrent use; callers must hold exclusive access for the whole
/// `process` / `result` / `reset` sequence, which `&mut self` enforces.
pub trait TextAnnotationEngine: Send + 'static {
    /// Runs every stage over `text`, accumulating annotations in the instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] when a stage fails. Annotations produced by
    /// earlier stages remain available through [`result`](Self::result).
    fn process(&mut self, text: &str) -> Result<(), ProcessingError>;

    /// Snapshot of the annotations accumulated for the current document.
    fn result(&self) -> AnnotationResult;

    /// Clears all per-document state.
    fn reset(&mut self);
}

/// Builds the (expensive) engine instance.
///
/// Called at most once per service lifetime.
pub trait PipelineFactory: Send + Sync + 'static {
    /// # Errors
    ///
    /// Returns [`EngineInitError`] describing every stage that failed to
    /// construct.
    fn build(&self) -> Result<Box<dyn TextAnnotationEngine>, EngineInitError>;
}

impl<F> PipelineFactory for F
where
    F: Fn() -> Result<Box<dyn TextAnnotationEngine>, EngineInitError> + Send + Sync + 'static,
{
    fn build(&self) -> Result<Box<dyn TextAnnotationEngine>, EngineInitError> {
        self()
    }
}
