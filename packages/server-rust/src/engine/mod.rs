//! Serialized access to the single, expensive annotation pipeline.
//!
//! [`AnnotationEngine`] owns the only [`TextAnnotationEngine`] instance in the
//! process. Callers queue on a fair async mutex; the holder runs the pipeline
//! on the blocking pool and the per-document state is reset before the lock
//! is released, including when a stage panics.
//!
//! State machine: `Uninitialized -> Ready` or `Uninitialized -> Failed`
//! (terminal). While Ready, each document moves `Ready -> Busy -> Ready`.

mod error;

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use paeon_core::error::EngineInitError;
use paeon_core::{render, AnnotationResult, OutputFormat, PipelineFactory, TextAnnotationEngine};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

pub use error::AnalyzeError;

// ---------------------------------------------------------------------------
// State and configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// The pipeline has not been built yet (lazy mode, before first use).
    Uninitialized,
    /// Built and idle.
    Ready,
    /// Built and processing a document.
    Busy,
    /// Construction failed. Never retried.
    Failed,
}

impl EngineState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    /// Defer pipeline construction to the first `analyze` call.
    pub lazy: bool,
    /// Longest a caller may wait for its turn. `None` waits indefinitely.
    pub max_queue_wait: Option<Duration>,
}

enum Slot {
    Pending,
    Ready(Box<dyn TextAnnotationEngine>),
    Failed,
}

struct Shared {
    factory: Arc<dyn PipelineFactory>,
    config: EngineConfig,
    slot: Arc<Mutex<Slot>>,
    state: Arc<ArcSwap<EngineState>>,
    failure: OnceLock<EngineInitError>,
}

// ---------------------------------------------------------------------------
// AnnotationEngine
// ---------------------------------------------------------------------------

/// Cloneable handle to the process-wide annotation pipeline.
#[derive(Clone)]
pub struct AnnotationEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AnnotationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationEngine")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl AnnotationEngine {
    /// Creates the engine without building the pipeline; the first
    /// [`analyze`](Self::analyze) call builds it.
    #[must_use]
    pub fn lazy(factory: Arc<dyn PipelineFactory>, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory,
                config,
                slot: Arc::new(Mutex::new(Slot::Pending)),
                state: Arc::new(ArcSwap::from_pointee(EngineState::Uninitialized)),
                failure: OnceLock::new(),
            }),
        }
    }

    /// Creates the engine and builds the pipeline immediately.
    ///
    /// Construction failure does not fail this call: the engine is returned
    /// in the [`EngineState::Failed`] state so the service can keep running
    /// and report itself unhealthy.
    pub async fn start(factory: Arc<dyn PipelineFactory>, config: EngineConfig) -> Self {
        let engine = Self::lazy(factory, config);
        let mut slot = Arc::clone(&engine.shared.slot).lock_owned().await;
        engine.initialize(&mut slot).await;
        drop(slot);
        engine
    }

    /// Eager or lazy construction depending on `config.lazy`.
    pub async fn launch(factory: Arc<dyn PipelineFactory>, config: EngineConfig) -> Self {
        if config.lazy {
            Self::lazy(factory, config)
        } else {
            Self::start(factory, config).await
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        **self.shared.state.load()
    }

    /// The construction error, once the engine has failed.
    #[must_use]
    pub fn init_error(&self) -> Option<&EngineInitError> {
        self.shared.failure.get()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    fn set_state(&self, state: EngineState) {
        self.shared.state.store(Arc::new(state));
    }

    /// Builds the pipeline if it has not been attempted yet. Caller holds the lock.
    async fn initialize(&self, slot: &mut Slot) {
        if !matches!(slot, Slot::Pending) {
            return;
        }
        let factory = Arc::clone(&self.shared.factory);
        let started = Instant::now();
        let built = tokio::task::spawn_blocking(move || factory.build())
            .await
            .unwrap_or_else(|join| {
                Err(EngineInitError::Unavailable(format!(
                    "pipeline construction aborted: {join}"
                )))
            });

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match built {
            Ok(pipeline) => {
                *slot = Slot::Ready(pipeline);
                self.set_state(EngineState::Ready);
                info!(elapsed_ms, "annotation engine ready");
            }
            Err(err) => {
                error!(error = %err, elapsed_ms, "annotation engine failed to initialize");
                let _ = self.shared.failure.set(err);
                *slot = Slot::Failed;
                self.set_state(EngineState::Failed);
            }
        }
    }

    fn unavailable(&self) -> AnalyzeError {
        let err = self.init_error().cloned().unwrap_or_else(|| {
            EngineInitError::Unavailable("pipeline was never initialized".to_string())
        });
        AnalyzeError::Initialization(err)
    }

    async fn acquire(&self) -> Result<OwnedMutexGuard<Slot>, AnalyzeError> {
        let lock = Arc::clone(&self.shared.slot).lock_owned();
        match self.shared.config.max_queue_wait {
            Some(wait) => tokio::time::timeout(wait, lock)
                .await
                .map_err(|_| AnalyzeError::QueueTimeout(wait)),
            None => Ok(lock.await),
        }
    }

    /// Annotates one document.
    ///
    /// Calls are served one at a time in arrival order. Once the pipeline
    /// starts on a document it runs to completion even if this future is
    /// dropped.
    ///
    /// # Errors
    ///
    /// - [`AnalyzeError::Initialization`] immediately, without queueing, once
    ///   the engine has failed.
    /// - [`AnalyzeError::Processing`] with the partial result if a stage fails.
    /// - [`AnalyzeError::QueueTimeout`] if `max_queue_wait` elapses first.
    /// - [`AnalyzeError::Aborted`] if the pipeline panics.
    pub async fn analyze(&self, text: &str) -> Result<AnnotationResult, AnalyzeError> {
        if self.init_error().is_some() {
            return Err(self.unavailable());
        }

        let mut slot = self.acquire().await?;
        self.initialize(&mut slot).await;
        if !matches!(*slot, Slot::Ready(_)) {
            return Err(self.unavailable());
        }

        let state = Arc::clone(&self.shared.state);
        let bytes = text.len();
        let text = text.to_owned();
        let started = Instant::now();
        let outcome =
            tokio::task::spawn_blocking(move || run_document(slot, &state, &text)).await;

        let elapsed = started.elapsed();
        metrics::histogram!("paeon_analyze_duration_seconds").record(elapsed.as_secs_f64());
        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = elapsed.as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                info!(
                    elapsed_ms,
                    bytes,
                    annotations = result.annotations.len(),
                    "document processed"
                );
                Ok(result)
            }
            Ok(Err(err)) => {
                warn!(elapsed_ms, bytes, error = %err, "document processing failed");
                Err(err)
            }
            Err(join) => {
                error!(elapsed_ms, bytes, error = %join, "annotation task aborted");
                Err(AnalyzeError::Aborted(join.to_string()))
            }
        }
    }
}

/// Clears per-document state and marks the engine idle when dropped, so the
/// next caller always starts from a clean pipeline.
struct DocumentSession<'a> {
    pipeline: &'a mut Box<dyn TextAnnotationEngine>,
    state: &'a ArcSwap<EngineState>,
}

impl Drop for DocumentSession<'_> {
    fn drop(&mut self) {
        self.pipeline.reset();
        self.state.store(Arc::new(EngineState::Ready));
    }
}

fn run_document(
    mut slot: OwnedMutexGuard<Slot>,
    state: &ArcSwap<EngineState>,
    text: &str,
) -> Result<AnnotationResult, AnalyzeError> {
    let Slot::Ready(pipeline) = &mut *slot else {
        return Err(AnalyzeError::Aborted("pipeline not ready".to_string()));
    };
    state.store(Arc::new(EngineState::Busy));
    let session = DocumentSession { pipeline, state };
    match session.pipeline.process(text) {
        Ok(()) => Ok(session.pipeline.result()),
        Err(source) => {
            debug!(stage = source.stage, "keeping partial result");
            Err(AnalyzeError::Processing {
                partial: Box::new(session.pipeline.result()),
                source,
            })
        }
    }
}

/// Renders `result`, logging and returning an empty string on failure.
#[must_use]
pub fn format_or_empty(result: &AnnotationResult, format: OutputFormat) -> String {
    match render(result, format) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(error = %err, format = format.as_str(), "failed to format annotation result");
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
