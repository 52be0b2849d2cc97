//! Paeon core: configuration resolution, the request/reply message model,
//! annotation results and their serializations, and the clinical annotation
//! pipeline.

pub mod annotation;
pub mod config;
pub mod error;
pub mod format;
pub mod messages;
pub mod pipeline;
pub mod properties;
pub mod traits;

pub use annotation::{AnnotationKind, AnnotationResult, SemanticGroup, Span};
pub use config::{ConfigResolver, ConfigSource, Configuration};
pub use error::{ConfigLoadError, DictionaryError, EngineInitError, FormatError, ProcessingError};
pub use format::{render, OutputFormat};
pub use messages::{AnnotationRequest, CorrelationId, Destination, Message, MessageBody, MessageId};
pub use pipeline::{ClinicalPipelineFactory, DictionarySource, PipelineSettings};
pub use traits::{PipelineFactory, TextAnnotationEngine};
