//! Clinical text annotation pipeline.
//!
//! A fixed, ordered chain of stages over a shared [`AnalysisDocument`]:
//!
//! 1. segmentation, sentence detection, tokenization, normalization
//! 2. part-of-speech tagging, chunking, lookup windows
//! 3. dictionary concept lookup
//! 4. dependency parsing, assertion attributes, semantic roles
//! 5. time expressions, events with document-time relations, temporal links
//!
//! [`ClinicalPipelineFactory`] builds the chain once; [`ClinicalPipeline`] is
//! the stateful engine instance that callers must use exclusively.

pub mod clinical;
pub mod dictionary;
pub mod document;
pub mod lexical;
pub mod syntax;
pub mod temporal;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::annotation::AnnotationResult;
use crate::error::{DictionaryError, EngineInitError, ProcessingError, StageInitFailure};
use crate::traits::{PipelineFactory, TextAnnotationEngine};

use clinical::{AssertionAnnotator, DictionaryLookup};
use dictionary::Dictionary;
pub use document::AnalysisDocument;
use lexical::{Normalizer, SentenceDetector, SimpleSegmenter, Tokenizer};
use syntax::{Chunker, DependencyParser, LookupWindows, PosTagger, SemanticRoleLabeler};
use temporal::{EventAnnotator, TemporalRelations, TimeAnnotator};

/// One analysis step. Stages are immutable after construction; all
/// per-document state lives in the [`AnalysisDocument`].
pub trait AnnotationStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Errors
    ///
    /// Returns [`ProcessingError`] if the stage cannot handle this document.
    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError>;
}

/// Stage names in execution order.
pub const STAGE_ORDER: [&str; 14] = [
    SimpleSegmenter::NAME,
    SentenceDetector::NAME,
    Tokenizer::NAME,
    Normalizer::NAME,
    PosTagger::NAME,
    Chunker::NAME,
    LookupWindows::NAME,
    DictionaryLookup::NAME,
    DependencyParser::NAME,
    AssertionAnnotator::NAME,
    SemanticRoleLabeler::NAME,
    TimeAnnotator::NAME,
    EventAnnotator::NAME,
    TemporalRelations::NAME,
];

/// Upper bound on tokens in one sentence unless configured otherwise.
pub const DEFAULT_MAX_TOKENS_PER_SENTENCE: usize = 2_000;

/// Where the concept dictionary comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DictionarySource {
    #[default]
    BuiltIn,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub dictionary: DictionarySource,
    pub max_tokens_per_sentence: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            dictionary: DictionarySource::BuiltIn,
            max_tokens_per_sentence: DEFAULT_MAX_TOKENS_PER_SENTENCE,
        }
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Builds [`ClinicalPipeline`] instances from [`PipelineSettings`].
#[derive(Debug, Clone, Default)]
pub struct ClinicalPipelineFactory {
    settings: PipelineSettings,
}

impl ClinicalPipelineFactory {
    #[must_use]
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Constructs every stage in order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineInitError::Stages`] listing every stage that failed;
    /// construction continues past a failure so all problems are reported.
    pub fn assemble(&self) -> Result<ClinicalPipeline, EngineInitError> {
        let mut stages: Vec<Box<dyn AnnotationStage>> = Vec::with_capacity(STAGE_ORDER.len());
        let mut failures = Vec::new();
        let mut add = |name: &'static str, stage: Result<Box<dyn AnnotationStage>, String>| {
            match stage {
                Ok(stage) => stages.push(stage),
                Err(reason) => failures.push(StageInitFailure { stage: name, reason }),
            }
        };

        add(SimpleSegmenter::NAME, Ok(Box::new(SimpleSegmenter)));
        add(SentenceDetector::NAME, Ok(Box::new(SentenceDetector)));
        add(
            Tokenizer::NAME,
            Tokenizer::new(self.settings.max_tokens_per_sentence)
                .map(boxed)
                .map_err(|e| e.to_string()),
        );
        add(Normalizer::NAME, Ok(Box::new(Normalizer)));
        add(PosTagger::NAME, Ok(Box::new(PosTagger::new())));
        add(Chunker::NAME, Ok(Box::new(Chunker)));
        add(LookupWindows::NAME, Ok(Box::new(LookupWindows)));
        add(
            DictionaryLookup::NAME,
            self.load_dictionary()
                .map(|d| boxed(DictionaryLookup::new(Arc::new(d))))
                .map_err(|e| e.to_string()),
        );
        add(DependencyParser::NAME, Ok(Box::new(DependencyParser)));
        add(AssertionAnnotator::NAME, Ok(Box::new(AssertionAnnotator)));
        add(SemanticRoleLabeler::NAME, Ok(Box::new(SemanticRoleLabeler)));
        add(
            TimeAnnotator::NAME,
            TimeAnnotator::new().map(boxed).map_err(|e| e.to_string()),
        );
        add(EventAnnotator::NAME, Ok(Box::new(EventAnnotator)));
        add(TemporalRelations::NAME, Ok(Box::new(TemporalRelations)));

        if !failures.is_empty() {
            return Err(EngineInitError::Stages(failures));
        }
        debug!(stages = stages.len(), "clinical pipeline assembled");
        Ok(ClinicalPipeline {
            stages,
            document: AnalysisDocument::new(),
        })
    }

    fn load_dictionary(&self) -> Result<Dictionary, DictionaryError> {
        match &self.settings.dictionary {
            DictionarySource::BuiltIn => Ok(Dictionary::built_in()),
            DictionarySource::File(path) => Dictionary::load(path),
        }
    }
}

fn boxed<S: AnnotationStage + 'static>(stage: S) -> Box<dyn AnnotationStage> {
    Box::new(stage)
}

impl PipelineFactory for ClinicalPipelineFactory {
    fn build(&self) -> Result<Box<dyn TextAnnotationEngine>, EngineInitError> {
        Ok(Box::new(self.assemble()?))
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The assembled chain plus the document it is currently working on.
pub struct ClinicalPipeline {
    stages: Vec<Box<dyn AnnotationStage>>,
    document: AnalysisDocument,
}

impl ClinicalPipeline {
    /// Names of the stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn document(&self) -> &AnalysisDocument {
        &self.document
    }
}

impl std::fmt::Debug for ClinicalPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClinicalPipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

impl TextAnnotationEngine for ClinicalPipeline {
    fn process(&mut self, text: &str) -> Result<(), ProcessingError> {
        self.document.load(text);
        for stage in &self.stages {
            stage.process(&mut self.document)?;
        }
        Ok(())
    }

    fn result(&self) -> AnnotationResult {
        self.document.snapshot()
    }

    fn reset(&mut self) {
        self.document.clear();
    }
}
