//! Error taxonomy shared by the core and the service crate.
//!
//! Each failure path of the service is a named variant here so that the
//! "log and keep going" policy stays observable and testable.

use std::path::PathBuf;

/// Failure to load a configuration file that was selected by the resolver.
///
/// Never fatal: the resolver logs it and continues with an empty configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed configuration at {path}, line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// A concept dictionary file that could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryError {
    #[error("cannot read dictionary {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("dictionary has no entries")]
    Empty,
}

/// A single stage of the annotation pipeline that could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInitFailure {
    pub stage: &'static str,
    pub reason: String,
}

impl std::fmt::Display for StageInitFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.stage, self.reason)
    }
}

/// Construction of the annotation pipeline failed.
///
/// All stage failures are collected before this error is raised, so a single
/// value describes everything that went wrong during assembly.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineInitError {
    #[error("pipeline construction failed in {} stage(s): {}", .0.len(), join_failures(.0))]
    Stages(Vec<StageInitFailure>),
    #[error("annotation engine unavailable: {0}")]
    Unavailable(String),
}

fn join_failures(failures: &[StageInitFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// An individual document failed part-way through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage '{stage}' failed: {reason}")]
pub struct ProcessingError {
    pub stage: &'static str,
    pub reason: String,
}

impl ProcessingError {
    #[must_use]
    pub fn new(stage: &'static str, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }
}

/// Rendering an [`AnnotationResult`](crate::annotation::AnnotationResult) failed.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("relation {relation} references unknown annotation {annotation}")]
    DanglingReference { relation: u32, annotation: u32 },
    #[error("annotation {annotation} span {begin}..{end} is outside the document")]
    SpanOutOfBounds { annotation: u32, begin: usize, end: usize },
    #[error("write failed: {0}")]
    Write(#[from] std::fmt::Error),
}
