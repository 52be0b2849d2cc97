//! Annotation result model.
//!
//! An [`AnnotationResult`] is the output artifact for exactly one document:
//! the document text, the span annotations produced by each pipeline stage and
//! the binary relations linking them. Results are plain values; they are never
//! shared between requests.

use std::collections::BTreeMap;

/// Identifier of an annotation within one result. Unique per document only.
pub type AnnotationId = u32;

/// Half-open byte range `[begin, end)` into the document text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub begin: usize,
    pub end: usize,
}

impl Span {
    #[must_use]
    pub fn new(begin: usize, end: usize) -> Self {
        Self { begin, end }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.begin)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    /// True if `other` lies entirely within this span.
    #[must_use]
    pub fn covers(&self, other: Span) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    /// Slices `text` by this span, or `None` if it is out of bounds or not on
    /// a character boundary.
    #[must_use]
    pub fn slice<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.begin..self.end)
    }
}

/// Semantic grouping of a dictionary concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SemanticGroup {
    Drug,
    Disorder,
    Finding,
    Procedure,
    Anatomy,
}

impl SemanticGroup {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Drug => "Drug",
            Self::Disorder => "Disorder",
            Self::Finding => "Finding",
            Self::Procedure => "Procedure",
            Self::Anatomy => "Anatomy",
        }
    }

    /// Parses a group name case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "drug" | "medication" => Some(Self::Drug),
            "disorder" | "disease" => Some(Self::Disorder),
            "finding" | "sign" | "symptom" => Some(Self::Finding),
            "procedure" => Some(Self::Procedure),
            "anatomy" | "anatomicalsite" => Some(Self::Anatomy),
            _ => None,
        }
    }
}

/// Kind of span annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AnnotationKind {
    Segment,
    Sentence,
    Token,
    Chunk,
    LookupWindow,
    Concept(SemanticGroup),
    TimeMention,
    EventMention,
}

impl AnnotationKind {
    /// Element name used in the structured serialization.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Segment => "Segment",
            Self::Sentence => "Sentence",
            Self::Token => "Token",
            Self::Chunk => "Chunk",
            Self::LookupWindow => "LookupWindow",
            Self::Concept(SemanticGroup::Drug) => "MedicationMention",
            Self::Concept(SemanticGroup::Disorder) => "DiseaseDisorderMention",
            Self::Concept(SemanticGroup::Finding) => "SignSymptomMention",
            Self::Concept(SemanticGroup::Procedure) => "ProcedureMention",
            Self::Concept(SemanticGroup::Anatomy) => "AnatomicalSiteMention",
            Self::TimeMention => "TimeMention",
            Self::EventMention => "EventMention",
        }
    }
}

/// A typed span with string-valued features (e.g. `pos`, `norm`, `polarity`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub id: AnnotationId,
    pub kind: AnnotationKind,
    pub span: Span,
    pub features: BTreeMap<&'static str, String>,
}

impl Annotation {
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<&str> {
        self.features.get(name).map(String::as_str)
    }
}

/// Kind of binary relation between two annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Syntactic dependency, head -> dependent.
    Dependency,
    /// Predicate -> argument.
    SemanticRole,
    /// Event/time ordering.
    TemporalLink,
}

impl RelationKind {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Dependency => "ConllDependencyNode",
            Self::SemanticRole => "SemanticRoleRelation",
            Self::TemporalLink => "TemporalTextRelation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub id: AnnotationId,
    pub kind: RelationKind,
    pub source: AnnotationId,
    pub target: AnnotationId,
    pub label: String,
}

/// Output artifact for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationResult {
    pub text: String,
    pub annotations: Vec<Annotation>,
    pub relations: Vec<Relation>,
}

impl AnnotationResult {
    /// A result carrying only the text and no annotations.
    #[must_use]
    pub fn empty(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            annotations: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Annotations of `kind`, in document order.
    pub fn select(&self, kind: AnnotationKind) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(move |a| a.kind == kind)
    }

    /// Annotations of `kind` lying within `span`, in document order.
    pub fn select_covered(
        &self,
        kind: AnnotationKind,
        span: Span,
    ) -> impl Iterator<Item = &Annotation> {
        self.select(kind).filter(move |a| span.covers(a.span))
    }

    /// All concept mentions regardless of semantic group.
    pub fn concepts(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations
            .iter()
            .filter(|a| matches!(a.kind, AnnotationKind::Concept(_)))
    }

    #[must_use]
    pub fn get(&self, id: AnnotationId) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.id == id)
    }

    /// Text covered by an annotation, or `""` if its span is invalid.
    #[must_use]
    pub fn covered_text(&self, annotation: &Annotation) -> &str {
        annotation.span.slice(&self.text).unwrap_or_default()
    }
}
