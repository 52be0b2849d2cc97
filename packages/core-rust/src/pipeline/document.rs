//! Per-document working state shared by all pipeline stages.

use std::collections::BTreeMap;

use crate::annotation::{
    Annotation, AnnotationId, AnnotationKind, AnnotationResult, Relation, RelationKind, Span,
};

/// Mutable analysis state for the document currently being processed.
///
/// Stages read annotations added by earlier stages and append their own.
/// The pipeline reuses one document across requests and [`clear`](Self::clear)s
/// it in between.
#[derive(Debug, Default)]
pub struct AnalysisDocument {
    text: String,
    annotations: Vec<Annotation>,
    relations: Vec<Relation>,
    next_id: AnnotationId,
}

impl AnalysisDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any previous state and loads `text`.
    pub fn load(&mut self, text: &str) {
        self.clear();
        self.text.push_str(text);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.annotations.clear();
        self.relations.clear();
        self.next_id = 1;
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.text.is_empty() && self.annotations.is_empty() && self.relations.is_empty()
    }

    fn allocate_id(&mut self) -> AnnotationId {
        if self.next_id == 0 {
            self.next_id = 1;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Adds an annotation and returns its id.
    pub fn annotate(
        &mut self,
        kind: AnnotationKind,
        span: Span,
        features: BTreeMap<&'static str, String>,
    ) -> AnnotationId {
        let id = self.allocate_id();
        self.annotations.push(Annotation {
            id,
            kind,
            span,
            features,
        });
        id
    }

    /// Adds a relation and returns its id.
    pub fn relate(
        &mut self,
        kind: RelationKind,
        source: AnnotationId,
        target: AnnotationId,
        label: impl Into<String>,
    ) -> AnnotationId {
        let id = self.allocate_id();
        self.relations.push(Relation {
            id,
            kind,
            source,
            target,
            label: label.into(),
        });
        id
    }

    /// Sets (or replaces) a feature on an existing annotation.
    pub fn set_feature(&mut self, id: AnnotationId, name: &'static str, value: impl Into<String>) {
        if let Some(ann) = self.annotations.iter_mut().find(|a| a.id == id) {
            ann.features.insert(name, value.into());
        }
    }

    /// Annotations of `kind`, cloned, sorted by span.
    #[must_use]
    pub fn select(&self, kind: AnnotationKind) -> Vec<Annotation> {
        let mut out: Vec<_> = self
            .annotations
            .iter()
            .filter(|a| a.kind == kind)
            .cloned()
            .collect();
        out.sort_by_key(|a| a.span);
        out
    }

    /// Annotations of `kind` within `span`, cloned, sorted by span.
    #[must_use]
    pub fn select_covered(&self, kind: AnnotationKind, span: Span) -> Vec<Annotation> {
        let mut out = self.select(kind);
        out.retain(|a| span.covers(a.span));
        out
    }

    /// Concept annotations of any group, sorted by span.
    #[must_use]
    pub fn concepts(&self) -> Vec<Annotation> {
        let mut out: Vec<_> = self
            .annotations
            .iter()
            .filter(|a| matches!(a.kind, AnnotationKind::Concept(_)))
            .cloned()
            .collect();
        out.sort_by_key(|a| a.span);
        out
    }

    /// Text covered by `span`, or `""` when out of range.
    #[must_use]
    pub fn covered(&self, span: Span) -> &str {
        span.slice(&self.text).unwrap_or_default()
    }

    /// Copies the current state into a standalone result.
    #[must_use]
    pub fn snapshot(&self) -> AnnotationResult {
        AnnotationResult {
            text: self.text.clone(),
            annotations: self.annotations.clone(),
            relations: self.relations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_across_annotations_and_relations() {
        let mut doc = AnalysisDocument::new();
        doc.load("a b");
        let a = doc.annotate(AnnotationKind::Token, Span::new(0, 1), BTreeMap::new());
        let b = doc.annotate(AnnotationKind::Token, Span::new(2, 3), BTreeMap::new());
        let r = doc.relate(RelationKind::Dependency, a, b, "dep");
        assert_eq!((a, b, r), (1, 2, 3));
    }

    #[test]
    fn load_clears_previous_document() {
        let mut doc = AnalysisDocument::new();
        doc.load("first");
        doc.annotate(AnnotationKind::Token, Span::new(0, 5), BTreeMap::new());
        doc.load("second");
        assert_eq!(doc.text(), "second");
        assert!(doc.select(AnnotationKind::Token).is_empty());
        let id = doc.annotate(AnnotationKind::Token, Span::new(0, 6), BTreeMap::new());
        assert_eq!(id, 1);
    }

    #[test]
    fn clear_leaves_document_clear() {
        let mut doc = AnalysisDocument::new();
        doc.load("x");
        doc.annotate(AnnotationKind::Segment, Span::new(0, 1), BTreeMap::new());
        doc.clear();
        assert!(doc.is_clear());
    }

    #[test]
    fn set_feature_updates_existing_annotation() {
        let mut doc = AnalysisDocument::new();
        doc.load("aspirin");
        let id = doc.annotate(AnnotationKind::Token, Span::new(0, 7), BTreeMap::new());
        doc.set_feature(id, "pos", "NN");
        assert_eq!(doc.select(AnnotationKind::Token)[0].feature("pos"), Some("NN"));
    }

    #[test]
    fn select_is_sorted_by_span() {
        let mut doc = AnalysisDocument::new();
        doc.load("ab cd");
        doc.annotate(AnnotationKind::Token, Span::new(3, 5), BTreeMap::new());
        doc.annotate(AnnotationKind::Token, Span::new(0, 2), BTreeMap::new());
        let spans: Vec<_> = doc.select(AnnotationKind::Token).iter().map(|a| a.span).collect();
        assert_eq!(spans, vec![Span::new(0, 2), Span::new(3, 5)]);
    }
}
