//! Temporal stages: time expressions, events, document-time relations and
//! event/time links.

use std::collections::BTreeMap;

use regex::Regex;

use super::document::AnalysisDocument;
use super::AnnotationStage;
use crate::annotation::{Annotation, AnnotationKind, RelationKind, SemanticGroup, Span};
use crate::error::ProcessingError;

/// `(class, pattern)`; matched case-insensitively against each sentence.
const TIME_PATTERNS: &[(&str, &str)] = &[
    (
        "SET",
        r"\b(?:(?:once|twice|\d+\s+times)\s+)?(?:a|per|each|every)\s+(?:day|night|week|month|year|morning|evening)\b",
    ),
    (
        "SET",
        r"\b(?:daily|nightly|weekly|monthly|yearly|annually|hourly|bid|tid|qid|qd|qhs|prn)\b",
    ),
    ("DATE", r"\b\d{1,2}[-/]\d{1,2}[-/]\d{2,4}\b"),
    ("DATE", r"\b\d{4}-\d{2}-\d{2}\b"),
    (
        "DATE",
        r"\b(?:today|yesterday|tomorrow|tonight|(?:last|next|this)\s+(?:week|month|year|night|morning))\b",
    ),
    ("DURATION", r"\b\d+[-\s](?:minute|hour|day|week|month|year)s?\b"),
    ("TIME", r"\b\d{1,2}:\d{2}(?:\s*[ap]\.?m\.?)?\b"),
    ("TIME", r"\b(?:now|currently|recently)\b"),
];

// ---------------------------------------------------------------------------
// Time annotator
// ---------------------------------------------------------------------------

/// Marks time expressions, each with a `class` feature (DATE, TIME, DURATION,
/// SET). Overlapping matches keep the earliest, longest one.
pub struct TimeAnnotator {
    patterns: Vec<(&'static str, Regex)>,
}

impl TimeAnnotator {
    pub const NAME: &'static str = "time-annotator";

    /// # Errors
    ///
    /// Returns the compile error of the first invalid pattern.
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = TIME_PATTERNS
            .iter()
            .map(|&(class, pattern)| {
                Regex::new(&format!("(?i){pattern}")).map(|re| (class, re))
            })
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }
}

impl AnnotationStage for TimeAnnotator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let text = doc.covered(sentence.span).to_string();
            let base = sentence.span.begin;
            let mut found: Vec<(Span, &'static str)> = self
                .patterns
                .iter()
                .flat_map(|(class, re)| {
                    re.find_iter(&text)
                        .map(move |m| (Span::new(base + m.start(), base + m.end()), *class))
                })
                .collect();
            found.sort_by(|(a, _), (b, _)| a.begin.cmp(&b.begin).then(b.len().cmp(&a.len())));

            let mut last_end = 0;
            for (span, class) in found {
                if span.begin < last_end {
                    continue;
                }
                last_end = span.end;
                let features = BTreeMap::from([("class", class.to_string())]);
                doc.annotate(AnnotationKind::TimeMention, span, features);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Event annotator
// ---------------------------------------------------------------------------

/// Creates event mentions for clinical concepts and verbal predicates and
/// assigns each a `doc_time_rel` (BEFORE, OVERLAP, AFTER, BEFORE/OVERLAP).
pub struct EventAnnotator;

impl EventAnnotator {
    pub const NAME: &'static str = "event-annotator";
}

/// Tense of a sentence's predicate relative to the document creation time.
fn sentence_tense(tokens: &[Annotation]) -> &'static str {
    let Some(root) = tokens
        .iter()
        .position(|t| t.feature("deprel") == Some("ROOT") && is_verb(t))
    else {
        return "OVERLAP";
    };
    let before = &tokens[..root];
    if before.iter().any(|t| t.feature("norm") == Some("will")) {
        return "AFTER";
    }
    let has_aux = |tag: &str| before.iter().any(|t| t.feature("pos") == Some(tag));
    match tokens[root].feature("pos") {
        Some("VBN") if has_aux("VBZ") || has_aux("VBP") => "BEFORE/OVERLAP",
        Some("VBG") if has_aux("VBZ") || has_aux("VBP") => "OVERLAP",
        Some("VBD" | "VBN") => "BEFORE",
        Some("VBG") if has_aux("VBD") => "BEFORE",
        _ if has_aux("VBD") => "BEFORE",
        _ => "OVERLAP",
    }
}

fn is_verb(token: &Annotation) -> bool {
    token.feature("pos").is_some_and(|p| p.starts_with("VB"))
}

fn is_event_group(group: SemanticGroup) -> bool {
    !matches!(group, SemanticGroup::Anatomy)
}

impl AnnotationStage for EventAnnotator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        let concepts = doc.concepts();
        for sentence in doc.select(AnnotationKind::Sentence) {
            let tokens = doc.select_covered(AnnotationKind::Token, sentence.span);
            let tense = sentence_tense(&tokens);

            if let Some(root) = tokens
                .iter()
                .find(|t| t.feature("deprel") == Some("ROOT") && is_verb(t))
            {
                let features = BTreeMap::from([
                    ("doc_time_rel", tense.to_string()),
                    ("source", "predicate".to_string()),
                    ("polarity", "1".to_string()),
                ]);
                doc.annotate(AnnotationKind::EventMention, root.span, features);
            }

            let mut seen: Vec<Span> = Vec::new();
            for concept in concepts.iter().filter(|c| sentence.span.covers(c.span)) {
                let AnnotationKind::Concept(group) = concept.kind else {
                    continue;
                };
                if !is_event_group(group) || seen.contains(&concept.span) {
                    continue;
                }
                seen.push(concept.span);
                let mut features = BTreeMap::from([
                    ("doc_time_rel", tense.to_string()),
                    ("source", "concept".to_string()),
                ]);
                for name in ["polarity", "uncertainty", "history_of"] {
                    if let Some(value) = concept.feature(name) {
                        features.insert(name, value.to_string());
                    }
                }
                if concept.feature("history_of") == Some("1") {
                    features.insert("doc_time_rel", "BEFORE".to_string());
                }
                doc.annotate(AnnotationKind::EventMention, concept.span, features);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Temporal relations
// ---------------------------------------------------------------------------

/// Links events to times and to the sentence predicate.
///
/// - time/event: `CONTAINS` (DATE, TIME, DURATION) or `OVERLAP` (SET), time is
///   the source.
/// - event/event: predicate event `OVERLAP` each concept event in its sentence.
pub struct TemporalRelations;

impl TemporalRelations {
    pub const NAME: &'static str = "temporal-relations";
}

impl AnnotationStage for TemporalRelations {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let events = doc.select_covered(AnnotationKind::EventMention, sentence.span);
            let times = doc.select_covered(AnnotationKind::TimeMention, sentence.span);

            for time in &times {
                let label = if time.feature("class") == Some("SET") {
                    "OVERLAP"
                } else {
                    "CONTAINS"
                };
                for event in &events {
                    doc.relate(RelationKind::TemporalLink, time.id, event.id, label);
                }
            }

            let predicate = events.iter().find(|e| e.feature("source") == Some("predicate"));
            if let Some(predicate) = predicate {
                for event in events.iter().filter(|e| e.feature("source") == Some("concept")) {
                    doc.relate(RelationKind::TemporalLink, predicate.id, event.id, "OVERLAP");
                }
            }
        }
        Ok(())
    }
}
