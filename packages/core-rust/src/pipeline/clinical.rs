//! Clinical stages: dictionary concept lookup and assertion (polarity,
//! uncertainty, history) attributes.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::dictionary::Dictionary;
use super::document::AnalysisDocument;
use super::AnnotationStage;
use crate::annotation::{AnnotationKind, Span};
use crate::error::ProcessingError;

/// Tokens before a concept that the assertion cues are searched in.
const CUE_WINDOW: usize = 6;

const NEGATION_CUES: &[&str] = &["no", "not", "deny", "without", "negative", "never", "none", "absent"];
const UNCERTAINTY_CUES: &[&str] = &[
    "possible", "possibly", "probable", "probably", "likely", "may", "might", "suspect",
    "suspected", "questionable", "concern", "?",
];
const HISTORY_CUES: &[&str] = &["history", "hx", "previous", "prior"];
/// Cues do not reach across these.
const SCOPE_BREAKS: &[&str] = &["but", "however", "although", ";", ","];

// ---------------------------------------------------------------------------
// Dictionary lookup
// ---------------------------------------------------------------------------

/// Finds dictionary terms inside lookup windows.
///
/// Every match is annotated, so a window such as "knee pain" yields both the
/// finding and the nested anatomical site.
pub struct DictionaryLookup {
    dictionary: Arc<Dictionary>,
}

impl DictionaryLookup {
    pub const NAME: &'static str = "dictionary-lookup";

    #[must_use]
    pub fn new(dictionary: Arc<Dictionary>) -> Self {
        Self { dictionary }
    }
}

impl AnnotationStage for DictionaryLookup {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for window in doc.select(AnnotationKind::LookupWindow) {
            let tokens = doc.select_covered(AnnotationKind::Token, window.span);
            let norms: Vec<&str> = tokens
                .iter()
                .map(|t| t.feature("norm").unwrap_or_default())
                .collect();

            let mut found = Vec::new();
            for start in 0..tokens.len() {
                for entry in self.dictionary.matches_at(&norms[start..]) {
                    let end = start + entry.words.len() - 1;
                    let span = Span::new(tokens[start].span.begin, tokens[end].span.end);
                    found.push((entry.group, span, entry.preferred.clone()));
                }
            }

            for (group, span, preferred) in found {
                let features = BTreeMap::from([
                    ("preferred_text", preferred),
                    ("polarity", "1".to_string()),
                    ("uncertainty", "0".to_string()),
                    ("history_of", "0".to_string()),
                ]);
                doc.annotate(AnnotationKind::Concept(group), span, features);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Assertion
// ---------------------------------------------------------------------------

/// Sets `polarity`, `uncertainty` and `history_of` on concepts from cue words
/// preceding them in the same sentence.
pub struct AssertionAnnotator;

impl AssertionAnnotator {
    pub const NAME: &'static str = "assertion";
}

impl AnnotationStage for AssertionAnnotator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        let sentences = doc.select(AnnotationKind::Sentence);
        for concept in doc.concepts() {
            let Some(sentence) = sentences.iter().find(|s| s.span.covers(concept.span)) else {
                continue;
            };
            let preceding: Vec<String> = doc
                .select_covered(AnnotationKind::Token, sentence.span)
                .into_iter()
                .filter(|t| t.span.end <= concept.span.begin)
                .map(|t| t.feature("norm").unwrap_or_default().to_string())
                .collect();
            let scope: Vec<&str> = preceding
                .iter()
                .rev()
                .take(CUE_WINDOW)
                .map(String::as_str)
                .take_while(|w| !SCOPE_BREAKS.contains(w))
                .collect();

            if scope.iter().any(|w| NEGATION_CUES.contains(w)) {
                doc.set_feature(concept.id, "polarity", "-1");
            }
            if scope.iter().any(|w| UNCERTAINTY_CUES.contains(w)) {
                doc.set_feature(concept.id, "uncertainty", "1");
            }
            if scope.iter().any(|w| HISTORY_CUES.contains(w)) {
                doc.set_feature(concept.id, "history_of", "1");
            }
        }
        Ok(())
    }
}
