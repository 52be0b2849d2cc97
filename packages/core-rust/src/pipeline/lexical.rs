//! Lexical stages: segmentation, sentence detection, tokenization, normalization.

use std::collections::BTreeMap;

use regex::Regex;

use super::document::AnalysisDocument;
use super::AnnotationStage;
use crate::annotation::{AnnotationKind, Span};
use crate::error::ProcessingError;

/// Token pattern: words with inner apostrophes/hyphens, numbers with inner
/// separators (dates, decimals, ratios), or any other single non-space char.
const TOKEN_PATTERN: &str = r"[A-Za-z]+(?:['-][A-Za-z]+)*|\d+(?:[.,:/-]\d+)*|[^\sA-Za-z\d]";

/// Words whose trailing period does not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "dr", "mr", "mrs", "ms", "prof", "sr", "jr", "st", "vs", "approx", "e.g", "i.e", "no",
];

// ---------------------------------------------------------------------------
// Segmenter
// ---------------------------------------------------------------------------

/// Covers the whole document with a single segment.
pub struct SimpleSegmenter;

impl SimpleSegmenter {
    pub const NAME: &'static str = "segmenter";
    pub const SEGMENT_ID: &'static str = "SIMPLE_SEGMENT";
}

impl AnnotationStage for SimpleSegmenter {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        let len = doc.text().len();
        if len > 0 {
            let features = BTreeMap::from([("segment_id", Self::SEGMENT_ID.to_string())]);
            doc.annotate(AnnotationKind::Segment, Span::new(0, len), features);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sentence detector
// ---------------------------------------------------------------------------

/// Splits segments into sentences at terminal punctuation followed by
/// whitespace, and at line breaks.
pub struct SentenceDetector;

impl SentenceDetector {
    pub const NAME: &'static str = "sentence-detector";
}

impl AnnotationStage for SentenceDetector {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for segment in doc.select(AnnotationKind::Segment) {
            let text = doc.covered(segment.span).to_string();
            for (begin, end) in sentence_bounds(&text) {
                let span = Span::new(segment.span.begin + begin, segment.span.begin + end);
                doc.annotate(AnnotationKind::Sentence, span, BTreeMap::new());
            }
        }
        Ok(())
    }
}

/// Byte ranges of the sentences in `text`, trimmed of surrounding whitespace.
fn sentence_bounds(text: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start = 0;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    for (i, &(at, c)) in chars.iter().enumerate() {
        let boundary_end = match c {
            '\n' | '\r' => Some(at),
            '.' | '!' | '?' => {
                let next = chars.get(i + 1).map(|&(_, n)| n);
                let at_break = next.is_none_or(char::is_whitespace);
                if at_break && !(c == '.' && ends_with_abbreviation(&text[start..at])) {
                    Some(at + c.len_utf8())
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(end) = boundary_end {
            push_trimmed(&mut out, text, start, end);
            start = end;
        }
    }
    push_trimmed(&mut out, text, start, text.len());
    out
}

fn push_trimmed(out: &mut Vec<(usize, usize)>, text: &str, start: usize, end: usize) {
    let slice = &text[start..end];
    let trimmed_start = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        let begin = start + trimmed_start;
        out.push((begin, begin + trimmed.len()));
    }
}

fn ends_with_abbreviation(before: &str) -> bool {
    let last = before
        .rsplit(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if last.len() == 1 && last.chars().all(|c| c.is_ascii_alphabetic()) {
        // Single initials ("J. Smith").
        return true;
    }
    ABBREVIATIONS.contains(&last.as_str())
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Penn-Treebank-style tokenizer applied per sentence.
pub struct Tokenizer {
    pattern: Regex,
    max_tokens_per_sentence: usize,
}

impl Tokenizer {
    pub const NAME: &'static str = "tokenizer";

    /// # Errors
    ///
    /// Returns the compile error if the token pattern is invalid.
    pub fn new(max_tokens_per_sentence: usize) -> Result<Self, regex::Error> {
        let pattern = Regex::new(TOKEN_PATTERN)?;
        Ok(Self {
            pattern,
            max_tokens_per_sentence,
        })
    }
}

impl AnnotationStage for Tokenizer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let text = doc.covered(sentence.span).to_string();
            let found: Vec<_> = self.pattern.find_iter(&text).collect();
            if found.len() > self.max_tokens_per_sentence {
                return Err(ProcessingError::new(
                    Self::NAME,
                    format!(
                        "sentence at {} has {} tokens, limit is {}",
                        sentence.span.begin,
                        found.len(),
                        self.max_tokens_per_sentence
                    ),
                ));
            }
            for m in found {
                let kind = token_kind(m.as_str());
                let span = Span::new(sentence.span.begin + m.start(), sentence.span.begin + m.end());
                let features = BTreeMap::from([("kind", kind.to_string())]);
                doc.annotate(AnnotationKind::Token, span, features);
            }
        }
        Ok(())
    }
}

fn token_kind(token: &str) -> &'static str {
    match token.chars().next() {
        Some(c) if c.is_ascii_digit() => "number",
        Some(c) if c.is_alphabetic() => "word",
        _ => "punct",
    }
}

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Adds a lower-cased, lemmatized `norm` feature to every token.
pub struct Normalizer;

impl Normalizer {
    pub const NAME: &'static str = "normalizer";
}

impl AnnotationStage for Normalizer {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for token in doc.select(AnnotationKind::Token) {
            let norm = normalize_word(doc.covered(token.span));
            doc.set_feature(token.id, "norm", norm);
        }
        Ok(())
    }
}

/// Lower-cases and reduces common inflections to a base form.
#[must_use]
pub fn normalize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if let Some(base) = irregular_base(&lower) {
        return base.to_string();
    }
    if !lower.chars().all(char::is_alphabetic) || lower.len() <= 3 {
        return lower;
    }
    if let Some(stem) = lower.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if let Some(stem) = lower.strip_suffix("sses") {
        return format!("{stem}ss");
    }
    if lower.ends_with('s')
        && !lower.ends_with("ss")
        && !lower.ends_with("us")
        && !lower.ends_with("is")
    {
        return lower[..lower.len() - 1].to_string();
    }
    lower
}

fn irregular_base(word: &str) -> Option<&'static str> {
    Some(match word {
        "is" | "are" | "was" | "were" | "been" | "being" | "am" => "be",
        "has" | "had" | "having" => "have",
        "does" | "did" | "done" => "do",
        "took" | "taken" | "taking" => "take",
        "gave" | "given" | "giving" => "give",
        "denies" | "denied" | "denying" => "deny",
        "feet" => "foot",
        "teeth" => "tooth",
        "women" => "woman",
        "men" => "man",
        "children" => "child",
        _ => return None,
    })
}
