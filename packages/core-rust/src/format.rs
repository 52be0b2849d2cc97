//! Rendering of annotation results to string artifacts.
//!
//! Two formats exist and the set is closed:
//!
//! - [`OutputFormat::Structured`] (default): an XML document holding the text,
//!   every annotation with its features and every relation.
//! - [`OutputFormat::FlattenedText`]: a per-sentence, human-readable view.
//!
//! Rendering is a pure function of the result.

use std::collections::HashSet;
use std::fmt::Write;
use std::str::FromStr;

use crate::annotation::{AnnotationKind, AnnotationResult};
use crate::error::FormatError;

/// Version attribute written on the root element of structured output.
pub const STRUCTURED_VERSION: &str = "1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Structured,
    FlattenedText,
}

impl OutputFormat {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::FlattenedText => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown output format '{0}' (expected structured|xml|text|pretty)")]
pub struct UnknownFormat(pub String);

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "structured" | "xml" => Ok(Self::Structured),
            "text" | "pretty" | "flattened" => Ok(Self::FlattenedText),
            other => Err(UnknownFormat(other.to_string())),
        }
    }
}

/// Renders `result` in the requested format.
///
/// # Errors
///
/// Returns [`FormatError`] if the result is internally inconsistent (a span
/// outside the text, a relation pointing at a missing annotation).
pub fn render(result: &AnnotationResult, format: OutputFormat) -> Result<String, FormatError> {
    validate(result)?;
    match format {
        OutputFormat::Structured => render_structured(result),
        OutputFormat::FlattenedText => render_flattened(result),
    }
}

fn validate(result: &AnnotationResult) -> Result<(), FormatError> {
    let mut ids = HashSet::with_capacity(result.annotations.len());
    for ann in &result.annotations {
        if ann.span.slice(&result.text).is_none() {
            return Err(FormatError::SpanOutOfBounds {
                annotation: ann.id,
                begin: ann.span.begin,
                end: ann.span.end,
            });
        }
        ids.insert(ann.id);
    }
    for rel in &result.relations {
        for endpoint in [rel.source, rel.target] {
            if !ids.contains(&endpoint) {
                return Err(FormatError::DanglingReference {
                    relation: rel.id,
                    annotation: endpoint,
                });
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Structured (XML)
// ---------------------------------------------------------------------------

fn render_structured(result: &AnnotationResult) -> Result<String, FormatError> {
    let mut out = String::with_capacity(256 + result.text.len() * 8);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    writeln!(out, "<result version=\"{STRUCTURED_VERSION}\">")?;
    writeln!(
        out,
        "  <document length=\"{}\">{}</document>",
        result.text.len(),
        escape(&result.text)
    )?;

    out.push_str("  <annotations>\n");
    for ann in &result.annotations {
        write!(
            out,
            "    <{} id=\"{}\" begin=\"{}\" end=\"{}\"",
            ann.kind.type_name(),
            ann.id,
            ann.span.begin,
            ann.span.end
        )?;
        for (name, value) in &ann.features {
            write!(out, " {name}=\"{}\"", escape(value))?;
        }
        out.push_str("/>\n");
    }
    out.push_str("  </annotations>\n");

    out.push_str("  <relations>\n");
    for rel in &result.relations {
        writeln!(
            out,
            "    <{} id=\"{}\" source=\"{}\" target=\"{}\" label=\"{}\"/>",
            rel.kind.type_name(),
            rel.id,
            rel.source,
            rel.target,
            escape(&rel.label)
        )?;
    }
    out.push_str("  </relations>\n");
    out.push_str("</result>\n");
    Ok(out)
}

/// Escapes XML special characters for use in text and attribute values.
#[must_use]
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            '\t' => out.push_str("&#9;"),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Flattened text
// ---------------------------------------------------------------------------

fn render_flattened(result: &AnnotationResult) -> Result<String, FormatError> {
    let mut out = String::new();
    for sentence in result.select(AnnotationKind::Sentence) {
        writeln!(out, "{}", result.covered_text(sentence).trim())?;

        let tokens: Vec<String> = result
            .select_covered(AnnotationKind::Token, sentence.span)
            .map(|t| {
                let pos = t.feature("pos").unwrap_or("?");
                format!("{}[{pos}]", result.covered_text(t))
            })
            .collect();
        if !tokens.is_empty() {
            writeln!(out, "  {}", tokens.join(" "))?;
        }

        for ann in &result.annotations {
            let listed = matches!(
                ann.kind,
                AnnotationKind::Concept(_) | AnnotationKind::TimeMention | AnnotationKind::EventMention
            );
            if !listed || !sentence.span.covers(ann.span) {
                continue;
            }
            write!(out, "  {} \"{}\"", ann.kind.type_name(), result.covered_text(ann))?;
            for (name, value) in &ann.features {
                write!(out, " {name}={value}")?;
            }
            out.push('\n');
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::annotation::{Annotation, Relation, RelationKind, SemanticGroup, Span};

    fn sample() -> AnnotationResult {
        let text = "Patient takes aspirin daily.".to_string();
        let mut pos = BTreeMap::new();
        pos.insert("pos", "NN".to_string());
        AnnotationResult {
            text,
            annotations: vec![
                Annotation {
                    id: 1,
                    kind: AnnotationKind::Sentence,
                    span: Span::new(0, 28),
                    features: BTreeMap::new(),
                },
                Annotation {
                    id: 2,
                    kind: AnnotationKind::Token,
                    span: Span::new(14, 21),
                    features: pos,
                },
                Annotation {
                    id: 3,
                    kind: AnnotationKind::Concept(SemanticGroup::Drug),
                    span: Span::new(14, 21),
                    features: BTreeMap::from([("polarity", "1".to_string())]),
                },
            ],
            relations: vec![Relation {
                id: 4,
                kind: RelationKind::Dependency,
                source: 1,
                target: 2,
                label: "dobj".to_string(),
            }],
        }
    }

    #[test]
    fn parses_format_names() {
        assert_eq!("XML".parse::<OutputFormat>().unwrap(), OutputFormat::Structured);
        assert_eq!("pretty".parse::<OutputFormat>().unwrap(), OutputFormat::FlattenedText);
        assert!("yaml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::Structured);
    }

    #[test]
    fn structured_output_contains_all_parts() {
        let xml = render(&sample(), OutputFormat::Structured).unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<result version=\"1.0\">"));
        assert!(xml.contains("<MedicationMention id=\"3\" begin=\"14\" end=\"21\" polarity=\"1\"/>"));
        assert!(xml.contains("label=\"dobj\""));
        assert!(xml.trim_end().ends_with("</result>"));
    }

    #[test]
    fn flattened_output_lists_sentence_tokens_and_concepts() {
        let text = render(&sample(), OutputFormat::FlattenedText).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Patient takes aspirin daily.");
        assert_eq!(lines[1], "  aspirin[NN]");
        assert_eq!(lines[2], "  MedicationMention \"aspirin\" polarity=1");
    }

    #[test]
    fn flattened_output_of_empty_result_is_empty() {
        let text = render(&AnnotationResult::empty("abc"), OutputFormat::FlattenedText).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn dangling_relation_is_rejected() {
        let mut result = sample();
        result.relations[0].target = 99;
        let err = render(&result, OutputFormat::Structured).unwrap_err();
        assert!(matches!(
            err,
            FormatError::DanglingReference { relation: 4, annotation: 99 }
        ));
    }

    #[test]
    fn out_of_bounds_span_is_rejected() {
        let mut result = sample();
        result.annotations[1].span = Span::new(20, 200);
        assert!(matches!(
            render(&result, OutputFormat::FlattenedText),
            Err(FormatError::SpanOutOfBounds { annotation: 2, .. })
        ));
    }

    #[test]
    fn escape_handles_markup_characters() {
        assert_eq!(escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
        assert_eq!(escape("x\ny"), "x&#10;y");
    }

    proptest! {
        #[test]
        fn escaped_text_has_no_raw_markup(input in ".{0,64}") {
            let escaped = escape(&input);
            prop_assert!(!escaped.contains('<'));
            prop_assert!(!escaped.contains('>'));
            prop_assert!(!escaped.contains('"'));
        }
    }
}
