//! Syntactic stages: part-of-speech tagging, chunking, lookup windows,
//! dependency parsing and semantic role labeling.
//!
//! All of these are deterministic heuristics over the token stream; they aim
//! for plausible structure on short clinical sentences, not treebank accuracy.

use std::collections::{BTreeMap, HashMap};

use super::document::AnalysisDocument;
use super::AnnotationStage;
use crate::annotation::{Annotation, AnnotationId, AnnotationKind, RelationKind, Span};
use crate::error::ProcessingError;

const LEXICON: &[(&str, &str)] = &[
    ("a", "DT"), ("an", "DT"), ("the", "DT"), ("this", "DT"), ("that", "DT"),
    ("these", "DT"), ("those", "DT"), ("every", "DT"), ("each", "DT"), ("no", "DT"),
    ("any", "DT"), ("some", "DT"),
    ("i", "PRP"), ("he", "PRP"), ("she", "PRP"), ("it", "PRP"), ("we", "PRP"),
    ("they", "PRP"), ("you", "PRP"), ("him", "PRP"), ("them", "PRP"),
    ("her", "PRP$"), ("his", "PRP$"), ("my", "PRP$"), ("their", "PRP$"), ("its", "PRP$"),
    ("our", "PRP$"), ("your", "PRP$"),
    ("of", "IN"), ("in", "IN"), ("on", "IN"), ("at", "IN"), ("for", "IN"),
    ("with", "IN"), ("without", "IN"), ("from", "IN"), ("by", "IN"), ("as", "IN"),
    ("after", "IN"), ("before", "IN"), ("since", "IN"), ("during", "IN"), ("per", "IN"),
    ("into", "IN"), ("about", "IN"), ("due", "IN"), ("because", "IN"), ("if", "IN"),
    ("to", "TO"),
    ("and", "CC"), ("or", "CC"), ("but", "CC"), ("nor", "CC"),
    ("may", "MD"), ("might", "MD"), ("will", "MD"), ("would", "MD"), ("should", "MD"),
    ("can", "MD"), ("could", "MD"), ("must", "MD"), ("shall", "MD"),
    ("is", "VBZ"), ("are", "VBP"), ("am", "VBP"), ("was", "VBD"), ("were", "VBD"),
    ("be", "VB"), ("been", "VBN"), ("being", "VBG"),
    ("has", "VBZ"), ("have", "VBP"), ("had", "VBD"),
    ("does", "VBZ"), ("do", "VBP"), ("did", "VBD"),
    ("takes", "VBZ"), ("take", "VB"), ("took", "VBD"), ("taken", "VBN"),
    ("denies", "VBZ"), ("deny", "VBP"), ("denied", "VBD"),
    ("reports", "VBZ"), ("reported", "VBD"), ("complains", "VBZ"), ("presents", "VBZ"),
    ("agrees", "VBZ"), ("agreed", "VBD"), ("drinks", "VBZ"), ("drink", "VB"),
    ("eats", "VBZ"), ("eat", "VB"), ("needs", "VBZ"), ("need", "VB"),
    ("help", "VB"), ("promote", "VB"), ("want", "VB"), ("wants", "VBZ"),
    ("gave", "VBD"), ("given", "VBN"), ("received", "VBD"), ("prescribed", "VBN"),
    ("started", "VBD"), ("stopped", "VBD"), ("continue", "VB"), ("continues", "VBZ"),
    ("not", "RB"), ("never", "RB"), ("also", "RB"), ("well", "RB"), ("twice", "RB"),
    ("once", "RB"), ("very", "RB"), ("still", "RB"), ("now", "RB"),
];

fn is_noun(tag: &str) -> bool {
    tag.starts_with("NN")
}

fn is_verb(tag: &str) -> bool {
    tag.starts_with("VB")
}

fn is_nominal_head(tag: &str) -> bool {
    is_noun(tag) || tag == "PRP" || tag == "CD"
}

fn pos(token: &Annotation) -> &str {
    token.feature("pos").unwrap_or("NN")
}

// ---------------------------------------------------------------------------
// POS tagger
// ---------------------------------------------------------------------------

/// Lexicon-plus-suffix part-of-speech tagger writing the `pos` feature.
pub struct PosTagger {
    lexicon: HashMap<&'static str, &'static str>,
}

impl PosTagger {
    pub const NAME: &'static str = "pos-tagger";

    #[must_use]
    pub fn new() -> Self {
        Self {
            lexicon: LEXICON.iter().copied().collect(),
        }
    }

    fn tag(&self, word: &str, sentence_initial: bool) -> String {
        let lower = word.to_lowercase();
        if let Some(tag) = self.lexicon.get(lower.as_str()) {
            return (*tag).to_string();
        }
        let first = word.chars().next().unwrap_or(' ');
        if first.is_ascii_digit() {
            return "CD".to_string();
        }
        if !first.is_alphabetic() {
            return match word {
                "." | "!" | "?" => ".".to_string(),
                "," => ",".to_string(),
                "(" | "[" => "-LRB-".to_string(),
                ")" | "]" => "-RRB-".to_string(),
                _ => ":".to_string(),
            };
        }
        let tag = if lower.ends_with("ly") {
            "RB"
        } else if lower.ends_with("ing") && lower.len() > 5 {
            "VBG"
        } else if lower.ends_with("ed") && lower.len() > 4 {
            "VBD"
        } else if ["ous", "ful", "ive", "ical", "able", "ible", "less"]
            .iter()
            .any(|s| lower.ends_with(s))
        {
            "JJ"
        } else if first.is_uppercase() && !sentence_initial {
            "NNP"
        } else if lower.len() > 3
            && lower.ends_with('s')
            && !lower.ends_with("ss")
            && !lower.ends_with("us")
            && !lower.ends_with("is")
        {
            "NNS"
        } else {
            "NN"
        };
        tag.to_string()
    }
}

impl Default for PosTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationStage for PosTagger {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let tokens = doc.select_covered(AnnotationKind::Token, sentence.span);
            for (i, token) in tokens.iter().enumerate() {
                let tag = self.tag(doc.covered(token.span), i == 0);
                doc.set_feature(token.id, "pos", tag);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

/// Groups tagged tokens into NP, VP and PP chunks.
pub struct Chunker;

impl Chunker {
    pub const NAME: &'static str = "chunker";
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ChunkType {
    Noun,
    Verb,
    Prep,
}

impl ChunkType {
    fn label(self) -> &'static str {
        match self {
            Self::Noun => "NP",
            Self::Verb => "VP",
            Self::Prep => "PP",
        }
    }

    fn of(tag: &str) -> Option<Self> {
        match tag {
            t if is_nominal_head(t) => Some(Self::Noun),
            "DT" | "JJ" | "JJR" | "JJS" | "PRP$" => Some(Self::Noun),
            "MD" => Some(Self::Verb),
            t if is_verb(t) => Some(Self::Verb),
            "IN" | "TO" => Some(Self::Prep),
            _ => None,
        }
    }
}

struct OpenChunk {
    kind: ChunkType,
    span: Span,
    has_head: bool,
}

impl AnnotationStage for Chunker {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let tokens = doc.select_covered(AnnotationKind::Token, sentence.span);
            let mut chunks: Vec<OpenChunk> = Vec::new();
            let mut open: Option<OpenChunk> = None;

            for token in &tokens {
                let tag = pos(token);
                let kind = ChunkType::of(tag);
                let starts_np = matches!(tag, "DT" | "PRP$");
                let extend = match (&open, kind) {
                    (Some(c), Some(k)) => {
                        c.kind == k && k != ChunkType::Prep && !(starts_np && c.has_head)
                    }
                    _ => false,
                };
                if extend {
                    if let Some(c) = open.as_mut() {
                        c.span.end = token.span.end;
                        c.has_head |= is_nominal_head(tag) || is_verb(tag);
                    }
                    continue;
                }
                if let Some(c) = open.take() {
                    chunks.push(c);
                }
                open = kind.map(|k| OpenChunk {
                    kind: k,
                    span: token.span,
                    has_head: is_nominal_head(tag) || is_verb(tag) || k == ChunkType::Prep,
                });
            }
            if let Some(c) = open.take() {
                chunks.push(c);
            }

            for chunk in chunks.into_iter().filter(|c| c.has_head) {
                let features = BTreeMap::from([("chunk_type", chunk.kind.label().to_string())]);
                doc.annotate(AnnotationKind::Chunk, chunk.span, features);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Lookup windows
// ---------------------------------------------------------------------------

/// Derives dictionary lookup windows from noun-phrase chunks, dropping
/// windows nested inside a larger one.
pub struct LookupWindows;

impl LookupWindows {
    pub const NAME: &'static str = "lookup-windows";
}

impl AnnotationStage for LookupWindows {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        let spans: Vec<Span> = doc
            .select(AnnotationKind::Chunk)
            .into_iter()
            .filter(|c| c.feature("chunk_type") == Some("NP"))
            .map(|c| c.span)
            .collect();
        for (i, span) in spans.iter().enumerate() {
            let nested = spans
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && other.covers(*span) && other != span);
            if !nested {
                doc.annotate(AnnotationKind::LookupWindow, *span, BTreeMap::new());
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dependency parser
// ---------------------------------------------------------------------------

/// Rule-based dependency parser.
///
/// Writes `deprel` and `head` features on every token and a
/// [`RelationKind::Dependency`] relation from head to dependent.
pub struct DependencyParser;

impl DependencyParser {
    pub const NAME: &'static str = "dependency-parser";
}

struct DepArc {
    head: AnnotationId,
    dependent: AnnotationId,
    label: &'static str,
}

/// Index of the main predicate: the last verb of the first verb group.
fn find_root(tokens: &[Annotation]) -> Option<usize> {
    let first = tokens.iter().position(|t| is_verb(pos(t)))?;
    let mut root = first;
    for (i, t) in tokens.iter().enumerate().skip(first + 1) {
        let tag = pos(t);
        if is_verb(tag) {
            root = i;
        } else if tag != "RB" {
            break;
        }
    }
    Some(root)
}

/// Token index ranges of NP chunks within the sentence.
fn noun_phrases(tokens: &[Annotation], chunks: &[Annotation]) -> Vec<(usize, usize)> {
    chunks
        .iter()
        .filter(|c| c.feature("chunk_type") == Some("NP"))
        .filter_map(|c| {
            let start = tokens.iter().position(|t| c.span.covers(t.span))?;
            let end = tokens.iter().rposition(|t| c.span.covers(t.span))?;
            Some((start, end))
        })
        .collect()
}

fn np_head(tokens: &[Annotation], (start, end): (usize, usize)) -> usize {
    (start..=end)
        .rev()
        .find(|&i| is_nominal_head(pos(&tokens[i])))
        .unwrap_or(end)
}

fn modifier_label(tag: &str) -> &'static str {
    match tag {
        "DT" => "det",
        "PRP$" => "poss",
        "CD" => "nummod",
        t if is_noun(t) => "compound",
        _ => "amod",
    }
}

fn parse_sentence(tokens: &[Annotation], chunks: &[Annotation]) -> (Option<usize>, Vec<DepArc>) {
    let nps = noun_phrases(tokens, chunks);
    let root = find_root(tokens).or_else(|| nps.first().map(|&np| np_head(tokens, np)));
    let Some(root) = root else {
        return (None, Vec::new());
    };
    let mut labels: Vec<Option<(usize, &'static str)>> = vec![None; tokens.len()];

    let mut object_taken = false;
    for &np in &nps {
        let head = np_head(tokens, np);
        for i in np.0..=np.1 {
            if i != head {
                labels[i] = Some((head, modifier_label(pos(&tokens[i]))));
            }
        }
        if head == root {
            continue;
        }
        let prep = np.0.checked_sub(1).filter(|&p| matches!(pos(&tokens[p]), "IN" | "TO"));
        labels[head] = Some(if let Some(p) = prep {
            (p, "pobj")
        } else if head < root {
            (root, "nsubj")
        } else if !object_taken {
            object_taken = true;
            (root, "dobj")
        } else {
            (root, "dep")
        });
    }

    for (i, token) in tokens.iter().enumerate() {
        if i == root || labels[i].is_some() {
            continue;
        }
        let tag = pos(token);
        let label = match tag {
            "MD" => "aux",
            t if is_verb(t) && i < root => "aux",
            "RB" => {
                if token.feature("norm").is_some_and(|n| n == "not" || n == "never") {
                    "neg"
                } else {
                    "advmod"
                }
            }
            "IN" | "TO" => "prep",
            "CC" => "cc",
            "." | "," | ":" | "-LRB-" | "-RRB-" => "punct",
            _ => "dep",
        };
        labels[i] = Some((root, label));
    }

    let arcs = labels
        .iter()
        .enumerate()
        .filter_map(|(i, l)| {
            l.map(|(head, label)| DepArc {
                head: tokens[head].id,
                dependent: tokens[i].id,
                label,
            })
        })
        .collect();
    (Some(root), arcs)
}

impl AnnotationStage for DependencyParser {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        for sentence in doc.select(AnnotationKind::Sentence) {
            let tokens = doc.select_covered(AnnotationKind::Token, sentence.span);
            let chunks = doc.select_covered(AnnotationKind::Chunk, sentence.span);
            let (root, arcs) = parse_sentence(&tokens, &chunks);
            if let Some(root) = root {
                doc.set_feature(tokens[root].id, "deprel", "ROOT");
                doc.set_feature(tokens[root].id, "head", "0");
            }
            for arc in arcs {
                if arc.head == arc.dependent {
                    return Err(ProcessingError::new(
                        Self::NAME,
                        format!("token {} attached to itself", arc.dependent),
                    ));
                }
                doc.set_feature(arc.dependent, "deprel", arc.label);
                doc.set_feature(arc.dependent, "head", arc.head.to_string());
                doc.relate(RelationKind::Dependency, arc.head, arc.dependent, arc.label);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Semantic role labeler
// ---------------------------------------------------------------------------

/// Maps dependency arcs from each verbal root to PropBank-style roles.
pub struct SemanticRoleLabeler;

impl SemanticRoleLabeler {
    pub const NAME: &'static str = "semantic-role-labeler";
}

impl AnnotationStage for SemanticRoleLabeler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn process(&self, doc: &mut AnalysisDocument) -> Result<(), ProcessingError> {
        let tokens = doc.select(AnnotationKind::Token);
        let by_id: HashMap<AnnotationId, &Annotation> = tokens.iter().map(|t| (t.id, t)).collect();
        let mut roles = Vec::new();

        for token in &tokens {
            let Some(head) = token.feature("head").and_then(|h| h.parse::<AnnotationId>().ok())
            else {
                continue;
            };
            let Some(predicate) = by_id.get(&head) else {
                continue;
            };
            if predicate.feature("deprel") != Some("ROOT") || !is_verb(pos(predicate)) {
                continue;
            }
            let role = match token.feature("deprel") {
                Some("nsubj") => "ARG0",
                Some("dobj") => "ARG1",
                Some("neg") => "ARGM-NEG",
                Some("advmod") => "ARGM-MNR",
                Some("prep") => "ARGM-ADV",
                _ => continue,
            };
            roles.push((predicate.id, token.id, role));
        }

        for (predicate, argument, role) in roles {
            doc.relate(RelationKind::SemanticRole, predicate, argument, role);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::lexical::{Normalizer, SentenceDetector, SimpleSegmenter, Tokenizer};

    fn analyze(text: &str) -> AnalysisDocument {
        let tokenizer = Tokenizer::new(200).unwrap();
        let tagger = PosTagger::new();
        let stages: [&dyn AnnotationStage; 9] = [
            &SimpleSegmenter,
            &SentenceDetector,
            &tokenizer,
            &Normalizer,
            &tagger,
            &Chunker,
            &LookupWindows,
            &DependencyParser,
            &SemanticRoleLabeler,
        ];
        let mut doc = AnalysisDocument::new();
        doc.load(text);
        for stage in stages {
            stage.process(&mut doc).unwrap();
        }
        doc
    }

    fn tags(doc: &AnalysisDocument) -> Vec<String> {
        doc.select(AnnotationKind::Token)
            .iter()
            .map(|t| format!("{}/{}", doc.covered(t.span), pos(t)))
            .collect()
    }

    fn chunk_texts(doc: &AnalysisDocument, label: &str) -> Vec<String> {
        doc.select(AnnotationKind::Chunk)
            .iter()
            .filter(|c| c.feature("chunk_type") == Some(label))
            .map(|c| doc.covered(c.span).to_string())
            .collect()
    }

    fn deprel(doc: &AnalysisDocument, word: &str) -> Option<String> {
        doc.select(AnnotationKind::Token)
            .into_iter()
            .find(|t| doc.covered(t.span) == word)
            .and_then(|t| t.feature("deprel").map(str::to_string))
    }

    #[test]
    fn tags_simple_clinical_sentence() {
        let doc = analyze("Patient takes aspirin daily.");
        assert_eq!(
            tags(&doc),
            vec!["Patient/NN", "takes/VBZ", "aspirin/NN", "daily/RB", "./."]
        );
    }

    #[test]
    fn tags_proper_nouns_numbers_and_plurals() {
        let doc = analyze("She saw Dr Smith for 3 headaches.");
        let t = tags(&doc);
        assert!(t.contains(&"Smith/NNP".to_string()));
        assert!(t.contains(&"3/CD".to_string()));
        assert!(t.contains(&"headaches/NNS".to_string()));
    }

    #[test]
    fn chunks_noun_and_verb_phrases() {
        let doc = analyze("The patient has been taking a liquid supplement.");
        assert_eq!(chunk_texts(&doc, "NP"), vec!["The patient", "a liquid supplement"]);
        assert_eq!(chunk_texts(&doc, "VP"), vec!["has been taking"]);
    }

    #[test]
    fn determiner_after_noun_starts_new_phrase() {
        let doc = analyze("Patient takes aspirin a day.");
        assert_eq!(chunk_texts(&doc, "NP"), vec!["Patient", "aspirin", "a day"]);
    }

    #[test]
    fn lookup_windows_follow_noun_phrases() {
        let doc = analyze("She reports knee pain.");
        let windows: Vec<_> = doc
            .select(AnnotationKind::LookupWindow)
            .iter()
            .map(|w| doc.covered(w.span).to_string())
            .collect();
        assert_eq!(windows, vec!["She", "knee pain"]);
    }

    #[test]
    fn parses_subject_object_and_modifiers() {
        let doc = analyze("Patient takes aspirin daily.");
        assert_eq!(deprel(&doc, "takes").as_deref(), Some("ROOT"));
        assert_eq!(deprel(&doc, "Patient").as_deref(), Some("nsubj"));
        assert_eq!(deprel(&doc, "aspirin").as_deref(), Some("dobj"));
        assert_eq!(deprel(&doc, "daily").as_deref(), Some("advmod"));
        assert_eq!(deprel(&doc, ".").as_deref(), Some("punct"));
    }

    #[test]
    fn parses_prepositional_objects_and_negation() {
        let doc = analyze("She does not take aspirin for pain.");
        assert_eq!(deprel(&doc, "take").as_deref(), Some("ROOT"));
        assert_eq!(deprel(&doc, "does").as_deref(), Some("aux"));
        assert_eq!(deprel(&doc, "not").as_deref(), Some("neg"));
        assert_eq!(deprel(&doc, "for").as_deref(), Some("prep"));
        assert_eq!(deprel(&doc, "pain").as_deref(), Some("pobj"));
    }

    #[test]
    fn verbless_fragment_roots_at_first_noun() {
        let doc = analyze("Knee pain.");
        assert_eq!(deprel(&doc, "pain").as_deref(), Some("ROOT"));
        assert_eq!(deprel(&doc, "Knee").as_deref(), Some("compound"));
    }

    #[test]
    fn every_dependency_targets_a_token() {
        let doc = analyze("The patient has been taking a liquid supplement. Knee pain.");
        let result = doc.snapshot();
        for rel in result.relations.iter().filter(|r| r.kind == RelationKind::Dependency) {
            assert!(result.get(rel.source).is_some());
            assert!(result.get(rel.target).is_some());
            assert_ne!(rel.source, rel.target);
        }
    }

    #[test]
    fn labels_agent_and_patient_roles() {
        let doc = analyze("Patient takes aspirin daily.");
        let result = doc.snapshot();
        let roles: Vec<(String, String)> = result
            .relations
            .iter()
            .filter(|r| r.kind == RelationKind::SemanticRole)
            .map(|r| {
                let arg = result.get(r.target).unwrap();
                (r.label.clone(), result.covered_text(arg).to_string())
            })
            .collect();
        assert!(roles.contains(&("ARG0".to_string(), "Patient".to_string())));
        assert!(roles.contains(&("ARG1".to_string(), "aspirin".to_string())));
        assert!(roles.contains(&("ARGM-MNR".to_string(), "daily".to_string())));
    }
}
