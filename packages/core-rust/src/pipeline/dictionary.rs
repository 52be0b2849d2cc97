//! Concept dictionary used by the lookup stage.
//!
//! File format, one entry per line: `term|group[|preferred]`. Blank lines and
//! lines starting with `#` are ignored. `group` is a [`SemanticGroup`] name.

use std::collections::HashMap;
use std::path::Path;

use super::lexical::normalize_word;
use crate::annotation::SemanticGroup;
use crate::error::DictionaryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    /// Normalized term words, matched against token `norm` features.
    pub words: Vec<String>,
    pub group: SemanticGroup,
    pub preferred: String,
}

/// Multi-word term dictionary indexed by first normalized word.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
    by_first_word: HashMap<String, Vec<usize>>,
    longest: usize,
}

const BUILT_IN: &[(&str, SemanticGroup)] = &[
    ("aspirin", SemanticGroup::Drug),
    ("acetaminophen", SemanticGroup::Drug),
    ("ibuprofen", SemanticGroup::Drug),
    ("metformin", SemanticGroup::Drug),
    ("lisinopril", SemanticGroup::Drug),
    ("atorvastatin", SemanticGroup::Drug),
    ("warfarin", SemanticGroup::Drug),
    ("heparin", SemanticGroup::Drug),
    ("insulin", SemanticGroup::Drug),
    ("amoxicillin", SemanticGroup::Drug),
    ("prednisone", SemanticGroup::Drug),
    ("albuterol", SemanticGroup::Drug),
    ("nitroglycerin", SemanticGroup::Drug),
    ("liquid supplement", SemanticGroup::Drug),
    ("hyperlipidemia", SemanticGroup::Disorder),
    ("hypertension", SemanticGroup::Disorder),
    ("diabetes", SemanticGroup::Disorder),
    ("diabetes mellitus", SemanticGroup::Disorder),
    ("pneumonia", SemanticGroup::Disorder),
    ("asthma", SemanticGroup::Disorder),
    ("heart failure", SemanticGroup::Disorder),
    ("myocardial infarction", SemanticGroup::Disorder),
    ("malnutrition", SemanticGroup::Disorder),
    ("obesity", SemanticGroup::Disorder),
    ("depression", SemanticGroup::Disorder),
    ("pain", SemanticGroup::Finding),
    ("knee pain", SemanticGroup::Finding),
    ("chest pain", SemanticGroup::Finding),
    ("headache", SemanticGroup::Finding),
    ("fever", SemanticGroup::Finding),
    ("nausea", SemanticGroup::Finding),
    ("cough", SemanticGroup::Finding),
    ("fatigue", SemanticGroup::Finding),
    ("dizziness", SemanticGroup::Finding),
    ("shortness of breath", SemanticGroup::Finding),
    ("weight loss", SemanticGroup::Finding),
    ("weight gain", SemanticGroup::Finding),
    ("surgery", SemanticGroup::Procedure),
    ("biopsy", SemanticGroup::Procedure),
    ("x-ray", SemanticGroup::Procedure),
    ("mri", SemanticGroup::Procedure),
    ("ct scan", SemanticGroup::Procedure),
    ("nutrition therapy", SemanticGroup::Procedure),
    ("calorie count", SemanticGroup::Procedure),
    ("knee", SemanticGroup::Anatomy),
    ("chest", SemanticGroup::Anatomy),
    ("heart", SemanticGroup::Anatomy),
    ("lung", SemanticGroup::Anatomy),
    ("liver", SemanticGroup::Anatomy),
    ("kidney", SemanticGroup::Anatomy),
    ("abdomen", SemanticGroup::Anatomy),
    ("head", SemanticGroup::Anatomy),
];

impl Dictionary {
    /// Small general clinical vocabulary.
    #[must_use]
    pub fn built_in() -> Self {
        let mut dict = Self::default();
        for &(term, group) in BUILT_IN {
            dict.insert(term, group, term);
        }
        dict
    }

    /// Loads a dictionary file.
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryError::Io`] when the file cannot be read, otherwise
    /// whatever [`Dictionary::parse`] reports.
    pub fn load(path: &Path) -> Result<Self, DictionaryError> {
        let content = std::fs::read_to_string(path).map_err(|source| DictionaryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// # Errors
    ///
    /// Returns [`DictionaryError::Malformed`] for the first bad line and
    /// [`DictionaryError::Empty`] when nothing was defined.
    pub fn parse(content: &str) -> Result<Self, DictionaryError> {
        let mut dict = Self::default();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split('|').map(str::trim);
            let term = fields.next().unwrap_or_default();
            let group = fields.next().unwrap_or_default();
            let preferred = fields.next().unwrap_or(term);
            if term.is_empty() {
                return Err(DictionaryError::Malformed {
                    line: idx + 1,
                    reason: "empty term".to_string(),
                });
            }
            let group = SemanticGroup::parse(group).ok_or_else(|| DictionaryError::Malformed {
                line: idx + 1,
                reason: format!("unknown semantic group '{group}'"),
            })?;
            dict.insert(term, group, preferred);
        }
        if dict.is_empty() {
            return Err(DictionaryError::Empty);
        }
        Ok(dict)
    }

    fn insert(&mut self, term: &str, group: SemanticGroup, preferred: &str) {
        let words: Vec<String> = term.split_whitespace().map(normalize_word).collect();
        let Some(first) = words.first().cloned() else {
            return;
        };
        self.longest = self.longest.max(words.len());
        self.by_first_word
            .entry(first)
            .or_default()
            .push(self.entries.len());
        self.entries.push(DictionaryEntry {
            words,
            group,
            preferred: preferred.to_string(),
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose words are a prefix of `words`, longest first.
    #[must_use]
    pub fn matches_at(&self, words: &[&str]) -> Vec<&DictionaryEntry> {
        let Some(first) = words.first() else {
            return Vec::new();
        };
        let mut found: Vec<&DictionaryEntry> = self
            .by_first_word
            .get(*first)
            .into_iter()
            .flatten()
            .map(|&i| &self.entries[i])
            .filter(|e| {
                e.words.len() <= words.len()
                    && e.words.iter().zip(words).all(|(a, b)| a == b)
            })
            .collect();
        found.sort_by(|a, b| b.words.len().cmp(&a.words.len()));
        found
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn built_in_finds_single_and_multi_word_terms() {
        let dict = Dictionary::built_in();
        let hits = dict.matches_at(&["knee", "pain", "today"]);
        let terms: Vec<_> = hits.iter().map(|e| e.preferred.as_str()).collect();
        assert_eq!(terms, vec!["knee pain", "knee"]);
        assert_eq!(dict.matches_at(&["aspirin"])[0].group, SemanticGroup::Drug);
        assert!(dict.matches_at(&["patient"]).is_empty());
        assert!(dict.matches_at(&[]).is_empty());
    }

    #[test]
    fn terms_are_normalized_on_insert() {
        let dict = Dictionary::parse("Headaches|finding|headache").unwrap();
        assert_eq!(dict.matches_at(&["headache"])[0].preferred, "headache");
    }

    #[test]
    fn parse_skips_comments_and_defaults_preferred() {
        let dict = Dictionary::parse("# drugs\n\nzinc|drug\n").unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.matches_at(&["zinc"])[0].preferred, "zinc");
    }

    #[test]
    fn parse_rejects_unknown_group() {
        let err = Dictionary::parse("aspirin|drug\nzinc|mineral").unwrap_err();
        assert!(matches!(
            &err,
            DictionaryError::Malformed { line: 2, reason } if reason.contains("mineral")
        ));
        assert_eq!(err.to_string(), "line 2: unknown semantic group 'mineral'");
    }

    #[test]
    fn parse_rejects_empty_term() {
        let err = Dictionary::parse("|drug").unwrap_err();
        assert!(matches!(err, DictionaryError::Malformed { line: 1, .. }));
    }

    #[test]
    fn parse_rejects_empty_dictionary() {
        assert!(matches!(
            Dictionary::parse("# nothing\n"),
            Err(DictionaryError::Empty)
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Dictionary::load(Path::new("/nonexistent/paeon.dict")).unwrap_err();
        assert!(matches!(err, DictionaryError::Io { .. }));
        assert!(err.to_string().starts_with("cannot read dictionary /nonexistent/paeon.dict"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sertraline|drug|Sertraline").unwrap();
        let dict = Dictionary::load(file.path()).unwrap();
        assert_eq!(dict.matches_at(&["sertraline"])[0].preferred, "Sertraline");
    }
}
