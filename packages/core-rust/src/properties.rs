//! Flat key-value property file parser.
//!
//! Reads the `.properties` format as `java.util.Properties.load` does:
//!
//! - `key=value`, `key: value` and `key value` separators; an empty key is a
//!   valid entry
//! - `#` and `!` comment lines, blank lines ignored
//! - a trailing `\` continues the value on the next line; at end of input it
//!   just ends the value
//! - `\t`, `\n`, `\r`, `\f`, `\uXXXX` escapes; any other escaped character
//!   stands for itself, so `\=`, `\:` and `\ ` can appear in keys
//!
//! Leading whitespace of keys and values is dropped, and so is unescaped
//! trailing whitespace of values. Later definitions of the same key replace
//! earlier ones.

use std::collections::BTreeMap;

/// A syntax problem found while parsing, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: usize,
    pub reason: String,
}

/// Parses property text into an ordered map.
///
/// # Errors
///
/// Returns a [`ParseIssue`] for a malformed `\uXXXX` escape, the only input
/// the format rejects.
pub fn parse(input: &str) -> Result<BTreeMap<String, String>, ParseIssue> {
    let normalized = input.replace("\r\n", "\n");
    let mut entries = BTreeMap::new();
    let mut lines = normalized.split(['\n', '\r']).enumerate();

    while let Some((idx, raw)) = lines.next() {
        let trimmed = raw.trim_start_matches(is_blank);
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
            continue;
        }

        let start_line = idx + 1;
        let mut logical = String::from(trimmed);
        let mut segment_continues = ends_with_continuation(trimmed);
        while segment_continues {
            logical.pop();
            let Some((_, next)) = lines.next() else {
                break;
            };
            let next = next.trim_start_matches(is_blank);
            logical.push_str(next);
            segment_continues = ends_with_continuation(next);
        }

        let (key, value) = split_entry(&logical);
        let issue = |reason: String| ParseIssue {
            line: start_line,
            reason,
        };
        entries.insert(unescape(key).map_err(issue)?, unescape(value).map_err(issue)?);
    }

    Ok(entries)
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\u{c}')
}

/// An odd number of trailing backslashes means the last one escapes the newline.
fn ends_with_continuation(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

/// Splits a logical line into its still-escaped key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    let mut key_end = line.len();
    let mut has_separator = false;
    for (at, c) in line.char_indices() {
        if !escaped && (c == '=' || c == ':' || is_blank(c)) {
            key_end = at;
            has_separator = c == '=' || c == ':';
            break;
        }
        escaped = c == '\\' && !escaped;
    }

    let mut rest = line[key_end..].chars();
    if has_separator {
        rest.next();
    }
    let mut value = rest.as_str().trim_start_matches(is_blank);
    if !has_separator {
        if let Some(stripped) = value.strip_prefix(['=', ':']) {
            value = stripped.trim_start_matches(is_blank);
        }
    }

    (&line[..key_end], trim_unescaped_end(value))
}

fn trim_unescaped_end(value: &str) -> &str {
    let mut end = value.len();
    while let Some(c) = value[..end].chars().next_back() {
        if !is_blank(c) {
            break;
        }
        let before = &value[..end - c.len_utf8()];
        if ends_with_continuation(before) {
            break;
        }
        end -= c.len_utf8();
    }
    &value[..end]
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let unit = hex_unit(&mut chars)?;
                out.push(decode_unit(unit, &mut chars)?);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    Ok(out)
}

fn hex_unit(chars: &mut std::str::Chars<'_>) -> Result<u32, String> {
    let digits: String = chars.by_ref().take(4).collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(format!("malformed \\u escape: \\u{digits}"));
    }
    u32::from_str_radix(&digits, 16).map_err(|err| err.to_string())
}

/// Decodes one UTF-16 unit, pairing a high surrogate with a following
/// `\uDCxx` escape. Unpaired surrogates become U+FFFD.
fn decode_unit(unit: u32, chars: &mut std::str::Chars<'_>) -> Result<char, String> {
    if !(0xD800..0xDC00).contains(&unit) {
        return Ok(char::from_u32(unit).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    let rest = chars.as_str();
    if let Some(tail) = rest.strip_prefix("\\u") {
        let mut lookahead = tail.chars();
        if let Ok(low) = hex_unit(&mut lookahead) {
            if (0xDC00..0xE000).contains(&low) {
                *chars = lookahead;
                let combined = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                return Ok(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
        }
    }
    Ok(char::REPLACEMENT_CHARACTER)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_all_separator_styles() {
        let props = parse("a=1\nb: 2\nc 3\nd = 4\n").unwrap();
        assert_eq!(props["a"], "1");
        assert_eq!(props["b"], "2");
        assert_eq!(props["c"], "3");
        assert_eq!(props["d"], "4");
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let props = parse("# comment\n! other comment\n\n   \npaeon.broker=tcp://x:1\n").unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props["paeon.broker"], "tcp://x:1");
    }

    #[test]
    fn value_keeps_embedded_separators() {
        let props = parse("paeon.broker=nio://localhost:60616?a=b\n").unwrap();
        assert_eq!(props["paeon.broker"], "nio://localhost:60616?a=b");
    }

    #[test]
    fn continuation_joins_lines() {
        let props = parse("list=one,\\\n    two,\\\n    three\n").unwrap();
        assert_eq!(props["list"], "one,two,three");
    }

    #[test]
    fn escaped_backslash_is_not_continuation() {
        let props = parse("path=C:\\\\\nnext=1\n").unwrap();
        assert_eq!(props["path"], "C:\\");
        assert_eq!(props["next"], "1");
    }

    #[test]
    fn continuation_at_end_of_input_ends_the_value() {
        let props = parse("a=1\nb=2\\").unwrap();
        assert_eq!(props["a"], "1");
        assert_eq!(props["b"], "2");
    }

    #[test]
    fn empty_key_is_an_entry() {
        let props = parse("paeon.listenon=paeon.nlp.ctakes\n=oops\n").unwrap();
        assert_eq!(props["paeon.listenon"], "paeon.nlp.ctakes");
        assert_eq!(props[""], "oops");

        let props = parse(": nokey\n").unwrap();
        assert_eq!(props[""], "nokey");
    }

    #[test]
    fn decodes_value_escapes() {
        let props = parse("paeon.dictionary=C:\\\\paeon\\\\terms.dict\n").unwrap();
        assert_eq!(props["paeon.dictionary"], "C:\\paeon\\terms.dict");

        let props = parse("ws=a\\tb\\nc\\rd\\fe\nu=caf\\u00e9\nplain=\\q\n").unwrap();
        assert_eq!(props["ws"], "a\tb\nc\rd\u{c}e");
        assert_eq!(props["u"], "café");
        assert_eq!(props["plain"], "q");
    }

    #[test]
    fn surrogate_pairs_decode_to_one_char() {
        let props = parse("emoji=\\uD83D\\uDE00\nlone=\\uD83Dx\n").unwrap();
        assert_eq!(props["emoji"], "\u{1F600}");
        assert_eq!(props["lone"], "\u{FFFD}x");
    }

    #[test]
    fn escaped_separators_and_spaces_stay_in_key() {
        let props = parse("key\\ with\\ space = v\na\\=b=c\nx\\:y:z\n").unwrap();
        assert_eq!(props["key with space"], "v");
        assert_eq!(props["a=b"], "c");
        assert_eq!(props["x:y"], "z");
    }

    #[test]
    fn escaped_trailing_space_is_kept() {
        let props = parse("pad=value\\  \nplain=value   \n").unwrap();
        assert_eq!(props["pad"], "value ");
        assert_eq!(props["plain"], "value");
    }

    #[test]
    fn crlf_and_cr_line_endings() {
        let props = parse("a=1\r\nb=one,\\\r\n  two\rc=3").unwrap();
        assert_eq!(props["a"], "1");
        assert_eq!(props["b"], "one,two");
        assert_eq!(props["c"], "3");
    }

    #[test]
    fn malformed_unicode_escape_is_an_issue() {
        let err = parse("ok=1\nbad=\\u12G4\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("\\u"));

        assert_eq!(parse("short=\\u12").unwrap_err().line, 1);
    }

    #[test]
    fn key_without_value_is_empty_string() {
        let props = parse("flag\n").unwrap();
        assert_eq!(props["flag"], "");
    }

    #[test]
    fn later_definition_wins() {
        let props = parse("k=1\nk=2\n").unwrap();
        assert_eq!(props["k"], "2");
    }

    proptest! {
        #[test]
        fn simple_entries_parse_back(
            key in "[a-z][a-z0-9.]{0,16}",
            value in "[A-Za-z0-9/:._-]{0,24}",
        ) {
            let text = format!("{key}={value}\n");
            let props = parse(&text).unwrap();
            prop_assert_eq!(props.get(&key).map(String::as_str), Some(value.as_str()));
        }

        #[test]
        fn escaped_backslashes_collapse(
            parts in proptest::collection::vec("[a-z]{1,6}", 1..5),
        ) {
            let text = format!("path={}\n", parts.join("\\\\"));
            let props = parse(&text).unwrap();
            prop_assert_eq!(props["path"].clone(), parts.join("\\"));
        }
    }
}
