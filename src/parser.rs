// src/parser.rs

//! Recovers a flat record from the free text a model returns.
//!
//! Layers, each usable on its own:
//! 1. strict parse of the whole answer
//! 2. ```` ```json ```` fence stripping, or `{ ... }` span extraction
//! 3. strict parse of the candidate
//! 4. [`repair_json`] then a final strict parse

use crate::error::ParseError;
use crate::model::Record;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, error};

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// Parses a model answer into a record. `label` names the source (usually the
/// image) in diagnostics.
pub fn parse_record(raw: &str, label: Option<&str>) -> Result<Record, ParseError> {
    let text = raw.trim();
    if let Some(record) = parse_strict(text) {
        return Ok(record);
    }

    let candidate = candidate_object(text).ok_or_else(|| {
        error!(
            "Could not find a JSON object in the response{}",
            label_suffix(label)
        );
        ParseError::NoJsonFound
    })?;
    if let Some(record) = parse_strict(candidate) {
        return Ok(record);
    }

    let repaired = repair_json(candidate);
    debug!("Repaired response{}: {}", label_suffix(label), repaired);
    parse_object(&repaired).map_err(|e| {
        error!(
            "Invalid JSON format{}\nProblematic content:\n{}",
            label_suffix(label),
            candidate
        );
        ParseError::InvalidJson(e.to_string())
    })
}

/// Inner text of a ```` ```json ... ``` ```` block, or `None` if `text` is not fenced.
pub fn strip_json_fence(text: &str) -> Option<&str> {
    let text = text.trim();
    let head = text.get(..FENCE_OPEN.len())?;
    if !head.eq_ignore_ascii_case(FENCE_OPEN)
        || text.len() < FENCE_OPEN.len() + FENCE_CLOSE.len()
        || !text.ends_with(FENCE_CLOSE)
    {
        return None;
    }
    Some(text[FENCE_OPEN.len()..text.len() - FENCE_CLOSE.len()].trim())
}

/// Greedy span from the first `{` to the last `}`.
pub fn extract_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn looks_like_object(text: &str) -> bool {
    text.starts_with('{') && text.ends_with('}')
}

fn candidate_object(text: &str) -> Option<&str> {
    let text = strip_json_fence(text).unwrap_or(text);
    if looks_like_object(text) {
        Some(text)
    } else {
        extract_object_span(text)
    }
}

fn parse_strict(text: &str) -> Option<Record> {
    parse_object(text).ok()
}

fn parse_object(text: &str) -> Result<Record, serde_json::Error> {
    let object: IndexMap<String, Value> = serde_json::from_str(text)?;
    Ok(object
        .into_iter()
        .map(|(k, v)| (k, flatten_value(v)))
        .collect())
}

fn flatten_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn label_suffix(label: Option<&str>) -> String {
    label.map(|l| format!(" for {l}")).unwrap_or_default()
}

/// Best-effort rewrite of near-JSON into JSON.
///
/// Handles smart quotes, single-quoted strings, unquoted keys and bare values,
/// Python literals, trailing and missing commas, raw control characters and
/// unescaped quotes inside strings, comments, and unterminated strings or
/// containers. The output is not guaranteed to be valid.
pub fn repair_json(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut closers: Vec<char> = Vec::new();
    let mut after_value = false;
    let mut after_colon = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            '{' | '[' => {
                if after_value {
                    out.push(',');
                }
                closers.push(if c == '{' { '}' } else { ']' });
                out.push(c);
                after_value = false;
                after_colon = false;
                i += 1;
            }
            '}' | ']' => {
                if let Some(pos) = closers.iter().rposition(|&x| x == c) {
                    trim_trailing_comma(&mut out);
                    for closer in closers.drain(pos..).rev() {
                        out.push(closer);
                    }
                    after_value = true;
                    after_colon = false;
                }
                i += 1;
            }
            ',' => {
                if after_value {
                    out.push(',');
                }
                after_value = false;
                after_colon = false;
                i += 1;
            }
            ':' => {
                out.push(':');
                after_value = false;
                after_colon = true;
                i += 1;
            }
            '/' if matches!(chars.get(i + 1), Some('/') | Some('*')) => {
                i = skip_comment(&chars, i);
            }
            c if is_quote(c) => {
                if after_value {
                    out.push(',');
                }
                i = read_string(&chars, i + 1, is_single_quote(c), &mut out);
                after_value = true;
                after_colon = false;
            }
            _ => {
                if after_value {
                    out.push(',');
                }
                let in_object = closers.last() == Some(&'}');
                let key_position = in_object && !after_colon;
                let end = (i..chars.len())
                    .find(|&j| is_bare_delimiter(chars[j], key_position))
                    .unwrap_or(chars.len());
                let word: String = chars[i..end].iter().collect();
                let word = word.trim();
                if key_position {
                    out.push_str(&quote(word));
                } else {
                    out.push_str(&bare_value(word));
                }
                after_value = true;
                after_colon = false;
                i = end;
            }
        }
    }

    trim_trailing_comma(&mut out);
    while let Some(closer) = closers.pop() {
        out.push(closer);
    }
    out
}

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\u{201C}' | '\u{201D}') || is_single_quote(c)
}

fn is_single_quote(c: char) -> bool {
    matches!(c, '\'' | '\u{2018}' | '\u{2019}')
}

fn is_bare_delimiter(c: char, key_position: bool) -> bool {
    matches!(c, ',' | '}' | ']' | '\n' | '\r') || (key_position && c == ':')
}

/// Copies a string body starting at `start` (just past the opening quote) as a
/// JSON string and returns the index after the closing quote.
///
/// A quote only closes the string when the next non-blank character is a
/// structural one, so `'O'Brien'` and `"said "hi" twice"` survive.
fn read_string(chars: &[char], start: usize, single: bool, out: &mut String) -> usize {
    out.push('"');
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        let closes_here = if single {
            is_single_quote(c)
        } else {
            matches!(c, '"' | '\u{201C}' | '\u{201D}')
        };
        if closes_here && ends_token(chars, i + 1) {
            out.push('"');
            return i + 1;
        }
        match c {
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    if next == '\'' {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    if is_valid_escape(chars, i + 1) {
                        out.push('\\');
                        out.push(next);
                        i += 2;
                        continue;
                    }
                }
                out.push_str("\\\\");
            }
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
        i += 1;
    }
    out.push('"');
    chars.len()
}

/// True when the next non-blank character is structural, is a quote on a
/// later line, or opens a quoted key (the last two are members missing their
/// comma).
fn ends_token(chars: &[char], from: usize) -> bool {
    let mut saw_newline = false;
    for (j, &c) in chars.iter().enumerate().skip(from) {
        if c == '\n' || c == '\r' {
            saw_newline = true;
        } else if !c.is_whitespace() {
            return matches!(c, ',' | ':' | '}' | ']')
                || (is_quote(c) && (saw_newline || starts_key(chars, j)));
        }
    }
    true
}

/// True when the quote at `at` opens a string on the same line that is
/// followed by `:`.
fn starts_key(chars: &[char], at: usize) -> bool {
    let Some(close) = (at + 1..chars.len())
        .take_while(|&j| chars[j] != '\n')
        .find(|&j| is_quote(chars[j]))
    else {
        return false;
    };
    chars[close + 1..]
        .iter()
        .find(|c| !c.is_whitespace())
        .is_some_and(|&c| c == ':')
}

fn is_valid_escape(chars: &[char], at: usize) -> bool {
    match chars.get(at) {
        Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => true,
        Some('u') => {
            chars.len() >= at + 5 && chars[at + 1..at + 5].iter().all(|c| c.is_ascii_hexdigit())
        }
        _ => false,
    }
}

fn skip_comment(chars: &[char], start: usize) -> usize {
    if chars.get(start + 1) == Some(&'/') {
        (start..chars.len())
            .find(|&j| chars[j] == '\n')
            .unwrap_or(chars.len())
    } else {
        (start + 2..chars.len().saturating_sub(1))
            .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
            .map_or(chars.len(), |j| j + 2)
    }
}

fn trim_trailing_comma(out: &mut String) {
    let trimmed = out.trim_end().len();
    if out[..trimmed].ends_with(',') {
        out.truncate(trimmed - 1);
    }
}

fn quote(word: &str) -> String {
    Value::String(word.to_string()).to_string()
}

fn bare_value(word: &str) -> String {
    match word {
        "true" | "True" => "true".to_string(),
        "false" | "False" => "false".to_string(),
        "null" | "None" | "undefined" => "null".to_string(),
        _ if serde_json::from_str::<serde_json::Number>(word).is_ok() => word.to_string(),
        _ => quote(word),
    }
}
