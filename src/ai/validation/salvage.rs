//! Free-text salvage for answers that are not JSON at all.
//!
//! Agents regularly return JSON-looking text that no repair can fix (raw
//! line breaks and unescaped quotes inside long markdown values). These
//! routines locate field markers and cut values at the next known marker.
//! They are the fallback stage; the parser only reaches them after every
//! structural strategy has failed.

use regex::Regex;
use serde_json::{Map, Number, Value};

use crate::constants::parser::BOOLEAN_PREFIXES;

/// Recover list items anchored on `"<primary_key>":`.
///
/// Each anchor starts a fragment running to the next anchor. From every
/// fragment the primary key, the label and the content field are
/// recovered; fragments without a primary key are dropped.
pub fn salvage_items(
    text: &str,
    primary_key: &str,
    label_field: &str,
    content_field: &str,
    known_fields: &[String],
) -> Option<Vec<Value>> {
    let anchor = field_marker(primary_key)?;
    let starts: Vec<usize> = anchor.find_iter(text).map(|m| m.start()).collect();
    if starts.is_empty() {
        return None;
    }

    let mut markers: Vec<Regex> = Vec::new();
    for field in known_fields
        .iter()
        .map(String::as_str)
        .chain([primary_key, label_field, content_field])
    {
        markers.push(field_marker(field)?);
    }

    let items: Vec<Value> = starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            salvage_fragment(
                &text[start..end],
                primary_key,
                label_field,
                content_field,
                &markers,
            )
        })
        .collect();

    (!items.is_empty()).then_some(items)
}

fn salvage_fragment(
    fragment: &str,
    primary_key: &str,
    label_field: &str,
    content_field: &str,
    markers: &[Regex],
) -> Option<Value> {
    let primary = primary_value(fragment, primary_key)?;

    let mut item = Map::new();
    item.insert(primary_key.to_string(), primary);

    for field in [label_field, content_field] {
        if field == primary_key {
            continue;
        }
        if let Some(value) = string_value(fragment, field, markers) {
            item.insert(field.to_string(), Value::String(value));
        }
    }

    Some(Value::Object(item))
}

/// The primary key is short: a number or a quoted token.
fn primary_value(fragment: &str, key: &str) -> Option<Value> {
    let marker = field_marker(key)?;
    let after = &fragment[marker.find(fragment)?.end()..];
    let raw: String = after
        .trim_start()
        .trim_start_matches('"')
        .chars()
        .take_while(|c| !matches!(c, '"' | ',' | '}' | '\n' | '\r'))
        .collect();
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    Some(match raw.parse::<i64>() {
        Ok(n) => Value::Number(Number::from(n)),
        Err(_) => Value::String(raw.to_string()),
    })
}

/// Quoted string value of `field`, bounded by the next known marker.
fn string_value(fragment: &str, field: &str, markers: &[Regex]) -> Option<String> {
    let marker = field_marker(field)?;
    let value_start = marker.find(fragment)?.end();
    let rest = &fragment[value_start..];
    let open = rest.find('"')?;
    let body_start = value_start + open + 1;

    let boundary = next_marker(fragment, body_start, markers).unwrap_or(fragment.len());
    let region = &fragment[body_start..boundary];
    let body = match region.rfind('"') {
        Some(close) => &region[..close],
        None => region.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '}' | ']')),
    };

    Some(unescape(body))
}

/// Recover single-object fields by their markers.
///
/// A value ends just before the next expected field's marker. Fields with
/// a boolean prefix are read as booleans from their raw text.
pub fn salvage_fields(text: &str, fields: &[String]) -> Option<Map<String, Value>> {
    let mut positions: Vec<(usize, usize, &str)> = Vec::new();
    for field in fields {
        let marker = loose_marker(field)?;
        if let Some(m) = marker.find(text) {
            positions.push((m.start(), m.end(), field.as_str()));
        }
    }
    positions.sort_by_key(|(start, _, _)| *start);

    let mut out = Map::new();
    for (i, (_, value_start, field)) in positions.iter().enumerate() {
        let boundary = positions
            .iter()
            .skip(i + 1)
            .map(|(start, _, _)| *start)
            .find(|start| start >= value_start)
            .unwrap_or(text.len());
        let raw = &text[*value_start..boundary];

        if let Some(value) = field_value(field, raw) {
            out.entry(field.to_string()).or_insert(value);
        }
    }

    (!out.is_empty()).then_some(out)
}

fn field_value(field: &str, raw: &str) -> Option<Value> {
    if BOOLEAN_PREFIXES.iter().any(|p| field.starts_with(p)) {
        let lower = raw.to_lowercase();
        return match (lower.find("true"), lower.find("false")) {
            (Some(t), Some(f)) => Some(Value::Bool(t < f)),
            (Some(_), None) => Some(Value::Bool(true)),
            (None, Some(_)) => Some(Value::Bool(false)),
            (None, None) => None,
        };
    }

    let trimmed = raw.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('"') {
        let body = match quoted.rfind('"') {
            Some(close) => &quoted[..close],
            None => quoted.trim_end(),
        };
        return Some(Value::String(unescape(body)));
    }

    let bare = trimmed.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '}' | ']'));
    if bare.is_empty() {
        return None;
    }
    Some(
        serde_json::from_str::<Number>(bare)
            .map(Value::Number)
            .unwrap_or_else(|_| Value::String(bare.to_string())),
    )
}

/// `"field":` with optional whitespace before the colon.
fn field_marker(field: &str) -> Option<Regex> {
    Regex::new(&format!(r#""{}"\s*:"#, regex::escape(field))).ok()
}

/// Quoted or bare `field:`; bare names must stand alone as a word.
fn loose_marker(field: &str) -> Option<Regex> {
    Regex::new(&format!(r#""?\b{}\b"?\s*:"#, regex::escape(field))).ok()
}

fn next_marker(fragment: &str, from: usize, markers: &[Regex]) -> Option<usize> {
    markers
        .iter()
        .filter_map(|m| m.find_at(fragment, from).map(|found| found.start()))
        .min()
}

/// Reverse the simple JSON escapes agents emit.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
