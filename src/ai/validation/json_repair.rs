//! JSON Repair
//!
//! Last-chance fixes for almost-JSON agent output, tried after direct and
//! fenced parsing failed and before any free-text salvage:
//! - Trailing commas
//! - Missing closing braces/brackets
//! - Strings cut off at a line break or at end of input
//! - Control characters
//! - JSON embedded in explanatory text
//!
//! Only objects and arrays count as a successful repair.

use serde_json::Value;
use tracing::debug;

/// Repair passes, from least to most invasive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairLevel {
    Commas,
    Strings,
    Aggressive,
}

const LEVELS: [RepairLevel; 3] = [
    RepairLevel::Commas,
    RepairLevel::Strings,
    RepairLevel::Aggressive,
];

/// Try every repair level, then extraction from surrounding prose.
pub fn repair(text: &str) -> Option<Value> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    for level in LEVELS {
        let candidate = apply(text, level);
        if let Some(value) = parse_structured(&candidate) {
            debug!(?level, "JSON repaired");
            return Some(value);
        }
    }

    let embedded = extract_embedded(text)?;
    parse_structured(embedded).or_else(|| {
        LEVELS
            .iter()
            .find_map(|level| parse_structured(&apply(embedded, *level)))
    })
}

fn parse_structured(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn apply(text: &str, level: RepairLevel) -> String {
    // Closing brackets can expose a comma that was dangling at end of input.
    match level {
        RepairLevel::Commas => drop_trailing_commas(&close_brackets(text)),
        RepairLevel::Strings => {
            drop_trailing_commas(&close_brackets(&close_broken_strings(text)))
        }
        RepairLevel::Aggressive => {
            let cleaned = close_broken_strings(&strip_control_chars(text));
            cut_after_last_complete(&drop_trailing_commas(&close_brackets(&cleaned)))
        }
    }
}

/// Remove a comma that is followed (after whitespace) by `]` or `}`.
fn drop_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        if ch == ',' {
            let rest = text[i + ch.len_utf8()..].trim_start();
            if rest.starts_with(']') || rest.starts_with('}') {
                continue;
            }
        } else if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }

    out
}

/// Append the closers for every still-open string, array and object.
fn close_brackets(text: &str) -> String {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&ch) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = text.trim_end().to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// Close a string literal that runs into a raw line break.
fn close_broken_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                '\n' | '\r' => {
                    out.push('"');
                    in_string = false;
                }
                _ => {}
            }
        } else if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }

    if in_string {
        out.push('"');
    }
    out
}

fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

/// Drop trailing garbage after the last top-level closer.
fn cut_after_last_complete(text: &str) -> String {
    match top_level_end(text, 0) {
        Some(end) if end < text.len() => text[..end].to_string(),
        _ => text.to_string(),
    }
}

/// Byte offset just past the value that closes at depth zero, scanning
/// from `start` (which must be an opener).
fn top_level_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + ch.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// First balanced `{...}` or `[...]` inside surrounding prose.
fn extract_embedded(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    match top_level_end(text, start) {
        Some(end) => Some(&text[start..end]),
        None => Some(&text[start..]),
    }
}
