//! Shared utility functions.
//!
//! ## JSON Extraction Helpers
//!
//! Agents are loose with types (`"true"` for `true`, arrays for prose), so
//! the helpers here accept the common variants:
//! - `json_string` - string, or joined string array
//! - `json_flag` - boolean, or boolean-looking string
//! - `json_scalar_string` - string or number rendered as text
//!
//! ## Durable Writes
//!
//! `write_atomic` writes a uniquely named temp file next to the target,
//! fsyncs it and renames it into place.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract text by key. Arrays of strings are joined with newlines.
#[inline]
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            (!parts.is_empty()).then(|| parts.join("\n"))
        }
        _ => None,
    }
}

/// Extract a boolean by key, accepting `true`, `"true"`, `"yes"`, `1`.
#[inline]
pub fn json_flag(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

/// Render a string or number field as text (`"3"` and `3` both give "3").
#[inline]
pub fn json_scalar_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// =============================================================================
// String Utilities
// =============================================================================

/// Shorten text for log lines, appending an ellipsis when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Write `content` to `path` so that readers see either the old file or
/// the complete new one, and the new one is on disk when this returns.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Like `Result::ok` but logs the discarded error at warn level.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_string_variants() {
        let v = json!({"a": "x", "b": ["one", "two"], "c": 3});
        assert_eq!(json_string(&v, "a"), Some("x".to_string()));
        assert_eq!(json_string(&v, "b"), Some("one\ntwo".to_string()));
        assert_eq!(json_string(&v, "c"), None);
        assert_eq!(json_string(&v, "missing"), None);
    }

    #[test]
    fn test_json_flag_variants() {
        let v = json!({"a": true, "b": "False", "c": "yes", "d": 0, "e": "maybe"});
        assert_eq!(json_flag(&v, "a"), Some(true));
        assert_eq!(json_flag(&v, "b"), Some(false));
        assert_eq!(json_flag(&v, "c"), Some(true));
        assert_eq!(json_flag(&v, "d"), Some(false));
        assert_eq!(json_flag(&v, "e"), None);
    }

    #[test]
    fn test_json_scalar_string() {
        let v = json!({"page": 3, "id": " 04 "});
        assert_eq!(json_scalar_string(&v, "page"), Some("3".to_string()));
        assert_eq!(json_scalar_string(&v, "id"), Some("04".to_string()));
    }

    #[test]
    fn test_preview() {
        assert_eq!(preview("abcdef", 3), "abc…");
        assert_eq!(preview("abc", 3), "abc");
        assert_eq!(preview("漢字漢字", 2), "漢字…");
    }

    #[test]
    fn test_write_atomic_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/record.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_sha256_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
