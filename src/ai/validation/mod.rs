//! Structured Output Parsing
//!
//! Turns raw agent text into JSON despite format drift. Strategies are
//! tried in order and the first success wins:
//!
//! 1. Direct parse, unwrapping envelope fields (`{"response": "<json>"}`)
//!    up to [`MAX_ENVELOPE_DEPTH`] levels
//! 2. Single fenced code block stripped, then step 1 on the interior
//! 3. JSON repair (commas, brackets, truncation, embedded JSON)
//! 4. Item-list salvage anchored on the primary key
//! 5. Key-anchored salvage of single-object fields
//!
//! The parser never fails loudly: unusable input yields `None`, which
//! callers treat like an empty answer.

mod json_repair;
mod salvage;
mod verdict;

pub use json_repair::repair;
pub use salvage::{salvage_fields, salvage_items, unescape};
pub use verdict::ValidationVerdict;

use serde_json::Value;
use tracing::debug;

use crate::constants::parser::{ENVELOPE_FIELDS, LIST_FIELDS, MAX_ENVELOPE_DEPTH};
use crate::types::preview;

// =============================================================================
// Expected Shape
// =============================================================================

/// What a task's answer should look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedShape {
    /// One object with known fields (verdicts)
    SingleObject { fields: Vec<String> },
    /// A list of items keyed by a primary field (plan pages, slides)
    ItemList {
        primary_key: String,
        label_field: String,
        content_field: String,
        fields: Vec<String>,
    },
}

impl ExpectedShape {
    pub fn single_object<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::SingleObject {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn item_list(primary_key: &str, label_field: &str, content_field: &str) -> Self {
        Self::ItemList {
            primary_key: primary_key.to_string(),
            label_field: label_field.to_string(),
            content_field: content_field.to_string(),
            fields: vec![
                primary_key.to_string(),
                label_field.to_string(),
                content_field.to_string(),
            ],
        }
    }

    pub fn fields(&self) -> &[String] {
        match self {
            Self::SingleObject { fields } | Self::ItemList { fields, .. } => fields,
        }
    }

    /// Whether `value` already carries the answer at the top level
    fn has_expected_field(&self, value: &Value) -> bool {
        let Some(object) = value.as_object() else {
            return false;
        };
        self.fields().iter().any(|f| object.contains_key(f))
            || (matches!(self, Self::ItemList { .. })
                && LIST_FIELDS
                    .iter()
                    .any(|f| object.get(*f).is_some_and(Value::is_array)))
    }

    /// Whether `value` is usable as an answer of this shape: a non-empty
    /// item list, or an object carrying at least one expected field.
    pub fn fits(&self, value: &Value) -> bool {
        match self {
            Self::SingleObject { fields } => value
                .as_object()
                .is_some_and(|object| fields.iter().any(|f| object.contains_key(f))),
            Self::ItemList { .. } => items_of(value).is_some_and(|items| !items.is_empty()),
        }
    }
}

/// Items of an item-list answer: a top-level array, or the array under a
/// conventional list field (`pages`, `items`, ...).
pub fn items_of(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(object) => LIST_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_array)),
        _ => None,
    }
}

// =============================================================================
// Parse Strategy
// =============================================================================

/// Which strategy produced a result (diagnostics only)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Direct,
    Fenced,
    Envelope { depth: usize },
    Repaired,
    ItemSalvage,
    KeySalvage,
}

/// Result of the structural stages (direct, fenced, envelope)
enum Structural {
    Parsed(Value, ParseStrategy),
    /// Nothing parsed; later stages continue on this (innermost) text
    Unparsed(String),
    /// Envelope nesting exceeded the limit
    TooDeep,
}

// =============================================================================
// Structured Parser
// =============================================================================

/// Stateless structured output parser
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredParser;

impl StructuredParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse raw agent text against the expected shape
    pub fn parse(&self, raw: &str, shape: &ExpectedShape) -> Option<Value> {
        self.parse_tagged(raw, shape).map(|(value, _)| value)
    }

    /// Parse and report which strategy succeeded
    pub(crate) fn parse_tagged(
        &self,
        raw: &str,
        shape: &ExpectedShape,
    ) -> Option<(Value, ParseStrategy)> {
        let text = raw.trim().trim_start_matches('\u{feff}');
        if text.is_empty() {
            return None;
        }

        // Well-formed JSON of the wrong shape is only kept as a last resort.
        let (fallback, mut loose) = match self.structural(text, shape, 0) {
            Structural::Parsed(value, strategy) if shape.fits(&value) => {
                return Some(self.tag(value, strategy));
            }
            Structural::Parsed(value, strategy) => (text.to_string(), Some((value, strategy))),
            Structural::TooDeep => {
                debug!("Envelope nesting exceeds {} levels", MAX_ENVELOPE_DEPTH);
                return None;
            }
            Structural::Unparsed(inner) => (inner, None),
        };

        if loose.is_none()
            && let Some(value) = repair(&fallback)
        {
            if shape.fits(&value) {
                return Some(self.tag(value, ParseStrategy::Repaired));
            }
            loose = Some((value, ParseStrategy::Repaired));
        }

        let salvaged = match shape {
            ExpectedShape::ItemList {
                primary_key,
                label_field,
                content_field,
                fields,
            } => salvage_items(&fallback, primary_key, label_field, content_field, fields)
                .map(|items| (Value::Array(items), ParseStrategy::ItemSalvage)),
            ExpectedShape::SingleObject { fields } => salvage_fields(&fallback, fields)
                .map(|object| (Value::Object(object), ParseStrategy::KeySalvage)),
        };

        match salvaged.or(loose) {
            Some((value, strategy)) => Some(self.tag(value, strategy)),
            None => {
                debug!(preview = %preview(&fallback, 120), "No parse strategy succeeded");
                None
            }
        }
    }

    fn tag(&self, value: Value, strategy: ParseStrategy) -> (Value, ParseStrategy) {
        debug!(?strategy, "Parsed agent output");
        (value, strategy)
    }

    /// Direct parse, then fenced parse, unwrapping envelopes recursively
    fn structural(&self, text: &str, shape: &ExpectedShape, depth: usize) -> Structural {
        let text = text.trim();

        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return self.accept(value, text, shape, depth, ParseStrategy::Direct);
        }

        if let Some(inner) = strip_fence(text) {
            return match serde_json::from_str::<Value>(inner) {
                Ok(value) => self.accept(value, inner, shape, depth, ParseStrategy::Fenced),
                Err(_) => Structural::Unparsed(inner.to_string()),
            };
        }

        Structural::Unparsed(text.to_string())
    }

    fn accept(
        &self,
        value: Value,
        text: &str,
        shape: &ExpectedShape,
        depth: usize,
        strategy: ParseStrategy,
    ) -> Structural {
        if let Some((inner, shared_name)) = envelope_text(&value, shape) {
            if !shared_name {
                if depth >= MAX_ENVELOPE_DEPTH {
                    return Structural::TooDeep;
                }
                return self.unwrap_envelope(inner, shape, depth);
            }
            // A lone wrapper named like an expected field is unwrapped only
            // when its interior is a usable answer.
            if depth < MAX_ENVELOPE_DEPTH {
                let unwrapped = self.unwrap_envelope(inner, shape, depth);
                if matches!(&unwrapped, Structural::Parsed(inner, _) if shape.fits(inner)) {
                    return unwrapped;
                }
            }
        }

        if value.is_object() || value.is_array() {
            Structural::Parsed(value, strategy)
        } else {
            Structural::Unparsed(text.to_string())
        }
    }

    fn unwrap_envelope(&self, inner: &str, shape: &ExpectedShape, depth: usize) -> Structural {
        match self.structural(inner, shape, depth + 1) {
            Structural::Parsed(value, ParseStrategy::Envelope { depth }) => {
                Structural::Parsed(value, ParseStrategy::Envelope { depth })
            }
            Structural::Parsed(value, _) => {
                Structural::Parsed(value, ParseStrategy::Envelope { depth: depth + 1 })
            }
            other => other,
        }
    }
}

/// Inner text of an envelope object: a known wrapper field holding a
/// string, on an object that does not already carry the answer. An object
/// whose only field is a wrapper sharing an expected field's name is also
/// returned, flagged, since it may be either.
fn envelope_text<'a>(value: &'a Value, shape: &ExpectedShape) -> Option<(&'a str, bool)> {
    let object = value.as_object()?;
    if !shape.has_expected_field(value) {
        return ENVELOPE_FIELDS
            .iter()
            .find_map(|field| object.get(*field).and_then(Value::as_str))
            .map(|inner| (inner, false));
    }
    match object.iter().next() {
        Some((key, Value::String(inner)))
            if object.len() == 1 && ENVELOPE_FIELDS.contains(&key.as_str()) =>
        {
            Some((inner.as_str(), true))
        }
        _ => None,
    }
}

/// Interior of a text that is exactly one fenced code block.
///
/// The opener is three or more backticks or tildes with an optional format
/// tag; the closer is a line of at least as many of the same character.
pub fn strip_fence(text: &str) -> Option<&str> {
    let text = text.trim();
    let (opener, body) = text.split_once('\n')?;
    let opener = opener.trim_end();

    let marker = match opener.chars().next()? {
        c @ ('`' | '~') => c,
        _ => return None,
    };
    let fence_len = opener.chars().take_while(|c| *c == marker).count();
    if fence_len < 3 || opener[fence_len..].contains(marker) {
        return None;
    }

    let closer_start = body.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let closer = body[closer_start..].trim();
    if closer.chars().count() < fence_len || !closer.chars().all(|c| c == marker) {
        return None;
    }

    Some(body[..closer_start].trim_end_matches(['\n', '\r']))
}
