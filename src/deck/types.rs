//! Work units and artifact kinds.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;
use tracing::warn;

use crate::ai::items_of;
use crate::types::{DeckError, Result, TaskKind, json_scalar_string};

static SLIDE_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_(.*)\.md$").expect("static slide file pattern"));

// =============================================================================
// Work Unit
// =============================================================================

/// One page of the deck
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Page id, zero-padded to two digits when numeric
    pub id: String,
    /// Topic label, safe for file names
    pub topic: String,
}

impl WorkUnit {
    pub fn new(page: &str, topic: &str) -> Self {
        Self {
            id: normalize_page_id(page),
            topic: sanitize_topic(topic),
        }
    }

    /// Build from a plan or slides item (`page` + `topic`)
    pub fn from_item(item: &Value) -> Option<Self> {
        let page = json_scalar_string(item, "page").filter(|p| !p.is_empty())?;
        let topic = json_scalar_string(item, "topic").unwrap_or_default();
        Some(Self::new(&page, &topic))
    }

    /// `NN_topic`, the shared stem of the unit's file names
    pub fn stem(&self) -> String {
        format!("{}_{}", self.id, self.topic)
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page {} ({})", self.id, self.topic)
    }
}

/// `3` → `03`; non-numeric ids are sanitized like topics
pub fn normalize_page_id(page: &str) -> String {
    let page = page.trim();
    match page.parse::<u32>() {
        Ok(n) => format!("{:02}", n),
        Err(_) => sanitize_topic(page),
    }
}

/// Spaces become `_`; path separators and characters illegal in file
/// names are dropped.
pub fn sanitize_topic(topic: &str) -> String {
    let cleaned: String = topic
        .trim()
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .filter(|c| !c.is_control())
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();

    if cleaned.is_empty() {
        "untitled".to_string()
    } else {
        cleaned
    }
}

/// Work units of a parsed plan, in plan order. Items without a page are
/// skipped; duplicate page ids keep their first occurrence.
pub fn units_from_plan(plan: &Value) -> Result<Vec<WorkUnit>> {
    let items = items_of(plan).ok_or_else(|| DeckError::Plan("plan has no page list".into()))?;

    let mut units: Vec<WorkUnit> = Vec::with_capacity(items.len());
    for item in items {
        match WorkUnit::from_item(item) {
            Some(unit) if units.iter().any(|u| u.id == unit.id) => {
                warn!("Duplicate page {} in plan, keeping the first", unit.id);
            }
            Some(unit) => units.push(unit),
            None => warn!("Plan item without a page skipped: {}", item),
        }
    }

    if units.is_empty() {
        return Err(DeckError::Plan("plan contains no pages".into()));
    }
    Ok(units)
}

/// Rebuild work units from `slides/NN_topic.md` file names
pub fn units_from_slides_dir(dir: &Path) -> Result<Vec<WorkUnit>> {
    let mut names: Vec<String> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    let units: Vec<WorkUnit> = names
        .iter()
        .filter_map(|name| SLIDE_FILE.captures(name))
        .filter_map(|caps| Some(WorkUnit::new(caps.get(1)?.as_str(), caps.get(2)?.as_str())))
        .collect();

    if units.is_empty() {
        return Err(DeckError::Plan(format!(
            "no slide files found in {}",
            dir.display()
        )));
    }
    Ok(units)
}

// =============================================================================
// Artifact Kind
// =============================================================================

/// Tracked output of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Analysis,
    Plan,
    Slide,
    Memo,
    MemoEn,
    SlideSvg,
    ConceptualSvg,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Plan => "plan",
            Self::Slide => "slide",
            Self::Memo => "memo",
            Self::MemoEn => "memo_en",
            Self::SlideSvg => "slide_svg",
            Self::ConceptualSvg => "conceptual_svg",
        }
    }

    /// Generating task that produces this artifact
    pub fn generator(&self) -> TaskKind {
        match self {
            Self::Analysis => TaskKind::Analyze,
            Self::Plan => TaskKind::Plan,
            Self::Slide => TaskKind::CreateAllSlides,
            Self::Memo => TaskKind::CreateMemo,
            Self::MemoEn => TaskKind::CreateMemoEn,
            Self::SlideSvg => TaskKind::CreateSlideSvg,
            Self::ConceptualSvg => TaskKind::CreateConceptualSvg,
        }
    }

    /// Job-level artifacts live under the reserved deck unit
    pub fn is_deck_level(&self) -> bool {
        matches!(self, Self::Analysis | Self::Plan)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unit_names() {
        let unit = WorkUnit::new("3", " Cell Biology / Intro ");
        assert_eq!(unit.id, "03");
        assert_eq!(unit.topic, "Cell_Biology__Intro");
        assert_eq!(unit.stem(), "03_Cell_Biology__Intro");

        assert_eq!(WorkUnit::new("12", "").topic, "untitled");
        assert_eq!(normalize_page_id("A 1"), "A_1");
    }

    #[test]
    fn test_units_from_plan() {
        let plan = json!({"pages": [
            {"page": 1, "topic": "Intro"},
            {"page": "2", "topic": "Methods"},
            {"topic": "no page"},
            {"page": 1, "topic": "Duplicate"}
        ]});
        let units = units_from_plan(&plan).unwrap();
        assert_eq!(
            units,
            vec![WorkUnit::new("1", "Intro"), WorkUnit::new("2", "Methods")]
        );
    }

    #[test]
    fn test_units_from_empty_plan() {
        assert!(matches!(units_from_plan(&json!([])), Err(DeckError::Plan(_))));
        assert!(matches!(units_from_plan(&json!({"x": 1})), Err(DeckError::Plan(_))));
    }

    #[test]
    fn test_units_from_slides_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["02_Methods.md", "01_Intro.md", "notes.txt", "slide_01.svg"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let units = units_from_slides_dir(dir.path()).unwrap();
        assert_eq!(
            units,
            vec![WorkUnit::new("01", "Intro"), WorkUnit::new("02", "Methods")]
        );

        let empty = tempfile::tempdir().unwrap();
        assert!(units_from_slides_dir(empty.path()).is_err());
    }

    #[test]
    fn test_artifact_names() {
        assert_eq!(ArtifactKind::MemoEn.as_str(), "memo_en");
        assert_eq!(
            serde_json::to_string(&ArtifactKind::ConceptualSvg).unwrap(),
            "\"conceptual_svg\""
        );
        assert_eq!(ArtifactKind::Slide.generator(), TaskKind::CreateAllSlides);
        assert!(ArtifactKind::Plan.is_deck_level());
    }
}
