//! Task instruction templates.
//!
//! The templates file is markdown with one section per task kind:
//!
//! ```text
//! ## [ANALYZE]
//! Read the source and ...
//!
//! ## [PLAN]
//! ...
//! ```
//!
//! Text before the first heading is ignored.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::types::{DeckError, Result, TaskKind};

static SECTION_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n##\s*\[([^\]]*)\]").expect("static heading pattern"));

/// Lazily loaded task instructions, shared by reference across tasks
pub struct TemplateStore {
    path: PathBuf,
    sections: OnceCell<HashMap<String, String>>,
}

impl TemplateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sections: OnceCell::new(),
        }
    }

    /// Store backed by in-memory text instead of a file
    pub fn from_text(text: &str) -> Self {
        Self {
            path: PathBuf::new(),
            sections: OnceCell::new_with(Some(parse_sections(text))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn sections(&self) -> Result<&HashMap<String, String>> {
        self.sections
            .get_or_try_init(|| async {
                let text = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
                    DeckError::Config(format!(
                        "cannot read templates file {}: {}",
                        self.path.display(),
                        e
                    ))
                })?;
                let sections = parse_sections(&text);
                debug!(
                    "Loaded {} task templates from {}",
                    sections.len(),
                    self.path.display()
                );
                Ok(sections)
            })
            .await
    }

    /// Instruction body for a task kind
    pub async fn instructions(&self, kind: TaskKind) -> Result<&str> {
        self.sections()
            .await?
            .get(kind.as_str())
            .map(String::as_str)
            .ok_or_else(|| DeckError::TemplateNotFound(kind.to_string()))
    }

    /// Fail fast when any of the given kinds has no instructions
    pub async fn require_all(&self, kinds: &[TaskKind]) -> Result<()> {
        for kind in kinds {
            self.instructions(*kind).await?;
        }
        Ok(())
    }
}

fn parse_sections(text: &str) -> HashMap<String, String> {
    // A heading on the very first line has no preceding newline.
    let text = format!("\n{}", text.replace("\r\n", "\n"));
    let headings: Vec<_> = SECTION_HEADING.captures_iter(&text).collect();

    let mut sections = HashMap::new();
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(text.len());
        let body = text[whole.end()..end].trim();
        if !body.is_empty() {
            sections.insert(name.as_str().trim().to_string(), body.to_string());
        }
    }
    sections
}
