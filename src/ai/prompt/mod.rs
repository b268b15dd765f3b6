//! Prompt Rendering
//!
//! Every agent call uses the same layout:
//!
//! 1. Fixed role preamble
//! 2. `Your specific task is 'KIND'.`
//! 3. `--- INSTRUCTIONS ---` with the template body for the kind
//! 4. `--- CONTEXT & INPUTS ---` with the context values in insertion order
//! 5. `--- MUST ADDRESS: REVIEWER FEEDBACK ---` when earlier attempts were rejected
//! 6. `--- YOUR TASK ---` and the closing instruction

mod templates;

pub use templates::TemplateStore;

use std::path::{Path, PathBuf};
use tracing::warn;

use crate::constants::agent::{CLOSING_INSTRUCTION, SAFETY_PREAMBLE};
use crate::types::TaskKind;

// =============================================================================
// Task Context
// =============================================================================

/// One named input of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextValue {
    /// Inlined from disk at render time
    File(PathBuf),
    /// Long text inlined verbatim
    Text(String),
    /// Short value rendered as a list item
    Scalar(String),
}

/// Ordered task inputs plus accumulated reviewer feedback
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskContext {
    entries: Vec<(String, ContextValue)>,
    feedback: Vec<String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value; a replaced key keeps its position.
    pub fn set(&mut self, key: impl Into<String>, value: ContextValue) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn file(mut self, key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.set(key, ContextValue::File(path.into()));
        self
    }

    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, ContextValue::Text(value.into()));
        self
    }

    pub fn scalar(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, ContextValue::Scalar(value.to_string()));
        self
    }

    pub fn get(&self, key: &str) -> Option<&ContextValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn entries(&self) -> &[(String, ContextValue)] {
        &self.entries
    }

    pub fn push_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback.push(feedback.into());
    }

    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }
}

/// Everything needed to render one prompt
#[derive(Debug, Clone)]
pub struct TaskSpec<'a> {
    pub kind: TaskKind,
    pub instructions: &'a str,
    pub context: &'a TaskContext,
}

// =============================================================================
// Rendering
// =============================================================================

pub async fn render_prompt(spec: &TaskSpec<'_>) -> String {
    let mut parts: Vec<String> = vec![
        SAFETY_PREAMBLE.to_string(),
        format!("Your specific task is '{}'.", spec.kind),
        "--- INSTRUCTIONS ---".to_string(),
        spec.instructions.to_string(),
        "--- CONTEXT & INPUTS ---".to_string(),
    ];

    for (key, value) in spec.context.entries() {
        parts.push(render_value(key, value).await);
    }

    let feedback = spec.context.feedback();
    if !feedback.is_empty() {
        parts.push("--- MUST ADDRESS: REVIEWER FEEDBACK ---".to_string());
        parts.extend(
            feedback
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i + 1, item.trim())),
        );
    }

    parts.push("--- YOUR TASK ---".to_string());
    parts.push(CLOSING_INSTRUCTION.to_string());
    parts.join("\n")
}

async fn render_value(key: &str, value: &ContextValue) -> String {
    match value {
        ContextValue::File(path) => match tokio::fs::read_to_string(path).await {
            Ok(content) => format!("Content for '{}':\n```\n{}\n```", file_label(path), content),
            Err(e) => {
                warn!("Cannot inline {} for '{}': {}", path.display(), key, e);
                format!("- {}: {}", key, path.display())
            }
        },
        ContextValue::Text(text) => format!("Provided Content for '{}':\n```\n{}\n```", key, text),
        ContextValue::Scalar(value) => format!("- {}: {}", key, value),
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_section_order() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter.md");
        std::fs::write(&source, "SOURCE BODY").unwrap();

        let mut context = TaskContext::new()
            .file("source_path", &source)
            .scalar("page", "03")
            .text("slide_content", "# Slide");
        context.push_feedback("too long");
        context.push_feedback("missing citation");

        let prompt = render_prompt(&TaskSpec {
            kind: TaskKind::CreateMemo,
            instructions: "Write a memo.",
            context: &context,
        })
        .await;

        let order = [
            SAFETY_PREAMBLE,
            "Your specific task is 'CREATE_MEMO'.",
            "--- INSTRUCTIONS ---\nWrite a memo.",
            "--- CONTEXT & INPUTS ---",
            "Content for 'chapter.md':\n```\nSOURCE BODY\n```",
            "- page: 03",
            "Provided Content for 'slide_content':\n```\n# Slide\n```",
            "--- MUST ADDRESS: REVIEWER FEEDBACK ---\n1. too long\n2. missing citation",
            "--- YOUR TASK ---",
            CLOSING_INSTRUCTION,
        ];
        let mut cursor = 0;
        for part in order {
            let found = prompt[cursor..].find(part).unwrap_or_else(|| panic!("missing {part:?}"));
            cursor += found + part.len();
        }
        assert!(prompt.ends_with(CLOSING_INSTRUCTION));
    }

    #[tokio::test]
    async fn test_no_feedback_block_on_first_attempt() {
        let context = TaskContext::new().scalar("page", 1);
        let prompt = render_prompt(&TaskSpec {
            kind: TaskKind::Analyze,
            instructions: "x",
            context: &context,
        })
        .await;
        assert!(!prompt.contains("REVIEWER FEEDBACK"));
    }

    #[tokio::test]
    async fn test_unreadable_file_falls_back_to_scalar() {
        let context = TaskContext::new().file("existing_slides_path", "/nonexistent/slides.md");
        let prompt = render_prompt(&TaskSpec {
            kind: TaskKind::Plan,
            instructions: "x",
            context: &context,
        })
        .await;
        assert!(prompt.contains("- existing_slides_path: /nonexistent/slides.md"));
    }

    #[test]
    fn test_set_keeps_position() {
        let mut context = TaskContext::new().scalar("a", 1).scalar("b", 2);
        context.set("a", ContextValue::Scalar("3".into()));
        let keys: Vec<_> = context.entries().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(context.get("a"), Some(&ContextValue::Scalar("3".into())));
    }
}
