//! Output Tree
//!
//! ```text
//! <output_root>/<source-stem>-<YYYYmmdd-HHMMSS>/
//! ├── run.json            # run manifest
//! ├── analysis.md
//! ├── plan.json
//! ├── slides/NN_topic.md
//! ├── notes/note-NN_topic-zh.md
//! ├── notes/note-NN_topic-en.md
//! ├── diagrams/slide_NN.svg
//! ├── diagrams/conceptual_NN.svg
//! ├── .progress.json      # checkpoint record
//! ├── .paused             # recovery signal (while suspended)
//! └── .model_override     # model switch left by `continue`
//! ```
//!
//! Content that never passed review carries a DEGRADED-OUTPUT banner; a
//! failed artifact is replaced by a GENERATION-FAILED placeholder. Reading
//! an artifact back for a later task drops the banner again.
//!
//! Artifacts are fsynced before their write returns, since the checkpoint
//! marks them complete right after.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::rework::{ReworkOutcome, ReworkReport};
use super::types::{ArtifactKind, WorkUnit};
use crate::constants::output::{
    ANALYSIS_FILE, CHECKPOINT_FILE, DEGRADED_MARKER, DIAGRAMS_DIR, FAILED_MARKER, MANIFEST_FILE,
    NOTES_DIR, PLAN_FILE, SLIDES_DIR,
};
use crate::types::{DeckError, Result, sha256_hex, write_atomic};

// =============================================================================
// Manifest
// =============================================================================

/// `run.json`: what a run was started from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub source: PathBuf,
    pub source_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_slides: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

impl RunManifest {
    pub fn new(source: &Path, existing_slides: Option<&Path>) -> Result<Self> {
        let bytes = std::fs::read(source)?;
        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            source: source.canonicalize().unwrap_or_else(|_| source.to_path_buf()),
            source_sha256: sha256_hex(&bytes),
            existing_slides: existing_slides.map(Path::to_path_buf),
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Whether the source file still has the content the run started from
    pub fn source_unchanged(&self) -> bool {
        std::fs::read(&self.source)
            .map(|bytes| sha256_hex(&bytes) == self.source_sha256)
            .unwrap_or(false)
    }
}

// =============================================================================
// Output Tree
// =============================================================================

/// How a written artifact fared in review
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    Reviewed,
    Degraded,
}

/// What `persist` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    Written,
    Placeholder,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct OutputTree {
    root: PathBuf,
}

impl OutputTree {
    /// Create a fresh run directory under `output_root`
    pub fn create(output_root: &Path, source: &Path) -> Result<Self> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let name = format!("{}-{}", stem, Local::now().format("%Y%m%d-%H%M%S"));
        let tree = Self {
            root: output_root.join(name),
        };
        tree.ensure_dirs()?;
        info!("Run directory: {}", tree.root.display());
        Ok(tree)
    }

    /// Open an existing run directory
    pub fn open(dir: &Path) -> Result<Self> {
        let looks_like_run = [MANIFEST_FILE, PLAN_FILE, CHECKPOINT_FILE, SLIDES_DIR]
            .iter()
            .any(|name| dir.join(name).exists());
        if !dir.is_dir() || !looks_like_run {
            return Err(DeckError::NotARun(dir.display().to_string()));
        }
        let tree = Self {
            root: dir.to_path_buf(),
        };
        tree.ensure_dirs()?;
        Ok(tree)
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [SLIDES_DIR, NOTES_DIR, DIAGRAMS_DIR] {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.root.join(CHECKPOINT_FILE)
    }

    pub fn slides_dir(&self) -> PathBuf {
        self.root.join(SLIDES_DIR)
    }

    pub fn notes_dir(&self) -> PathBuf {
        self.root.join(NOTES_DIR)
    }

    pub fn analysis_path(&self) -> PathBuf {
        self.root.join(ANALYSIS_FILE)
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root.join(PLAN_FILE)
    }

    /// File of a per-unit artifact
    pub fn unit_path(&self, unit: &WorkUnit, artifact: ArtifactKind) -> PathBuf {
        match artifact {
            ArtifactKind::Analysis => self.analysis_path(),
            ArtifactKind::Plan => self.plan_path(),
            ArtifactKind::Slide => self.slides_dir().join(format!("{}.md", unit.stem())),
            ArtifactKind::Memo => self
                .notes_dir()
                .join(format!("note-{}-zh.md", unit.stem())),
            ArtifactKind::MemoEn => self
                .notes_dir()
                .join(format!("note-{}-en.md", unit.stem())),
            ArtifactKind::SlideSvg => self
                .root
                .join(DIAGRAMS_DIR)
                .join(format!("slide_{}.svg", unit.id)),
            ArtifactKind::ConceptualSvg => self
                .root
                .join(DIAGRAMS_DIR)
                .join(format!("conceptual_{}.svg", unit.id)),
        }
    }

    pub fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let json = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), json.as_bytes())?;
        Ok(())
    }

    pub fn read_manifest(&self) -> Result<Option<RunManifest>> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&std::fs::read_to_string(path)?)?))
    }

    /// Read a previously written artifact as task context: placeholders
    /// are ignored and a degraded banner is dropped.
    pub async fn read_artifact(&self, path: &Path) -> Option<String> {
        let text = tokio::fs::read_to_string(path).await.ok()?;
        if text.contains(FAILED_MARKER) {
            return None;
        }
        match degraded_banner(extension(path)) {
            Some(banner) if text.starts_with(&banner) => Some(text[banner.len()..].to_string()),
            _ => Some(text),
        }
    }

    /// Write accepted content, with a banner when degraded
    pub async fn write_artifact(&self, path: &Path, content: &str, quality: Quality) -> Result<()> {
        let body = match quality {
            Quality::Reviewed => content.to_string(),
            Quality::Degraded => degraded(path, content),
        };
        write_durable(path, ensure_trailing_newline(body)).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Write a single-artifact report according to its outcome
    pub async fn persist(&self, path: &Path, report: &ReworkReport) -> Result<Persisted> {
        match &report.outcome {
            ReworkOutcome::Perfect(c) | ReworkOutcome::Acceptable(c) => {
                self.write_artifact(path, &c.to_text(), Quality::Reviewed).await?;
                Ok(Persisted::Written)
            }
            ReworkOutcome::Degraded(c) => {
                self.write_artifact(path, &c.to_text(), Quality::Degraded).await?;
                Ok(Persisted::Written)
            }
            ReworkOutcome::Failed => {
                self.write_placeholder(path, report).await?;
                Ok(Persisted::Placeholder)
            }
            ReworkOutcome::Declined => Ok(Persisted::Skipped),
        }
    }

    pub async fn write_placeholder(&self, path: &Path, report: &ReworkReport) -> Result<()> {
        let mut reason = format!(
            "{} produced no usable content after {} attempt(s).",
            report.task, report.attempts_made
        );
        if let Some(last) = report.feedback.last() {
            reason.push_str(&format!(" Last reviewer feedback: {}", last.replace('\n', " ")));
        }

        let body = match extension(path) {
            "svg" => format!(
                "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"800\" height=\"120\">\n\
                 <!-- {}: {} -->\n\
                 <text x=\"20\" y=\"60\">{}</text>\n</svg>",
                FAILED_MARKER,
                xml_comment_safe(&reason),
                FAILED_MARKER
            ),
            "json" => serde_json::to_string_pretty(&serde_json::json!({
                "review_status": "failed",
                "marker": FAILED_MARKER,
                "reason": reason,
            }))?,
            _ => format!("> **{}**: {}\n", FAILED_MARKER, reason),
        };
        write_durable(path, ensure_trailing_newline(body)).await
    }
}

async fn write_durable(path: &Path, body: String) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic(&path, body.as_bytes()))
        .await
        .map_err(std::io::Error::other)??;
    Ok(())
}

fn extension(path: &Path) -> &str {
    path.extension().and_then(|e| e.to_str()).unwrap_or("")
}

/// Banner prepended to degraded text artifacts; JSON is tagged in place
fn degraded_banner(extension: &str) -> Option<String> {
    match extension {
        "json" => None,
        "svg" => Some(format!(
            "<!-- {}: did not pass automated review -->\n",
            DEGRADED_MARKER
        )),
        _ => Some(format!(
            "> **{}**: this content did not pass automated review.\n\n",
            DEGRADED_MARKER
        )),
    }
}

fn degraded(path: &Path, content: &str) -> String {
    if let Some(banner) = degraded_banner(extension(path)) {
        return format!("{}{}", banner, content);
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(mut object)) => {
            object.insert("review_status".into(), Value::String("degraded".into()));
            serde_json::to_string_pretty(&Value::Object(object))
                .unwrap_or_else(|_| content.to_string())
        }
        Ok(Value::Array(items)) => serde_json::to_string_pretty(&serde_json::json!({
            "pages": items,
            "review_status": "degraded",
        }))
        .unwrap_or_else(|_| content.to_string()),
        _ => content.to_string(),
    }
}

fn xml_comment_safe(text: &str) -> String {
    text.replace("--", "- -")
}

fn ensure_trailing_newline(mut text: String) -> String {
    if !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::rework::Candidate;
    use crate::types::TaskKind;

    fn report(outcome: ReworkOutcome) -> ReworkReport {
        ReworkReport {
            task: TaskKind::CreateMemo,
            outcome,
            attempts_made: 6,
            feedback: vec!["first".into(), "needs\nexamples".into()],
        }
    }

    fn tree() -> (tempfile::TempDir, OutputTree) {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("chapter 1.md");
        std::fs::write(&source, "text").unwrap();
        let tree = OutputTree::create(&dir.path().join("output"), &source).unwrap();
        (dir, tree)
    }

    #[test]
    fn test_layout() {
        let (_dir, tree) = tree();
        let name = tree.root().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("chapter 1-"));
        assert!(tree.slides_dir().is_dir());

        let unit = WorkUnit::new("3", "Cell Biology");
        let rel = |artifact| {
            tree.unit_path(&unit, artifact)
                .strip_prefix(tree.root())
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        };
        assert_eq!(rel(ArtifactKind::Slide), "slides/03_Cell_Biology.md");
        assert_eq!(rel(ArtifactKind::Memo), "notes/note-03_Cell_Biology-zh.md");
        assert_eq!(rel(ArtifactKind::MemoEn), "notes/note-03_Cell_Biology-en.md");
        assert_eq!(rel(ArtifactKind::SlideSvg), "diagrams/slide_03.svg");
        assert_eq!(rel(ArtifactKind::ConceptualSvg), "diagrams/conceptual_03.svg");
    }

    #[tokio::test]
    async fn test_degraded_banner() {
        let (_dir, tree) = tree();
        let md = tree.root().join("notes/x.md");
        let persisted = tree
            .persist(&md, &report(ReworkOutcome::Degraded(Candidate::Text("# Body".into()))))
            .await
            .unwrap();
        assert_eq!(persisted, Persisted::Written);
        let text = std::fs::read_to_string(&md).unwrap();
        assert!(text.starts_with("> **DEGRADED-OUTPUT**"));
        assert!(text.contains("# Body"));

        let svg = tree.root().join("diagrams/slide_01.svg");
        tree.write_artifact(&svg, "<svg></svg>", Quality::Degraded).await.unwrap();
        assert!(std::fs::read_to_string(&svg).unwrap().starts_with("<!-- DEGRADED-OUTPUT"));

        let plan = tree.plan_path();
        tree.write_artifact(&plan, r#"{"pages": []}"#, Quality::Degraded)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&std::fs::read_to_string(&plan).unwrap()).unwrap();
        assert_eq!(value["review_status"], "degraded");
    }

    #[tokio::test]
    async fn test_degraded_banner_is_dropped_on_read() {
        let (_dir, tree) = tree();
        let md = tree.root().join("notes/note-01_Intro-zh.md");
        tree.write_artifact(&md, "# Memo\nBody", Quality::Degraded).await.unwrap();
        assert_eq!(tree.read_artifact(&md).await.unwrap(), "# Memo\nBody\n");

        let svg = tree.root().join("diagrams/slide_01.svg");
        tree.write_artifact(&svg, "<svg></svg>", Quality::Degraded).await.unwrap();
        assert_eq!(tree.read_artifact(&svg).await.unwrap(), "<svg></svg>\n");

        tree.write_artifact(&md, "# Clean", Quality::Reviewed).await.unwrap();
        assert_eq!(tree.read_artifact(&md).await.unwrap(), "# Clean\n");
    }

    #[tokio::test]
    async fn test_failed_placeholder_is_not_read_back() {
        let (_dir, tree) = tree();
        let md = tree.root().join("notes/x.md");
        let persisted = tree.persist(&md, &report(ReworkOutcome::Failed)).await.unwrap();
        assert_eq!(persisted, Persisted::Placeholder);

        let text = std::fs::read_to_string(&md).unwrap();
        assert!(text.contains("GENERATION-FAILED"));
        assert!(text.contains("after 6 attempt(s)"));
        assert!(text.contains("needs examples"));
        assert!(tree.read_artifact(&md).await.is_none());

        let svg = tree.root().join("diagrams/conceptual_01.svg");
        tree.write_placeholder(&svg, &report(ReworkOutcome::Failed)).await.unwrap();
        assert!(std::fs::read_to_string(&svg).unwrap().starts_with("<svg"));
    }

    #[tokio::test]
    async fn test_declined_writes_nothing() {
        let (_dir, tree) = tree();
        let svg = tree.root().join("diagrams/conceptual_01.svg");
        let persisted = tree.persist(&svg, &report(ReworkOutcome::Declined)).await.unwrap();
        assert_eq!(persisted, Persisted::Skipped);
        assert!(!svg.exists());
    }

    #[test]
    fn test_manifest_round_trip() {
        let (dir, tree) = tree();
        let source = dir.path().join("chapter 1.md");
        let manifest = RunManifest::new(&source, None).unwrap();
        tree.write_manifest(&manifest).unwrap();

        let reopened = OutputTree::open(tree.root()).unwrap();
        let loaded = reopened.read_manifest().unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert!(loaded.source_unchanged());

        std::fs::write(&source, "edited").unwrap();
        assert!(!loaded.source_unchanged());
    }

    #[test]
    fn test_open_rejects_other_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OutputTree::open(dir.path()),
            Err(DeckError::NotARun(_))
        ));
    }
}
