//! Checkpoint Store
//!
//! Per (unit, artifact) completion record persisted as pretty JSON:
//!
//! ```json
//! {
//!   "01": { "memo": "completed", "slide_svg": "pending" },
//!   "_deck": { "analysis": "completed", "plan": "completed" }
//! }
//! ```
//!
//! Every transition is written through immediately (fsynced temp file +
//! rename), so the record never claims more than what is on disk. Writes
//! are serialized so a later record never lands before an earlier one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::types::ArtifactKind;
use crate::types::{DeckError, Result, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Pending,
    Completed,
}

/// unit id → artifact → status
pub type CheckpointRecord = BTreeMap<String, BTreeMap<String, ArtifactStatus>>;

/// Completion counts for display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CheckpointSummary {
    pub units: usize,
    pub completed: usize,
    pub pending: usize,
    /// artifact → (completed, tracked)
    pub by_artifact: BTreeMap<String, (usize, usize)>,
}

impl CheckpointSummary {
    pub fn is_finished(&self) -> bool {
        self.pending == 0 && self.completed > 0
    }
}

pub struct CheckpointStore {
    path: PathBuf,
    record: Mutex<CheckpointRecord>,
    writer: tokio::sync::Mutex<()>,
}

impl CheckpointStore {
    /// Load the record, starting empty when the file is missing or corrupt
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let record = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<CheckpointRecord>(&raw) {
                Ok(record) => {
                    info!("Resuming from checkpoint {}", path.display());
                    record
                }
                Err(e) => {
                    warn!(
                        "Checkpoint {} is corrupt ({}), starting fresh",
                        path.display(),
                        e
                    );
                    CheckpointRecord::new()
                }
            }
        } else {
            CheckpointRecord::new()
        };

        Ok(Self {
            path,
            record: Mutex::new(record),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, CheckpointRecord>> {
        self.record
            .lock()
            .map_err(|_| DeckError::Checkpoint("checkpoint lock poisoned".into()))
    }

    pub fn is_complete(&self, unit: &str, artifact: ArtifactKind) -> bool {
        self.lock()
            .map(|record| {
                record
                    .get(unit)
                    .and_then(|artifacts| artifacts.get(artifact.as_str()))
                    == Some(&ArtifactStatus::Completed)
            })
            .unwrap_or(false)
    }

    /// Mark one pair completed and persist before returning.
    ///
    /// Call only after the artifact's content is on disk.
    pub async fn mark_complete(&self, unit: &str, artifact: ArtifactKind) -> Result<()> {
        let _writer = self.writer.lock().await;
        let json = {
            let mut record = self.lock()?;
            record
                .entry(unit.to_string())
                .or_default()
                .insert(artifact.to_string(), ArtifactStatus::Completed);
            serde_json::to_string_pretty(&*record)?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
            .await
            .map_err(|e| DeckError::Checkpoint(format!("checkpoint writer failed: {}", e)))??;
        debug!("Checkpoint: {}/{} completed", unit, artifact);
        Ok(())
    }

    /// Register every (unit, artifact) pair the job will produce. Existing
    /// statuses are kept; the record is persisted only when it grew.
    ///
    /// Runs at stage start, before any unit task can write.
    pub fn ensure_pending<'a>(
        &self,
        units: impl IntoIterator<Item = &'a str>,
        artifacts: &[ArtifactKind],
    ) -> Result<()> {
        let mut record = self.lock()?;
        let mut added = 0usize;
        for unit in units {
            let entry = record.entry(unit.to_string()).or_default();
            for artifact in artifacts {
                if !entry.contains_key(artifact.as_str()) {
                    entry.insert(artifact.to_string(), ArtifactStatus::Pending);
                    added += 1;
                }
            }
        }

        if added > 0 || !self.path.exists() {
            self.persist(&record)?;
            debug!("Checkpoint: registered {} pending artifacts", added);
        }
        Ok(())
    }

    pub fn summary(&self) -> Result<CheckpointSummary> {
        let record = self.lock()?;
        let mut summary = CheckpointSummary {
            units: record.len(),
            ..Default::default()
        };
        for artifacts in record.values() {
            for (artifact, status) in artifacts {
                let counts = summary.by_artifact.entry(artifact.clone()).or_default();
                counts.1 += 1;
                match status {
                    ArtifactStatus::Completed => {
                        counts.0 += 1;
                        summary.completed += 1;
                    }
                    ArtifactStatus::Pending => summary.pending += 1,
                }
            }
        }
        Ok(summary)
    }

    fn persist(&self, record: &CheckpointRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        write_atomic(&self.path, json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::output::CHECKPOINT_FILE;

    #[tokio::test]
    async fn test_mark_complete_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);

        let store = CheckpointStore::load(&path).unwrap();
        assert!(!store.is_complete("01", ArtifactKind::Memo));
        store.mark_complete("01", ArtifactKind::Memo).await.unwrap();

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert!(reloaded.is_complete("01", ArtifactKind::Memo));
        assert!(!reloaded.is_complete("01", ArtifactKind::SlideSvg));
        assert!(!reloaded.is_complete("02", ArtifactKind::Memo));
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[tokio::test]
    async fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let store = CheckpointStore::load(&path).unwrap();
        store
            .ensure_pending(["01"], &[ArtifactKind::Memo, ArtifactKind::SlideSvg])
            .unwrap();
        store.mark_complete("01", ArtifactKind::Memo).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["01"]["memo"], "completed");
        assert_eq!(raw["01"]["slide_svg"], "pending");
    }

    #[tokio::test]
    async fn test_ensure_pending_keeps_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::load(dir.path().join(CHECKPOINT_FILE)).unwrap();
        store.mark_complete("02", ArtifactKind::Memo).await.unwrap();
        store
            .ensure_pending(["01", "02"], &[ArtifactKind::Memo])
            .unwrap();

        assert!(store.is_complete("02", ArtifactKind::Memo));
        let summary = store.summary().unwrap();
        assert_eq!(summary.units, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.by_artifact["memo"], (1, 2));
        assert!(!summary.is_finished());
    }

    #[tokio::test]
    async fn test_corrupt_record_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, "{ not json").unwrap();

        let store = CheckpointStore::load(&path).unwrap();
        assert_eq!(store.summary().unwrap().units, 0);

        store.mark_complete("01", ArtifactKind::Slide).await.unwrap();
        assert!(CheckpointStore::load(&path).unwrap().is_complete("01", ArtifactKind::Slide));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_marks_all_land() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        let store = std::sync::Arc::new(CheckpointStore::load(&path).unwrap());

        let handles: Vec<_> = (1..=8)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move {
                    let unit = format!("{:02}", n);
                    store.mark_complete(&unit, ArtifactKind::Memo).await.unwrap();
                    store.mark_complete(&unit, ArtifactKind::SlideSvg).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let reloaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(reloaded.summary().unwrap().completed, 16);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
