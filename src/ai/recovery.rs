//! Recovery Coordinator
//!
//! Human-fixable agent failures (expired login, exhausted quota) suspend the
//! job instead of burning rework attempts:
//!
//! 1. Raise the recovery signal (`.paused` in the run directory)
//! 2. Poll until a human removes it (`slidewright continue`)
//! 3. Consume the model override (`.model_override`) if one was left
//! 4. Re-run the same operation with the attempt counter untouched
//!
//! The signal is job-global: concurrent tasks that hit the same outage
//! coalesce onto one marker and all resume when it is removed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::constants::recovery::{OVERRIDE_FILE, SIGNAL_FILE};
use crate::types::{AgentFailure, Result, TaskKind};

// =============================================================================
// Signal Contents
// =============================================================================

/// What the recovery signal file tells the human
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionNotice {
    pub reason: String,
    pub task: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_hint: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl SuspensionNotice {
    fn from_failure(task: TaskKind, failure: &AgentFailure) -> Self {
        Self {
            reason: failure.kind.to_string(),
            task: task.to_string(),
            message: failure.message.clone(),
            reset_hint: failure.reset_hint.clone(),
            raised_at: Utc::now(),
        }
    }
}

/// Decision taken for one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Suspended and resumed; the attempt was not consumed
    Resumed,
    /// Counted against the attempt budget
    Consumed,
}

// =============================================================================
// Coordinator
// =============================================================================

pub struct RecoveryCoordinator {
    signal_path: PathBuf,
    override_path: PathBuf,
    poll_interval: Duration,
    model: RwLock<Option<String>>,
    /// Serializes signal creation and override consumption
    gate: Mutex<()>,
}

impl RecoveryCoordinator {
    pub fn new(run_dir: &Path, poll_interval: Duration, initial_model: Option<String>) -> Self {
        Self {
            signal_path: run_dir.join(SIGNAL_FILE),
            override_path: run_dir.join(OVERRIDE_FILE),
            poll_interval,
            model: RwLock::new(initial_model),
            gate: Mutex::new(()),
        }
    }

    /// Model applied to the next invocation
    pub fn current_model(&self) -> Option<String> {
        match self.model.read() {
            Ok(model) => model.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub async fn is_suspended(&self) -> Result<bool> {
        Ok(tokio::fs::try_exists(&self.signal_path).await?)
    }

    /// Run `op` with the current model, suspending on human-fixable
    /// failures and re-running after resume.
    ///
    /// Any other failure increments `attempts` and is returned as
    /// `DeckError::Agent`.
    pub async fn run<T, F, Fut>(&self, task: TaskKind, attempts: &mut u32, mut op: F) -> Result<T>
    where
        F: FnMut(Option<String>) -> Fut,
        Fut: Future<Output = std::result::Result<T, AgentFailure>>,
    {
        loop {
            match op(self.current_model()).await {
                Ok(value) => return Ok(value),
                Err(failure) => match self.handle_failure(task, &failure, attempts).await? {
                    FailureDisposition::Resumed => continue,
                    FailureDisposition::Consumed => return Err(failure.into()),
                },
            }
        }
    }

    /// Decide what a single failure costs
    pub async fn handle_failure(
        &self,
        task: TaskKind,
        failure: &AgentFailure,
        attempts: &mut u32,
    ) -> Result<FailureDisposition> {
        if failure.is_human_fixable() {
            self.suspend(task, failure).await?;
            return Ok(FailureDisposition::Resumed);
        }

        *attempts += 1;
        warn!("{} attempt {} failed: {}", task, attempts, failure);
        Ok(FailureDisposition::Consumed)
    }

    async fn suspend(&self, task: TaskKind, failure: &AgentFailure) -> Result<()> {
        {
            let _gate = self.gate.lock().await;
            if !tokio::fs::try_exists(&self.signal_path).await? {
                let notice = SuspensionNotice::from_failure(task, failure);
                tokio::fs::write(&self.signal_path, serde_json::to_vec_pretty(&notice)?).await?;
                warn!(
                    "Job suspended on {} ({}): {}. Run `slidewright continue` to resume.",
                    task, failure.kind, failure.message
                );
                if let Some(hint) = &failure.reset_hint {
                    info!("Quota resets after {}", hint);
                }
            } else {
                info!("{} joins the pending suspension ({})", task, failure.kind);
            }
        }

        self.wait_for_release().await?;
        self.consume_override().await?;
        info!("Job resumed, retrying {}", task);
        Ok(())
    }

    async fn wait_for_release(&self) -> Result<()> {
        while tokio::fs::try_exists(&self.signal_path).await? {
            tokio::time::sleep(self.poll_interval).await;
        }
        Ok(())
    }

    /// Read and delete the override exactly once
    async fn consume_override(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        if !tokio::fs::try_exists(&self.override_path).await? {
            return Ok(());
        }

        let raw = tokio::fs::read_to_string(&self.override_path).await?;
        tokio::fs::remove_file(&self.override_path).await?;

        let model = raw.trim();
        if model.is_empty() {
            return Ok(());
        }
        info!("Switching model to {}", model);
        match self.model.write() {
            Ok(mut current) => *current = Some(model.to_string()),
            Err(poisoned) => *poisoned.into_inner() = Some(model.to_string()),
        }
        Ok(())
    }

    /// Wait out a signal left behind by an earlier process.
    ///
    /// Returns whether the job had to wait.
    pub async fn await_leftover_signal(&self) -> Result<bool> {
        if !self.is_suspended().await? {
            return Ok(false);
        }

        match read_notice(&self.signal_path).await {
            Some(notice) => warn!(
                "Run was left suspended on {} ({}): {}",
                notice.task, notice.reason, notice.message
            ),
            None => warn!("Run was left suspended"),
        }
        self.wait_for_release().await?;
        self.consume_override().await?;
        Ok(true)
    }
}

async fn read_notice(path: &Path) -> Option<SuspensionNotice> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    serde_json::from_str(&raw).ok()
}

// =============================================================================
// Human Side
// =============================================================================

/// Operator actions on a suspended run
pub struct RecoveryControl {
    run_dir: PathBuf,
}

impl RecoveryControl {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    /// Current suspension, if any. An unreadable signal still counts.
    pub fn notice(&self) -> Result<Option<SuspensionNotice>> {
        let path = self.run_dir.join(SIGNAL_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw).unwrap_or_else(|_| {
            SuspensionNotice {
                reason: "UNKNOWN".to_string(),
                task: "-".to_string(),
                message: raw.trim().to_string(),
                reset_hint: None,
                raised_at: Utc::now(),
            }
        })))
    }

    /// Resume a suspended run, optionally switching model.
    ///
    /// The override is written before the signal is removed so the waiting
    /// task always sees it. Returns `false` when the run was not suspended.
    pub fn release(&self, switch_model: Option<&str>) -> Result<bool> {
        let signal = self.run_dir.join(SIGNAL_FILE);
        if !signal.exists() {
            return Ok(false);
        }

        if let Some(model) = switch_model.map(str::trim).filter(|m| !m.is_empty()) {
            std::fs::write(self.run_dir.join(OVERRIDE_FILE), model)?;
        }
        std::fs::remove_file(&signal)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeckError, FailureKind};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn coordinator(dir: &Path) -> RecoveryCoordinator {
        RecoveryCoordinator::new(dir, Duration::from_millis(5), Some("model-a".into()))
    }

    /// Waits for the signal, then resumes like the `continue` command
    fn operator(dir: PathBuf, model: Option<&'static str>) -> tokio::task::JoinHandle<SuspensionNotice> {
        tokio::spawn(async move {
            let control = RecoveryControl::new(&dir);
            loop {
                if let Some(notice) = control.notice().unwrap() {
                    assert!(control.release(model).unwrap());
                    return notice;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_other_failure_consumes_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let mut attempts = 0;

        let disposition = coordinator
            .handle_failure(
                TaskKind::CreateMemo,
                &AgentFailure::new(FailureKind::Other, "boom"),
                &mut attempts,
            )
            .await
            .unwrap();

        assert_eq!(disposition, FailureDisposition::Consumed);
        assert_eq!(attempts, 1);
        assert!(!coordinator.is_suspended().await.unwrap());
    }

    #[tokio::test]
    async fn test_human_fixable_failure_keeps_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let handle = operator(dir.path().to_path_buf(), None);
        let mut attempts = 2;

        let failure = AgentFailure::new(FailureKind::Authentication, "login required");
        let disposition = coordinator
            .handle_failure(TaskKind::Analyze, &failure, &mut attempts)
            .await
            .unwrap();

        assert_eq!(disposition, FailureDisposition::Resumed);
        assert_eq!(attempts, 2);
        let notice = handle.await.unwrap();
        assert_eq!(notice.reason, "AUTHENTICATION");
        assert_eq!(notice.task, "ANALYZE");
        assert!(!dir.path().join(SIGNAL_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_resumes_with_override() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let handle = operator(dir.path().to_path_buf(), Some("model-b"));

        let calls = AtomicU32::new(0);
        let mut attempts = 0;
        let result = coordinator
            .run(TaskKind::Plan, &mut attempts, |model| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(AgentFailure::new(FailureKind::RateLimit, "quota exhausted"))
                    } else {
                        Ok(model)
                    }
                }
            })
            .await
            .unwrap();

        handle.await.unwrap();
        assert_eq!(result.as_deref(), Some("model-b"));
        assert_eq!(attempts, 0);
        assert_eq!(coordinator.current_model().as_deref(), Some("model-b"));
        assert!(!dir.path().join(OVERRIDE_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_returns_other_failures() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        let mut attempts = 0;

        let result: Result<()> = coordinator
            .run(TaskKind::Plan, &mut attempts, |_| async {
                Err(AgentFailure::empty(TaskKind::Plan))
            })
            .await;

        assert!(matches!(result, Err(DeckError::Agent(f)) if f.kind == FailureKind::Empty));
        assert_eq!(attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_suspensions_share_one_signal() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = Arc::new(coordinator(dir.path()));

        let waiters: Vec<_> = [TaskKind::CreateMemo, TaskKind::CreateSlideSvg]
            .into_iter()
            .map(|task| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let mut attempts = 0;
                    let failure = AgentFailure::new(FailureKind::RateLimit, "429");
                    coordinator
                        .handle_failure(task, &failure, &mut attempts)
                        .await
                        .unwrap();
                    attempts
                })
            })
            .collect();

        let signal = dir.path().join(SIGNAL_FILE);
        while !signal.exists() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        // Give the second task time to join before releasing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            RecoveryControl::new(dir.path())
                .release(Some("model-c"))
                .unwrap()
        );

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 0);
        }
        assert_eq!(coordinator.current_model().as_deref(), Some("model-c"));
    }

    #[tokio::test]
    async fn test_leftover_signal() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator(dir.path());
        assert!(!coordinator.await_leftover_signal().await.unwrap());

        std::fs::write(dir.path().join(SIGNAL_FILE), "paused by hand").unwrap();
        let handle = operator(dir.path().to_path_buf(), None);
        assert!(coordinator.await_leftover_signal().await.unwrap());

        let notice = handle.await.unwrap();
        assert_eq!(notice.reason, "UNKNOWN");
        assert_eq!(notice.message, "paused by hand");
    }

    #[test]
    fn test_release_without_signal() {
        let dir = tempfile::tempdir().unwrap();
        let control = RecoveryControl::new(dir.path());
        assert!(!control.release(Some("model-x")).unwrap());
        assert!(!dir.path().join(OVERRIDE_FILE).exists());
    }
}
