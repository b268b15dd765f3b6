//! Deck Generation Pipeline
//!
//! ## Pipeline Architecture
//!
//! ```text
//! ANALYZE → PLAN → CREATE_ALL_SLIDES (one holistic call)
//!                         ↓
//!            per page, `generation.concurrency` at a time:
//!            CREATE_MEMO → CREATE_MEMO_EN → CREATE_SLIDE_SVG → CREATE_CONCEPTUAL_SVG
//! ```
//!
//! Every task runs through the rework loop (generate, review, regenerate)
//! and every accepted artifact is recorded in the checkpoint store, so a
//! resumed run only does the work that is still pending.

pub mod checkpoint;
pub mod output;
pub mod review;
pub mod rework;
pub mod tasks;
pub mod types;

pub use checkpoint::{ArtifactStatus, CheckpointRecord, CheckpointStore, CheckpointSummary};
pub use output::{OutputTree, Persisted, Quality, RunManifest};
pub use review::{ReviewReport, Reviewer};
pub use rework::{Candidate, ContentKind, QualityTask, ReworkLoop, ReworkOutcome, ReworkReport};
pub use tasks::DeckInputs;
pub use types::{ArtifactKind, WorkUnit};

use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};

use crate::ai::{AgentInvoker, AgentRunner, RecoveryCoordinator, TemplateStore, items_of};
use crate::config::Config;
use crate::constants::output::DECK_UNIT;
use crate::types::{DeckError, Result, TaskKind, json_string, log_filter_warn};
use tasks::{quality_task, required_kinds, rework_budget, unit_artifacts};

// =============================================================================
// Run Summary
// =============================================================================

/// How one (unit, artifact) pair ended in this run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tally {
    Perfect,
    Acceptable,
    Degraded,
    Failed,
    Declined,
    /// Already complete from an earlier run
    Skipped,
    /// Waiting on an upstream artifact that is still missing
    Deferred,
}

impl From<&ReworkOutcome> for Tally {
    fn from(outcome: &ReworkOutcome) -> Self {
        match outcome {
            ReworkOutcome::Perfect(_) => Self::Perfect,
            ReworkOutcome::Acceptable(_) => Self::Acceptable,
            ReworkOutcome::Degraded(_) => Self::Degraded,
            ReworkOutcome::Failed => Self::Failed,
            ReworkOutcome::Declined => Self::Declined,
        }
    }
}

#[derive(Debug, Clone)]
struct StageRecord {
    unit: String,
    artifact: ArtifactKind,
    tally: Tally,
}

impl StageRecord {
    fn new(unit: &str, artifact: ArtifactKind, tally: Tally) -> Self {
        Self {
            unit: unit.to_string(),
            artifact,
            tally,
        }
    }
}

/// Result of a pipeline run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub run_dir: PathBuf,
    pub units: usize,
    pub perfect: usize,
    pub acceptable: usize,
    pub degraded: usize,
    pub failed: usize,
    pub declined: usize,
    pub skipped: usize,
    pub deferred: usize,
    /// `unit/artifact` pairs that still need work
    pub incomplete: Vec<String>,
    pub duration_secs: u64,
}

impl RunSummary {
    fn new(run_dir: &Path) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            ..Default::default()
        }
    }

    fn add(&mut self, record: StageRecord) {
        match record.tally {
            Tally::Perfect => self.perfect += 1,
            Tally::Acceptable => self.acceptable += 1,
            Tally::Degraded => self.degraded += 1,
            Tally::Declined => self.declined += 1,
            Tally::Skipped => self.skipped += 1,
            Tally::Failed => self.failed += 1,
            Tally::Deferred => self.deferred += 1,
        }
        if matches!(record.tally, Tally::Failed | Tally::Deferred) {
            self.incomplete
                .push(format!("{}/{}", record.unit, record.artifact));
        }
    }

    fn finish(mut self, started: Instant) -> Self {
        self.incomplete.sort();
        self.duration_secs = started.elapsed().as_secs();
        info!(
            "Run finished in {}s: {} perfect, {} acceptable, {} degraded, {} failed, {} declined, {} skipped, {} deferred",
            self.duration_secs,
            self.perfect,
            self.acceptable,
            self.degraded,
            self.failed,
            self.declined,
            self.skipped,
            self.deferred
        );
        self
    }

    /// Every artifact is on disk; degraded ones included
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }
}

// =============================================================================
// Deck Pipeline
// =============================================================================

pub struct DeckPipeline {
    config: Config,
    tree: OutputTree,
    inputs: DeckInputs,
    invoker: Arc<AgentInvoker>,
    recovery: Arc<RecoveryCoordinator>,
    rework: ReworkLoop,
    checkpoint: CheckpointStore,
}

impl DeckPipeline {
    /// Start a fresh run for `source` under `paths.output_root`
    pub fn create(config: Config, runner: Arc<dyn AgentRunner>, source: &Path) -> Result<Self> {
        if !source.is_file() {
            return Err(DeckError::Config(format!(
                "source document not found: {}",
                source.display()
            )));
        }
        let tree = OutputTree::create(&config.paths.output_root, source)?;
        Self::assemble(config, runner, tree, source)
    }

    /// Reopen an existing run directory. The source recorded in `run.json`
    /// is used unless `source` overrides it.
    pub fn open(
        config: Config,
        runner: Arc<dyn AgentRunner>,
        run_dir: &Path,
        source: Option<&Path>,
    ) -> Result<Self> {
        let tree = OutputTree::open(run_dir)?;
        let manifest = log_filter_warn(tree.read_manifest(), "Unreadable run.json").flatten();

        let source = match (source, &manifest) {
            (Some(source), _) => source.to_path_buf(),
            (None, Some(manifest)) => manifest.source.clone(),
            (None, None) => {
                return Err(DeckError::pipeline(
                    "resume",
                    format!(
                        "{} has no run.json; pass the source document explicitly",
                        run_dir.display()
                    ),
                ));
            }
        };
        if let Some(manifest) = &manifest
            && manifest.source == source
            && !manifest.source_unchanged()
        {
            warn!(
                "Source {} changed since the run started; finished artifacts are kept",
                source.display()
            );
        }

        let existing_slides = manifest.and_then(|m| m.existing_slides);
        Ok(Self::assemble(config, runner, tree, &source)?.with_existing_slides(existing_slides))
    }

    fn assemble(
        config: Config,
        runner: Arc<dyn AgentRunner>,
        tree: OutputTree,
        source: &Path,
    ) -> Result<Self> {
        let templates = Arc::new(TemplateStore::new(config.paths.templates.clone()));
        let invoker = Arc::new(
            AgentInvoker::new(runner, templates).with_retry_delay(config.agent.retry_delay()),
        );
        let recovery = Arc::new(RecoveryCoordinator::new(
            tree.root(),
            config.recovery.poll_interval(),
            config.agent.model.clone(),
        ));
        let rework = ReworkLoop::new(Arc::clone(&invoker), Arc::clone(&recovery))
            .with_local_retries(config.agent.local_retries);
        let checkpoint = CheckpointStore::load(tree.checkpoint_path())?;
        let inputs = DeckInputs::new(source, &config);

        Ok(Self {
            config,
            tree,
            inputs,
            invoker,
            recovery,
            rework,
            checkpoint,
        })
    }

    /// Plan from an existing slide deck instead of the source alone
    pub fn with_existing_slides(mut self, path: Option<PathBuf>) -> Self {
        self.inputs = self.inputs.with_existing_slides(path);
        self
    }

    pub fn run_dir(&self) -> &Path {
        self.tree.root()
    }

    pub fn checkpoint(&self) -> &CheckpointStore {
        &self.checkpoint
    }

    /// Run every stage; completed artifacts are skipped
    #[instrument(skip(self), fields(run = %self.tree.root().display()))]
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        self.preflight().await?;
        self.run_all_stages(started).await
    }

    /// Continue an interrupted run from its plan (or its slide files)
    #[instrument(skip(self), fields(run = %self.tree.root().display()))]
    pub async fn resume(&self) -> Result<RunSummary> {
        let started = Instant::now();
        self.preflight().await?;

        let Some((plan, units)) = self.recover_plan().await else {
            info!("No plan to resume from, starting from the analysis");
            return self.run_all_stages(started).await;
        };
        info!("Resuming {} pages", units.len());

        let mut summary = RunSummary::new(self.tree.root());
        self.unit_stages(&plan, units, &mut summary).await?;
        Ok(summary.finish(started))
    }

    async fn preflight(&self) -> Result<()> {
        self.invoker
            .templates()
            .require_all(&required_kinds(&self.config))
            .await?;

        let runner = self.invoker.runner();
        if !runner.health_check().await? {
            return Err(DeckError::Config(format!(
                "agent '{}' did not answer --version; check agent.command",
                runner.name()
            )));
        }

        if self.recovery.await_leftover_signal().await? {
            info!("Earlier suspension released, continuing");
        }
        Ok(())
    }

    async fn run_all_stages(&self, started: Instant) -> Result<RunSummary> {
        if self.tree.read_manifest()?.is_none() {
            let manifest =
                RunManifest::new(&self.inputs.source, self.inputs.existing_slides.as_deref())?;
            self.tree.write_manifest(&manifest)?;
        }
        self.checkpoint
            .ensure_pending([DECK_UNIT], &[ArtifactKind::Analysis, ArtifactKind::Plan])?;

        let mut summary = RunSummary::new(self.tree.root());
        let analysis = self.analysis_stage(&mut summary).await?;
        let (plan, units) = self.plan_stage(&analysis, &mut summary).await?;
        self.unit_stages(&plan, units, &mut summary).await?;
        Ok(summary.finish(started))
    }

    // =========================================================================
    // Deck-level stages
    // =========================================================================

    #[instrument(skip_all)]
    async fn analysis_stage(&self, summary: &mut RunSummary) -> Result<String> {
        let artifact = ArtifactKind::Analysis;
        let path = self.tree.analysis_path();
        if self.checkpoint.is_complete(DECK_UNIT, artifact)
            && let Some(text) = self.tree.read_artifact(&path).await
        {
            info!("Analysis: skipped (already complete)");
            summary.add(StageRecord::new(DECK_UNIT, artifact, Tally::Skipped));
            return Ok(text);
        }

        info!("Analysis: starting");
        let report = self
            .rework
            .run_task(
                &quality_task(artifact),
                self.inputs.analysis(),
                rework_budget(&self.config.rework, artifact),
            )
            .await?;
        summary.add(self.settle(DECK_UNIT, artifact, &path, &report).await?);

        report
            .outcome
            .candidate()
            .map(Candidate::to_text)
            .ok_or_else(|| {
                DeckError::pipeline(
                    TaskKind::Analyze.as_str(),
                    format!("no usable analysis after {} attempt(s)", report.attempts_made),
                )
            })
    }

    #[instrument(skip_all)]
    async fn plan_stage(
        &self,
        analysis: &str,
        summary: &mut RunSummary,
    ) -> Result<(String, Vec<WorkUnit>)> {
        let artifact = ArtifactKind::Plan;
        let path = self.tree.plan_path();
        if self.checkpoint.is_complete(DECK_UNIT, artifact)
            && let Some(found) = self.read_plan().await
        {
            info!("Plan: skipped (already complete)");
            summary.add(StageRecord::new(DECK_UNIT, artifact, Tally::Skipped));
            return Ok(found);
        }

        info!("Plan: starting");
        let report = self
            .rework
            .run_task(
                &quality_task(artifact),
                self.inputs.plan(analysis),
                rework_budget(&self.config.rework, artifact),
            )
            .await?;

        let Some(plan) = report.outcome.candidate().and_then(Candidate::as_data) else {
            self.tree.persist(&path, &report).await?;
            return Err(DeckError::Plan(format!(
                "no usable plan after {} attempt(s)",
                report.attempts_made
            )));
        };
        let units = types::units_from_plan(plan)?;
        let text = report
            .outcome
            .candidate()
            .map(Candidate::to_text)
            .unwrap_or_default();

        summary.add(self.settle(DECK_UNIT, artifact, &path, &report).await?);
        info!("Plan: {} pages", units.len());
        Ok((text, units))
    }

    async fn read_plan(&self) -> Option<(String, Vec<WorkUnit>)> {
        let text = self.tree.read_artifact(&self.tree.plan_path()).await?;
        let plan: Value = log_filter_warn(serde_json::from_str(&text), "Unreadable plan.json")?;
        let units = log_filter_warn(types::units_from_plan(&plan), "Unusable plan.json")?;
        Some((text, units))
    }

    /// Plan text and units of an interrupted run
    async fn recover_plan(&self) -> Option<(String, Vec<WorkUnit>)> {
        if let Some(found) = self.read_plan().await {
            return Some(found);
        }

        let units = types::units_from_slides_dir(&self.tree.slides_dir()).ok()?;
        info!("No plan.json, rebuilt {} pages from slide files", units.len());
        let pages: Vec<Value> = units
            .iter()
            .map(|u| serde_json::json!({ "page": u.id, "topic": u.topic }))
            .collect();
        let plan = serde_json::to_string_pretty(&serde_json::json!({ "pages": pages })).ok()?;
        Some((plan, units))
    }

    // =========================================================================
    // Unit stages
    // =========================================================================

    async fn unit_stages(
        &self,
        plan: &str,
        units: Vec<WorkUnit>,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let artifacts = unit_artifacts(&self.config);
        self.checkpoint
            .ensure_pending(units.iter().map(|u| u.id.as_str()), &artifacts)?;
        summary.units = units.len();

        for record in self.slides_stage(plan, &units).await? {
            summary.add(record);
        }

        let concurrency = self.config.generation.concurrency.max(1);
        info!(
            "Per-page stages: {} pages, {} at a time",
            units.len(),
            concurrency
        );

        let artifacts = &artifacts;
        let mut stream = futures::stream::iter(units)
            .map(|unit| async move {
                let result = self.unit_stage(&unit, artifacts).await;
                (unit, result)
            })
            .buffer_unordered(concurrency);

        let mut first_error = None;
        while let Some((unit, result)) = stream.next().await {
            match result {
                Ok(records) => records.into_iter().for_each(|r| summary.add(r)),
                Err(e) => {
                    warn!("{} stopped: {}", unit, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// One CREATE_ALL_SLIDES call for every page whose slide is pending
    #[instrument(skip_all)]
    async fn slides_stage(&self, plan: &str, units: &[WorkUnit]) -> Result<Vec<StageRecord>> {
        let artifact = ArtifactKind::Slide;
        let (done, pending): (Vec<&WorkUnit>, Vec<&WorkUnit>) = units
            .iter()
            .partition(|u| self.checkpoint.is_complete(&u.id, artifact));

        let mut records: Vec<StageRecord> = done
            .iter()
            .map(|u| StageRecord::new(&u.id, artifact, Tally::Skipped))
            .collect();
        if pending.is_empty() {
            info!("Slides: skipped (all {} pages complete)", units.len());
            return Ok(records);
        }

        info!("Slides: generating {} pages in one call", pending.len());
        let report = self
            .rework
            .run_task(
                &quality_task(artifact),
                self.inputs.slides(plan),
                rework_budget(&self.config.rework, artifact),
            )
            .await?;

        let quality = match report.outcome {
            ReworkOutcome::Degraded(_) => Quality::Degraded,
            _ => Quality::Reviewed,
        };
        let items = report
            .outcome
            .candidate()
            .and_then(Candidate::as_data)
            .and_then(items_of);

        for unit in pending {
            let path = self.tree.unit_path(unit, artifact);
            let content = items.and_then(|items| {
                items
                    .iter()
                    .find(|item| WorkUnit::from_item(item).is_some_and(|u| u.id == unit.id))
                    .and_then(|item| json_string(item, "content"))
                    .filter(|c| !c.trim().is_empty())
            });

            match content {
                Some(content) => {
                    self.tree.write_artifact(&path, &content, quality).await?;
                    self.checkpoint.mark_complete(&unit.id, artifact).await?;
                    records.push(StageRecord::new(&unit.id, artifact, Tally::from(&report.outcome)));
                }
                None => {
                    if items.is_some() {
                        warn!("{} missing from the slides answer", unit);
                    }
                    let missing = ReworkReport {
                        outcome: ReworkOutcome::Failed,
                        feedback: vec![format!("page {} missing from the slides answer", unit.id)],
                        ..report.clone()
                    };
                    self.tree.write_placeholder(&path, &missing).await?;
                    records.push(StageRecord::new(&unit.id, artifact, Tally::Failed));
                }
            }
        }
        Ok(records)
    }

    /// Notes and diagrams of one page, in order
    #[instrument(skip(self, artifacts), fields(page = %unit.id))]
    async fn unit_stage(
        &self,
        unit: &WorkUnit,
        artifacts: &[ArtifactKind],
    ) -> Result<Vec<StageRecord>> {
        let downstream: Vec<ArtifactKind> = artifacts
            .iter()
            .copied()
            .filter(|a| !matches!(a, ArtifactKind::Slide) && !a.is_deck_level())
            .collect();
        let mut records = Vec::with_capacity(downstream.len());

        let Some(slide) = self.completed_text(unit, ArtifactKind::Slide).await else {
            warn!("{}: no slide content yet, notes and diagrams deferred", unit);
            for artifact in downstream {
                if !self.checkpoint.is_complete(&unit.id, artifact) {
                    records.push(StageRecord::new(&unit.id, artifact, Tally::Deferred));
                }
            }
            return Ok(records);
        };

        let mut memo = self.completed_text(unit, ArtifactKind::Memo).await;

        for artifact in downstream {
            if self.checkpoint.is_complete(&unit.id, artifact) {
                records.push(StageRecord::new(&unit.id, artifact, Tally::Skipped));
                continue;
            }

            let context = match artifact {
                ArtifactKind::Memo => self.inputs.memo(unit, &slide),
                ArtifactKind::MemoEn => self.inputs.memo_en(unit, &slide, memo.as_deref()),
                ArtifactKind::SlideSvg => self.inputs.slide_svg(unit, &slide),
                ArtifactKind::ConceptualSvg => {
                    self.inputs.conceptual_svg(unit, &slide, memo.as_deref())
                }
                ArtifactKind::Analysis | ArtifactKind::Plan | ArtifactKind::Slide => continue,
            };

            let report = self
                .rework
                .run_task(
                    &quality_task(artifact),
                    context,
                    rework_budget(&self.config.rework, artifact),
                )
                .await?;
            if artifact == ArtifactKind::Memo
                && let Some(candidate) = report.outcome.candidate()
            {
                memo = Some(candidate.to_text());
            }

            let path = self.tree.unit_path(unit, artifact);
            records.push(self.settle(&unit.id, artifact, &path, &report).await?);
        }
        Ok(records)
    }

    /// Content of an artifact finished earlier
    async fn completed_text(&self, unit: &WorkUnit, artifact: ArtifactKind) -> Option<String> {
        if !self.checkpoint.is_complete(&unit.id, artifact) {
            return None;
        }
        self.tree.read_artifact(&self.tree.unit_path(unit, artifact)).await
    }

    /// Persist a report and checkpoint it unless it failed
    async fn settle(
        &self,
        unit: &str,
        artifact: ArtifactKind,
        path: &Path,
        report: &ReworkReport,
    ) -> Result<StageRecord> {
        match self.tree.persist(path, report).await? {
            Persisted::Placeholder => {
                warn!(
                    "{}/{} failed after {} attempt(s), left pending",
                    unit, artifact, report.attempts_made
                );
            }
            Persisted::Written | Persisted::Skipped => {
                self.checkpoint.mark_complete(unit, artifact).await?;
            }
        }
        Ok(StageRecord::new(unit, artifact, Tally::from(&report.outcome)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::RecoveryControl;
    use crate::ai::provider::scripted::{Reply, ScriptedAgent, all_templates};
    use crate::constants::output::{CHECKPOINT_FILE, FAILED_MARKER};
    use crate::constants::recovery::SIGNAL_FILE;
    use std::time::Duration;

    const VALID: &str = r#"{"is_valid": true, "is_acceptable": true, "feedback": ""}"#;

    const PLAN: &str = r#"{"pages": [
        {"page": 1, "topic": "Intro", "summary": "Why it matters"},
        {"page": 2, "topic": "Methods", "summary": "How it works"}
    ]}"#;

    const SLIDES: &str = r##"[
        {"page": "01", "topic": "Intro", "content": "# Intro\n- point"},
        {"page": "02", "topic": "Methods", "content": "# Methods\n- step"}
    ]"##;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
        source: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let templates = dir.path().join("AGENTS.md");
        std::fs::write(&templates, all_templates()).unwrap();
        let source = dir.path().join("chapter.md");
        std::fs::write(&source, "# Chapter 1\nAttention is all you need.").unwrap();

        let mut config = Config::default();
        config.paths.templates = templates;
        config.paths.output_root = dir.path().join("output");
        config.agent.retry_delay_ms = 1;
        config.agent.local_retries = 0;
        config.recovery.poll_interval_ms = 10;
        config.generation.generate_svg = false;
        config.generation.concurrency = 2;

        Fixture {
            dir,
            config,
            source,
        }
    }

    fn scripted_validators(agent: &ScriptedAgent) {
        for kind in TaskKind::ALL.iter().filter(|k| k.is_validation()) {
            agent.push_text(*kind, VALID);
        }
    }

    fn happy_agent() -> Arc<ScriptedAgent> {
        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis\nKey ideas.")
            .push_text(TaskKind::Plan, PLAN)
            .push_text(TaskKind::CreateAllSlides, SLIDES)
            .push_text(TaskKind::CreateMemo, "Speaker notes with Transformer terms.");
        Arc::new(agent)
    }

    #[tokio::test]
    async fn test_full_run() {
        let fx = fixture();
        let agent = happy_agent();
        let pipeline = DeckPipeline::create(fx.config.clone(), agent.clone(), &fx.source).unwrap();

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.units, 2);
        assert_eq!(summary.perfect, 6);
        assert!(summary.is_complete());
        assert_eq!(agent.calls_for(TaskKind::CreateAllSlides), 1);
        assert_eq!(agent.calls_for(TaskKind::CreateMemo), 2);

        let root = pipeline.run_dir();
        let slide = std::fs::read_to_string(root.join("slides/01_Intro.md")).unwrap();
        assert!(slide.starts_with("# Intro"));
        assert!(root.join("notes/note-02_Methods-zh.md").exists());
        assert!(root.join("plan.json").exists());
        assert!(root.join("run.json").exists());
        assert!(pipeline.checkpoint().summary().unwrap().is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_page_suspends_while_the_other_finishes() {
        let fx = fixture();
        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis")
            .push_text(TaskKind::Plan, PLAN)
            .push_text(TaskKind::CreateAllSlides, SLIDES)
            .push(
                TaskKind::CreateMemo,
                Reply::exit(1, "Error: 401 Unauthorized, login required"),
            )
            .push_text(TaskKind::CreateMemo, "Speaker notes with Transformer terms.");
        let agent = Arc::new(agent);
        let pipeline = DeckPipeline::create(fx.config.clone(), agent.clone(), &fx.source).unwrap();

        // Release only once the other page's memo is checkpointed.
        let run_dir = pipeline.run_dir().to_path_buf();
        let releaser = tokio::spawn(async move {
            let progress = run_dir.join(CHECKPOINT_FILE);
            loop {
                let suspended = run_dir.join(SIGNAL_FILE).exists();
                let memos_done = std::fs::read_to_string(&progress)
                    .map(|raw| raw.matches(r#""memo": "completed""#).count())
                    .unwrap_or(0);
                if suspended && memos_done == 1 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            RecoveryControl::new(&run_dir).release(Some("model-b")).unwrap()
        });

        let summary = pipeline.run().await.unwrap();
        assert!(releaser.await.unwrap());
        assert_eq!(summary.perfect, 6);
        assert!(summary.is_complete());
        assert_eq!(agent.calls_for(TaskKind::CreateMemo), 3);

        let retried = agent
            .calls()
            .into_iter()
            .rev()
            .find(|r| r.task == TaskKind::CreateMemo)
            .unwrap();
        assert_eq!(retried.model.as_deref(), Some("model-b"));
        assert!(!pipeline.run_dir().join(SIGNAL_FILE).exists());
    }

    #[tokio::test]
    async fn test_resume_skips_completed_work() {
        let fx = fixture();
        let first = DeckPipeline::create(fx.config.clone(), happy_agent(), &fx.source).unwrap();
        first.run().await.unwrap();

        let idle = Arc::new(ScriptedAgent::new());
        let second =
            DeckPipeline::open(fx.config.clone(), idle.clone(), first.run_dir(), None).unwrap();
        let summary = second.resume().await.unwrap();

        assert!(idle.calls().is_empty());
        assert_eq!(summary.skipped, 4);
        assert!(summary.is_complete());
    }

    #[tokio::test]
    async fn test_failed_memo_is_retried_on_resume() {
        let mut fx = fixture();
        fx.config.rework.notes = 0;

        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis")
            .push_text(TaskKind::Plan, PLAN)
            .push_text(TaskKind::CreateAllSlides, SLIDES);
        let pipeline =
            DeckPipeline::create(fx.config.clone(), Arc::new(agent), &fx.source).unwrap();

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.incomplete, vec!["01/memo", "02/memo"]);
        let note = pipeline.run_dir().join("notes/note-01_Intro-zh.md");
        assert!(std::fs::read_to_string(&note).unwrap().contains(FAILED_MARKER));
        assert!(!pipeline.checkpoint().is_complete("01", ArtifactKind::Memo));

        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent.push_text(TaskKind::CreateMemo, "Notes, second try.");
        let agent = Arc::new(agent);
        let resumed =
            DeckPipeline::open(fx.config.clone(), agent.clone(), pipeline.run_dir(), None).unwrap();
        let summary = resumed.resume().await.unwrap();

        assert_eq!(summary.perfect, 2);
        assert_eq!(agent.calls_for(TaskKind::CreateAllSlides), 0);
        assert!(!std::fs::read_to_string(&note).unwrap().contains(FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_plan_failure_stops_the_run() {
        let mut fx = fixture();
        fx.config.rework.plan = 1;

        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis")
            .push_text(TaskKind::Plan, "I could not make a plan, sorry.");
        let agent = Arc::new(agent);
        let pipeline = DeckPipeline::create(fx.config.clone(), agent.clone(), &fx.source).unwrap();

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, DeckError::Plan(_)));
        assert_eq!(agent.calls_for(TaskKind::Plan), 2);
        assert_eq!(agent.calls_for(TaskKind::CreateAllSlides), 0);
    }

    #[tokio::test]
    async fn test_page_missing_from_slides_defers_its_notes() {
        let fx = fixture();
        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis")
            .push_text(TaskKind::Plan, PLAN)
            .push_text(
                TaskKind::CreateAllSlides,
                r##"{"slides": [{"page": 1, "topic": "Intro", "content": "# Intro"}]}"##,
            )
            .push_text(TaskKind::CreateMemo, "Notes about the Intro.");
        let pipeline =
            DeckPipeline::create(fx.config.clone(), Arc::new(agent), &fx.source).unwrap();

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.incomplete, vec!["02/memo", "02/slide"]);
        assert_eq!(summary.deferred, 1);
        let slide = pipeline.run_dir().join("slides/02_Methods.md");
        assert!(std::fs::read_to_string(slide).unwrap().contains(FAILED_MARKER));
    }

    #[tokio::test]
    async fn test_declined_diagram_is_complete_without_file() {
        let mut fx = fixture();
        fx.config.generation.generate_svg = true;

        let agent = ScriptedAgent::new();
        scripted_validators(&agent);
        agent
            .push_text(TaskKind::Analyze, "# Analysis")
            .push_text(
                TaskKind::Plan,
                r#"[{"page": 1, "topic": "Intro", "summary": "s"}]"#,
            )
            .push_text(
                TaskKind::CreateAllSlides,
                r##"[{"page": 1, "topic": "Intro", "content": "# Intro"}]"##,
            )
            .push_text(TaskKind::CreateMemo, "Notes")
            .push_text(
                TaskKind::CreateSlideSvg,
                "```svg\n<svg xmlns=\"http://www.w3.org/2000/svg\"><rect/></svg>\n```",
            )
            .push_text(TaskKind::CreateConceptualSvg, "NO_CONCEPTUAL_SVG_NEEDED");
        let pipeline =
            DeckPipeline::create(fx.config.clone(), Arc::new(agent), &fx.source).unwrap();

        let summary = pipeline.run().await.unwrap();
        assert_eq!(summary.declined, 1);
        assert!(summary.is_complete());
        let root = pipeline.run_dir();
        assert!(root.join("diagrams/slide_01.svg").exists());
        assert!(!root.join("diagrams/conceptual_01.svg").exists());
        assert!(pipeline.checkpoint().is_complete("01", ArtifactKind::ConceptualSvg));
    }

    #[tokio::test]
    async fn test_missing_template_fails_before_any_call() {
        let fx = fixture();
        std::fs::write(&fx.config.paths.templates, "## [ANALYZE]\nAnalyze.\n").unwrap();
        let agent = happy_agent();
        let pipeline = DeckPipeline::create(fx.config.clone(), agent.clone(), &fx.source).unwrap();

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, DeckError::TemplateNotFound(_)));
        assert!(agent.calls().is_empty());
    }

    #[test]
    fn test_open_requires_a_source() {
        let fx = fixture();
        let run = fx.dir.path().join("old-run");
        std::fs::create_dir_all(run.join("slides")).unwrap();

        let err = DeckPipeline::open(fx.config.clone(), happy_agent(), &run, None)
            .err()
            .unwrap();
        assert!(matches!(err, DeckError::Pipeline { .. }));
        assert!(DeckPipeline::open(fx.config, happy_agent(), &run, Some(&fx.source)).is_ok());
    }
}
