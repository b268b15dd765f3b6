//! Task table: which generate/validate pair produces each artifact, and
//! what inputs each task receives.

use std::path::{Path, PathBuf};

use super::rework::{ContentKind, QualityTask};
use super::types::{ArtifactKind, WorkUnit};
use crate::ai::{ExpectedShape, TaskContext};
use crate::config::{Config, ReworkConfig};
use crate::types::TaskKind;

/// Shape of the PLAN answer
pub fn plan_shape() -> ExpectedShape {
    ExpectedShape::item_list("page", "topic", "summary")
}

/// Shape of the CREATE_ALL_SLIDES answer
pub fn slides_shape() -> ExpectedShape {
    ExpectedShape::item_list("page", "topic", "content")
}

pub fn quality_task(artifact: ArtifactKind) -> QualityTask {
    let generate = artifact.generator();
    let content = match artifact {
        ArtifactKind::Analysis | ArtifactKind::Memo | ArtifactKind::MemoEn => ContentKind::Markdown,
        ArtifactKind::Plan => ContentKind::Structured(plan_shape()),
        ArtifactKind::Slide => ContentKind::Structured(slides_shape()),
        ArtifactKind::SlideSvg => ContentKind::Svg {
            allow_decline: false,
        },
        ArtifactKind::ConceptualSvg => ContentKind::Svg {
            allow_decline: true,
        },
    };
    let validate = match artifact {
        ArtifactKind::Analysis => TaskKind::ValidateAnalysis,
        ArtifactKind::Plan => TaskKind::ValidatePlan,
        ArtifactKind::Slide => TaskKind::ValidateAllSlides,
        ArtifactKind::Memo => TaskKind::ValidateMemo,
        ArtifactKind::MemoEn => TaskKind::ValidateMemoEn,
        ArtifactKind::SlideSvg => TaskKind::ValidateSlideSvg,
        ArtifactKind::ConceptualSvg => TaskKind::ValidateConceptualSvg,
    };
    QualityTask::new(generate, validate, content)
}

/// Rework budget for an artifact
pub fn rework_budget(config: &ReworkConfig, artifact: ArtifactKind) -> u32 {
    config.for_task(artifact.generator())
}

/// Per-unit artifacts the configuration asks for, in generation order
pub fn unit_artifacts(config: &Config) -> Vec<ArtifactKind> {
    let mut artifacts = vec![ArtifactKind::Slide, ArtifactKind::Memo];
    if config.generation.dual_language {
        artifacts.push(ArtifactKind::MemoEn);
    }
    if config.generation.generate_svg {
        artifacts.push(ArtifactKind::SlideSvg);
        artifacts.push(ArtifactKind::ConceptualSvg);
    }
    artifacts
}

/// Every task kind a run with this configuration may call
pub fn required_kinds(config: &Config) -> Vec<TaskKind> {
    let mut kinds = Vec::new();
    for artifact in [ArtifactKind::Analysis, ArtifactKind::Plan]
        .into_iter()
        .chain(unit_artifacts(config))
    {
        let task = quality_task(artifact);
        kinds.push(task.generate);
        kinds.push(task.validate);
    }
    kinds
}

// =============================================================================
// Task Inputs
// =============================================================================

/// Job-wide inputs shared by every task context
#[derive(Debug, Clone)]
pub struct DeckInputs {
    pub source: PathBuf,
    pub notes_locale: String,
    pub preserve_english_terms: bool,
    pub custom_instruction: Option<String>,
    /// Existing slides to plan from instead of the source alone
    pub existing_slides: Option<PathBuf>,
    pub time_min: f64,
    pub time_max: f64,
}

impl DeckInputs {
    pub fn new(source: &Path, config: &Config) -> Self {
        Self {
            source: source.to_path_buf(),
            notes_locale: config.generation.notes_locale.clone(),
            preserve_english_terms: config.generation.preserve_english_terms,
            custom_instruction: config
                .generation
                .custom_instruction
                .clone()
                .filter(|s| !s.trim().is_empty()),
            existing_slides: None,
            time_min: config.review.time_min,
            time_max: config.review.time_max,
        }
    }

    pub fn with_existing_slides(mut self, path: Option<PathBuf>) -> Self {
        self.existing_slides = path;
        self
    }

    fn base(&self) -> TaskContext {
        let context = TaskContext::new().file("source_path", &self.source);
        match &self.custom_instruction {
            Some(instruction) => context.scalar("custom_instruction", instruction),
            None => context,
        }
    }

    pub fn analysis(&self) -> TaskContext {
        self.base().scalar("notes_locale", &self.notes_locale)
    }

    pub fn plan(&self, analysis: &str) -> TaskContext {
        let context = self
            .base()
            .text("analysis_content", analysis)
            .scalar("notes_locale", &self.notes_locale);
        match &self.existing_slides {
            Some(path) => context.file("existing_slides_path", path),
            None => context,
        }
    }

    pub fn slides(&self, plan: &str) -> TaskContext {
        self.base()
            .text("plan_content", plan)
            .scalar("notes_locale", &self.notes_locale)
    }

    pub fn memo(&self, unit: &WorkUnit, slide: &str) -> TaskContext {
        self.unit_base(unit)
            .scalar("notes_locale", &self.notes_locale)
            .scalar("preserve_english_terms", self.preserve_english_terms)
            .text("slide_content", slide)
    }

    pub fn memo_en(&self, unit: &WorkUnit, slide: &str, memo: Option<&str>) -> TaskContext {
        let context = self
            .unit_base(unit)
            .scalar("notes_locale", "en")
            .scalar("preserve_english_terms", true)
            .text("slide_content", slide);
        match memo {
            Some(memo) => context.text("memo_content", memo),
            None => context,
        }
    }

    pub fn slide_svg(&self, unit: &WorkUnit, slide: &str) -> TaskContext {
        TaskContext::new()
            .scalar("page", &unit.id)
            .scalar("topic", &unit.topic)
            .text("slide_content", slide)
    }

    pub fn conceptual_svg(&self, unit: &WorkUnit, slide: &str, memo: Option<&str>) -> TaskContext {
        let context = self.slide_svg(unit, slide);
        match memo {
            Some(memo) => context.text("memo_content", memo),
            None => context,
        }
    }

    fn unit_base(&self, unit: &WorkUnit) -> TaskContext {
        self.base()
            .scalar("page", &unit.id)
            .scalar("topic", &unit.topic)
            .scalar("memo_time_min", self.time_min)
            .scalar("memo_time_max", self.time_max)
    }
}
