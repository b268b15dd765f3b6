//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (~/.config/slidewright/) and project (.slidewright/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{agent, recovery, rework};
use crate::types::{DeckError, Result, TaskKind};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// External agent process
    pub agent: AgentConfig,

    /// What gets generated
    pub generation: GenerationConfig,

    /// Rework budgets per task family
    pub rework: ReworkConfig,

    /// Suspension handling
    pub recovery: RecoveryConfig,

    /// File locations
    pub paths: PathsConfig,

    /// Local review of finished outputs
    pub review: ReviewConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            agent: AgentConfig::default(),
            generation: GenerationConfig::default(),
            rework: ReworkConfig::default(),
            recovery: RecoveryConfig::default(),
            paths: PathsConfig::default(),
            review: ReviewConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `DeckError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(DeckError::Config(
                "agent.command must name an executable".to_string(),
            ));
        }

        if self.recovery.poll_interval_ms == 0 {
            return Err(DeckError::Config(
                "recovery.poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.generation.concurrency == 0 {
            return Err(DeckError::Config(
                "generation.concurrency must be greater than 0".to_string(),
            ));
        }

        for (name, value) in self.rework.entries() {
            if value > rework::MAX_REWORKS {
                return Err(DeckError::Config(format!(
                    "rework.{} must be at most {}, got {}",
                    name,
                    rework::MAX_REWORKS,
                    value
                )));
            }
        }

        if self.review.time_min < 0.0 || self.review.time_min > self.review.time_max {
            return Err(DeckError::Config(format!(
                "review.time_min ({}) must be non-negative and not exceed review.time_max ({})",
                self.review.time_min, self.review.time_max
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent executable name (gemini, claude, codex, ...)
    pub command: String,

    /// Backing model; the agent's own default when unset
    pub model: Option<String>,

    /// Directory searched for the executable before PATH
    pub search_dir: Option<PathBuf>,

    /// Retries for empty output within one invocation
    pub local_retries: u32,

    /// First delay between those retries
    pub retry_delay_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "gemini".to_string(),
            model: None,
            search_dir: None,
            local_retries: agent::DEFAULT_LOCAL_RETRIES,
            retry_delay_ms: agent::DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl AgentConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// =============================================================================
// Generation Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Locale of the speaker notes
    pub notes_locale: String,

    /// Also write English speaker notes
    pub dual_language: bool,

    /// Generate slide and conceptual diagrams
    pub generate_svg: bool,

    /// Keep original English terminology in the notes
    pub preserve_english_terms: bool,

    /// Pages processed concurrently for per-page stages
    pub concurrency: usize,

    /// Extra instruction passed to every generating task
    pub custom_instruction: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            notes_locale: "zh-TW".to_string(),
            dual_language: false,
            generate_svg: true,
            preserve_english_terms: true,
            concurrency: 4,
            custom_instruction: None,
        }
    }
}

// =============================================================================
// Rework Configuration
// =============================================================================

/// Maximum reworks per task family (attempts = reworks + 1)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReworkConfig {
    pub analysis: u32,
    pub plan: u32,
    pub slides: u32,
    pub notes: u32,
    pub slide_svg: u32,
    pub conceptual_svg: u32,
}

impl Default for ReworkConfig {
    fn default() -> Self {
        Self {
            analysis: 3,
            plan: 3,
            slides: 5,
            notes: 5,
            slide_svg: 5,
            conceptual_svg: 5,
        }
    }
}

impl ReworkConfig {
    /// Budget for the family a generating task belongs to
    pub fn for_task(&self, kind: TaskKind) -> u32 {
        match kind {
            TaskKind::Analyze | TaskKind::ValidateAnalysis => self.analysis,
            TaskKind::Plan | TaskKind::ValidatePlan => self.plan,
            TaskKind::CreateAllSlides | TaskKind::ValidateAllSlides => self.slides,
            TaskKind::CreateMemo
            | TaskKind::ValidateMemo
            | TaskKind::CreateMemoEn
            | TaskKind::ValidateMemoEn => self.notes,
            TaskKind::CreateSlideSvg | TaskKind::ValidateSlideSvg => self.slide_svg,
            TaskKind::CreateConceptualSvg | TaskKind::ValidateConceptualSvg => {
                self.conceptual_svg
            }
        }
    }

    fn entries(&self) -> [(&'static str, u32); 6] {
        [
            ("analysis", self.analysis),
            ("plan", self.plan),
            ("slides", self.slides),
            ("notes", self.notes),
            ("slide_svg", self.slide_svg),
            ("conceptual_svg", self.conceptual_svg),
        ]
    }
}

// =============================================================================
// Recovery Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// How often a suspended task checks whether it was released
    pub poll_interval_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: recovery::DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl RecoveryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// =============================================================================
// Paths Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Task instructions, one `## [KIND]` section per task
    pub templates: PathBuf,

    /// Parent of the per-run directories
    pub output_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates: PathBuf::from("AGENTS.md"),
            output_root: PathBuf::from("output"),
        }
    }
}

// =============================================================================
// Review Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    pub check_alignment: bool,
    pub check_keywords: bool,
    pub check_time: bool,

    /// Target speaking time per page, in minutes
    pub time_min: f64,
    pub time_max: f64,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            check_alignment: true,
            check_keywords: true,
            check_time: true,
            time_min: 2.0,
            time_max: 3.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.command, "gemini");
        assert_eq!(config.recovery.poll_interval_ms, 1000);
    }

    #[test]
    fn test_rejects_zero_poll_interval() {
        let mut config = Config::default();
        config.recovery.poll_interval_ms = 0;
        assert!(matches!(config.validate(), Err(DeckError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.generation.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_rework_budget() {
        let mut config = Config::default();
        config.rework.slide_svg = rework::MAX_REWORKS + 1;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("rework.slide_svg"));
    }

    #[test]
    fn test_rejects_inverted_time_window() {
        let mut config = Config::default();
        config.review.time_min = 4.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rework_budget_by_family() {
        let config = ReworkConfig {
            notes: 2,
            ..ReworkConfig::default()
        };
        assert_eq!(config.for_task(TaskKind::CreateMemoEn), 2);
        assert_eq!(config.for_task(TaskKind::CreateMemo), 2);
        assert_eq!(config.for_task(TaskKind::Plan), 3);
    }
}
