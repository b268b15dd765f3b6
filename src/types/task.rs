//! Task kinds understood by the templates file and the agent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one agent task. The string form is the `## [KIND]` heading
/// in the templates file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Analyze,
    ValidateAnalysis,
    Plan,
    ValidatePlan,
    CreateAllSlides,
    ValidateAllSlides,
    CreateMemo,
    ValidateMemo,
    CreateMemoEn,
    ValidateMemoEn,
    CreateSlideSvg,
    ValidateSlideSvg,
    CreateConceptualSvg,
    ValidateConceptualSvg,
}

impl TaskKind {
    pub const ALL: [TaskKind; 14] = [
        Self::Analyze,
        Self::ValidateAnalysis,
        Self::Plan,
        Self::ValidatePlan,
        Self::CreateAllSlides,
        Self::ValidateAllSlides,
        Self::CreateMemo,
        Self::ValidateMemo,
        Self::CreateMemoEn,
        Self::ValidateMemoEn,
        Self::CreateSlideSvg,
        Self::ValidateSlideSvg,
        Self::CreateConceptualSvg,
        Self::ValidateConceptualSvg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyze => "ANALYZE",
            Self::ValidateAnalysis => "VALIDATE_ANALYSIS",
            Self::Plan => "PLAN",
            Self::ValidatePlan => "VALIDATE_PLAN",
            Self::CreateAllSlides => "CREATE_ALL_SLIDES",
            Self::ValidateAllSlides => "VALIDATE_ALL_SLIDES",
            Self::CreateMemo => "CREATE_MEMO",
            Self::ValidateMemo => "VALIDATE_MEMO",
            Self::CreateMemoEn => "CREATE_MEMO_EN",
            Self::ValidateMemoEn => "VALIDATE_MEMO_EN",
            Self::CreateSlideSvg => "CREATE_SLIDE_SVG",
            Self::ValidateSlideSvg => "VALIDATE_SLIDE_SVG",
            Self::CreateConceptualSvg => "CREATE_CONCEPTUAL_SVG",
            Self::ValidateConceptualSvg => "VALIDATE_CONCEPTUAL_SVG",
        }
    }

    /// Paired judging task for a generating task
    pub fn validator(&self) -> Option<TaskKind> {
        match self {
            Self::Analyze => Some(Self::ValidateAnalysis),
            Self::Plan => Some(Self::ValidatePlan),
            Self::CreateAllSlides => Some(Self::ValidateAllSlides),
            Self::CreateMemo => Some(Self::ValidateMemo),
            Self::CreateMemoEn => Some(Self::ValidateMemoEn),
            Self::CreateSlideSvg => Some(Self::ValidateSlideSvg),
            Self::CreateConceptualSvg => Some(Self::ValidateConceptualSvg),
            _ => None,
        }
    }

    pub fn is_validation(&self) -> bool {
        self.as_str().starts_with("VALIDATE_")
    }

    /// Kinds whose answer must be machine readable; the agent is asked for
    /// its JSON output mode.
    pub fn requires_structured_output(&self) -> bool {
        self.is_validation() || matches!(self, Self::Plan | Self::CreateAllSlides)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| format!("Unknown task kind: {}", s))
    }
}
