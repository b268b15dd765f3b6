//! Rework Loop (quality gate)
//!
//! GENERATE → VALIDATE → decide, repeated within a per-task budget:
//!
//! - valid: PERFECT, stop at once
//! - acceptable: remember the first one, keep searching for a valid one
//! - otherwise: append the reviewer feedback and regenerate
//!
//! On exhaustion the outcome is ACCEPTABLE when any acceptable attempt was
//! seen, DEGRADED with the last well-formed attempt otherwise, and FAILED
//! when no attempt produced usable content.
//!
//! Attempt accounting: a generation that returns content consumes one
//! attempt, a failed generation consumes one through the recovery
//! coordinator, and a human-fixable failure consumes none. Validation
//! calls never consume generation attempts.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

use crate::ai::{
    AgentInvoker, ExpectedShape, RecoveryCoordinator, StructuredParser, TaskContext,
    ValidationVerdict, strip_fence,
};
use crate::constants::agent::DEFAULT_LOCAL_RETRIES;
use crate::constants::rework::{CANDIDATE_KEY, DIAGRAM_FAILED, NO_DIAGRAM_NEEDED};
use crate::types::{DeckError, Result, TaskKind, preview};

static SVG_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<svg.*?</svg>").expect("static svg pattern"));

const NO_FEEDBACK: &str = "No feedback provided.";

// =============================================================================
// Task Description
// =============================================================================

/// How a generator's raw answer becomes a candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKind {
    /// Trimmed non-empty text; an outer code fence is removed
    Markdown,
    /// First `<svg …</svg>` block. With `allow_decline` the generator may
    /// answer that no diagram is needed.
    Svg { allow_decline: bool },
    /// JSON parsed against the shape
    Structured(ExpectedShape),
}

/// A generate/validate task pair
#[derive(Debug, Clone)]
pub struct QualityTask {
    pub generate: TaskKind,
    pub validate: TaskKind,
    pub content: ContentKind,
}

impl QualityTask {
    pub fn new(generate: TaskKind, validate: TaskKind, content: ContentKind) -> Self {
        Self {
            generate,
            validate,
            content,
        }
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Accepted content of an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Text(String),
    Data(Value),
}

impl Candidate {
    /// Text form, used for validation context and for writing
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Data(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Self::Data(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReworkOutcome {
    Perfect(Candidate),
    Acceptable(Candidate),
    /// Never passed review; the last well-formed attempt
    Degraded(Candidate),
    Failed,
    /// The generator stated no artifact is needed
    Declined,
}

impl ReworkOutcome {
    pub fn candidate(&self) -> Option<&Candidate> {
        match self {
            Self::Perfect(c) | Self::Acceptable(c) | Self::Degraded(c) => Some(c),
            Self::Failed | Self::Declined => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Perfect(_) => "PERFECT",
            Self::Acceptable(_) => "ACCEPTABLE",
            Self::Degraded(_) => "DEGRADED",
            Self::Failed => "FAILED",
            Self::Declined => "DECLINED",
        }
    }
}

/// Result of one rework loop run
#[derive(Debug, Clone)]
pub struct ReworkReport {
    pub task: TaskKind,
    pub outcome: ReworkOutcome,
    /// Attempts consumed against the budget
    pub attempts_made: u32,
    /// Reviewer feedback, one entry per rejected attempt
    pub feedback: Vec<String>,
}

/// Log entry of one generation
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub index: u32,
    pub prompt: String,
    /// Raw response, or the failure text
    pub response: std::result::Result<String, String>,
    pub at: DateTime<Utc>,
}

enum Extracted {
    Candidate(Candidate),
    Declined,
    Unusable(&'static str),
}

// =============================================================================
// Rework Loop
// =============================================================================

pub struct ReworkLoop {
    invoker: Arc<AgentInvoker>,
    recovery: Arc<RecoveryCoordinator>,
    parser: StructuredParser,
    local_retries: u32,
}

impl ReworkLoop {
    pub fn new(invoker: Arc<AgentInvoker>, recovery: Arc<RecoveryCoordinator>) -> Self {
        Self {
            invoker,
            recovery,
            parser: StructuredParser::new(),
            local_retries: DEFAULT_LOCAL_RETRIES,
        }
    }

    pub fn with_local_retries(mut self, retries: u32) -> Self {
        self.local_retries = retries;
        self
    }

    /// Run the loop for one task. At most `max_reworks + 1` attempts are
    /// consumed; `Err` is reserved for infrastructure failures (missing
    /// templates, unwritable run directory).
    #[instrument(skip(self, task, context), fields(task = %task.generate))]
    pub async fn run_task(
        &self,
        task: &QualityTask,
        context: TaskContext,
        max_reworks: u32,
    ) -> Result<ReworkReport> {
        let mut context = context;
        let mut attempts: u32 = 0;
        let mut feedback: Vec<String> = Vec::new();
        let mut acceptable: Option<Candidate> = None;
        let mut last_well_formed: Option<Candidate> = None;
        let mut history: Vec<GenerationAttempt> = Vec::new();

        let outcome = loop {
            if attempts > max_reworks {
                break match (acceptable.take(), last_well_formed.take()) {
                    (Some(candidate), _) => ReworkOutcome::Acceptable(candidate),
                    (None, Some(candidate)) => ReworkOutcome::Degraded(candidate),
                    (None, None) => ReworkOutcome::Failed,
                };
            }

            let index = attempts;
            if index > 0 {
                info!("Reworking {} (attempt {}/{})", task.generate, index, max_reworks);
            }

            let prompt = self.invoker.render_prompt(task.generate, &context).await?;
            let generated = self
                .recovery
                .run(task.generate, &mut attempts, |model| {
                    let prompt = prompt.as_str();
                    async move {
                        self.invoker
                            .invoke_rendered(task.generate, prompt, model, self.local_retries)
                            .await
                    }
                })
                .await;

            let raw = match generated {
                Ok(raw) => raw,
                Err(DeckError::Agent(failure)) => {
                    history.push(GenerationAttempt {
                        index,
                        prompt,
                        response: Err(failure.to_string()),
                        at: Utc::now(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };
            attempts += 1;
            history.push(GenerationAttempt {
                index,
                prompt,
                response: Ok(raw.clone()),
                at: Utc::now(),
            });

            let candidate = match self.extract(&task.content, &raw) {
                Extracted::Candidate(candidate) => candidate,
                Extracted::Declined => {
                    info!("{} declined: no artifact needed", task.generate);
                    break ReworkOutcome::Declined;
                }
                Extracted::Unusable(reason) => {
                    warn!(
                        "{} attempt {} unusable ({}): {}",
                        task.generate,
                        index,
                        reason,
                        preview(&raw, 160)
                    );
                    continue;
                }
            };
            last_well_formed = Some(candidate.clone());

            let verdict = self.validate(task, &context, &candidate).await?;
            if verdict.is_valid() {
                break ReworkOutcome::Perfect(candidate);
            }
            if verdict.is_acceptable() && acceptable.is_none() {
                info!("{} attempt {} acceptable, still looking", task.generate, index);
                acceptable = Some(candidate);
            }

            let note = match verdict.feedback().trim() {
                "" => NO_FEEDBACK.to_string(),
                text => text.to_string(),
            };
            warn!("{} attempt {} rejected: {}", task.generate, index, preview(&note, 200));
            context.push_feedback(note.clone());
            feedback.push(note);
        };

        log_history(task.generate, &history);
        info!(
            "{} finished: {} after {} attempt(s)",
            task.generate,
            outcome.label(),
            attempts
        );

        Ok(ReworkReport {
            task: task.generate,
            outcome,
            attempts_made: attempts,
            feedback,
        })
    }

    fn extract(&self, content: &ContentKind, raw: &str) -> Extracted {
        match content {
            ContentKind::Markdown => {
                let text = strip_fence(raw).unwrap_or(raw).trim();
                if text.is_empty() {
                    Extracted::Unusable("empty text")
                } else {
                    Extracted::Candidate(Candidate::Text(text.to_string()))
                }
            }
            ContentKind::Svg { allow_decline } => {
                if *allow_decline && raw.contains(NO_DIAGRAM_NEEDED) {
                    return Extracted::Declined;
                }
                if raw.contains(DIAGRAM_FAILED) {
                    return Extracted::Unusable("generator reported failure");
                }
                let svg = SVG_BLOCK.find(raw).map(|m| m.as_str()).unwrap_or(raw).trim();
                if svg.starts_with("<svg") {
                    Extracted::Candidate(Candidate::Text(svg.to_string()))
                } else {
                    Extracted::Unusable("no svg element")
                }
            }
            ContentKind::Structured(shape) => match self.parser.parse(raw, shape) {
                Some(value) if shape.fits(&value) => Extracted::Candidate(Candidate::Data(value)),
                Some(_) => Extracted::Unusable("answer does not fit the expected shape"),
                None => Extracted::Unusable("unparseable output"),
            },
        }
    }

    /// Judge a candidate. The judge sees the candidate plus the original
    /// inputs, never the accumulated feedback.
    async fn validate(
        &self,
        task: &QualityTask,
        context: &TaskContext,
        candidate: &Candidate,
    ) -> Result<ValidationVerdict> {
        let mut judge_context = TaskContext::new().text(CANDIDATE_KEY, candidate.to_text());
        for (key, value) in context.entries() {
            judge_context.set(key.clone(), value.clone());
        }

        // Validation failures must not touch the generation budget.
        let mut scratch = 0;
        let raw = match self
            .recovery
            .run(task.validate, &mut scratch, |model| {
                let judge_context = &judge_context;
                async move {
                    self.invoker
                        .invoke(task.validate, judge_context, model, self.local_retries)
                        .await
                }
            })
            .await
        {
            Ok(raw) => raw,
            Err(DeckError::Agent(failure)) => {
                warn!("{} unavailable: {}", task.validate, failure);
                return Ok(ValidationVerdict::unavailable());
            }
            Err(e) => return Err(e),
        };

        let verdict = self
            .parser
            .parse(&raw, &ValidationVerdict::shape())
            .and_then(|value| ValidationVerdict::from_value(&value));
        Ok(verdict.unwrap_or_else(|| {
            warn!(
                "{} answer unreadable: {}",
                task.validate,
                preview(&raw, 160)
            );
            ValidationVerdict::unavailable()
        }))
    }
}

fn log_history(task: TaskKind, history: &[GenerationAttempt]) {
    for attempt in history {
        match &attempt.response {
            Ok(raw) => debug!(
                "{} attempt {} at {}: prompt {} chars, response {}",
                task,
                attempt.index,
                attempt.at.to_rfc3339(),
                attempt.prompt.chars().count(),
                preview(raw, 80)
            ),
            Err(failure) => debug!(
                "{} attempt {} at {}: prompt {} chars, failed: {}",
                task,
                attempt.index,
                attempt.at.to_rfc3339(),
                attempt.prompt.chars().count(),
                failure
            ),
        }
    }
}
