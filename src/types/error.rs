//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//!
//! ## Failure Kinds
//!
//! Agent invocations fail in one of four ways, and the kind decides who
//! handles it:
//!
//! - **Empty**: the agent exited cleanly but printed nothing (local retry)
//! - **Authentication**: expired or missing login (suspend for a human)
//! - **RateLimit**: quota exhausted (suspend for a human)
//! - **Other**: any other process failure (consumes a rework attempt)
//!
//! Everything that is not an agent failure is a [`DeckError`].

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

// =============================================================================
// Failure Kinds
// =============================================================================

/// Classification of a failed agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Process succeeded with empty output
    Empty,
    /// Authentication failed or expired
    Authentication,
    /// Quota or rate limit exhausted
    RateLimit,
    /// Anything else
    Other,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "EMPTY"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

impl FailureKind {
    /// Failures that only a person can fix (log in again, wait for quota,
    /// switch model). These suspend the run instead of burning attempts.
    pub fn is_human_fixable(&self) -> bool {
        matches!(self, Self::Authentication | Self::RateLimit)
    }
}

// =============================================================================
// Agent Failure
// =============================================================================

/// A classified agent failure with the raw diagnostic text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("[{kind}{}] {message}", exit_label(.exit_code))]
pub struct AgentFailure {
    pub kind: FailureKind,
    pub message: String,
    pub exit_code: Option<i32>,
    /// Quota reset time reported by the agent, if any
    pub reset_hint: Option<String>,
}

fn exit_label(code: &Option<i32>) -> String {
    code.map(|code| format!(" exit={}", code)).unwrap_or_default()
}

impl AgentFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            exit_code: None,
            reset_hint: None,
        }
    }

    /// Agent produced no output for the given task
    pub fn empty(task: impl std::fmt::Display) -> Self {
        Self::new(
            FailureKind::Empty,
            format!("agent returned an empty response for {}", task),
        )
    }

    pub fn with_exit_code(mut self, code: Option<i32>) -> Self {
        self.exit_code = code;
        self
    }

    pub fn with_reset_hint(mut self, hint: Option<String>) -> Self {
        self.reset_hint = hint;
        self
    }

    pub fn is_human_fixable(&self) -> bool {
        self.kind.is_human_fixable()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

static RESET_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)reset(?:s)?\s+(?:after|in|at)\s+([\w:.]+)").expect("static reset-hint pattern")
});

/// HTTP status codes standing alone, not digits inside a longer number
static STATUS_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(401|429)\b").expect("static status-code pattern"));

/// Substring classifier for agent diagnostics
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify diagnostic text from a failed agent process
    pub fn classify(message: &str) -> FailureKind {
        let lower = message.to_lowercase();
        let status = STATUS_CODE
            .captures(&lower)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        if lower.contains("authentication")
            || lower.contains("login required")
            || lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || status == Some("401")
        {
            return FailureKind::Authentication;
        }

        if lower.contains("exhausted")
            || lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || status == Some("429")
        {
            return FailureKind::RateLimit;
        }

        FailureKind::Other
    }

    /// Build a failure from the captured streams of a non-zero exit.
    ///
    /// stderr is authoritative; stdout is consulted as well because some
    /// agents print their error envelope there.
    pub fn from_process(stderr: &str, stdout: &str, exit_code: Option<i32>) -> AgentFailure {
        let stderr = stderr.trim();
        let stdout = stdout.trim();

        let mut kind = Self::classify(stderr);
        if kind == FailureKind::Other && !stdout.is_empty() {
            kind = Self::classify(stdout);
        }

        let message = match (stderr.is_empty(), stdout.is_empty()) {
            (false, _) => stderr.to_string(),
            (true, false) => stdout.to_string(),
            (true, true) => "process exited with non-zero status".to_string(),
        };

        let reset_hint = Self::reset_hint(&message);

        AgentFailure::new(kind, message)
            .with_exit_code(exit_code)
            .with_reset_hint(reset_hint)
    }

    /// Extract a quota reset time ("Your quota will reset after 2h10m.")
    pub fn reset_hint(message: &str) -> Option<String> {
        RESET_HINT
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_end_matches('.').to_string())
            .filter(|s| !s.is_empty())
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum DeckError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Agent Errors
    // -------------------------------------------------------------------------
    #[error("Agent error: {0}")]
    Agent(AgentFailure),

    #[error("No instructions for task kind '{0}' in the templates file")]
    TemplateNotFound(String),

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Config error: {0}")]
    Config(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Plan error: {0}")]
    Plan(String),

    #[error("Pipeline error in stage {stage}: {message}")]
    Pipeline { stage: String, message: String },

    #[error("Not a run directory: {0}")]
    NotARun(String),
}

impl From<AgentFailure> for DeckError {
    fn from(err: AgentFailure) -> Self {
        DeckError::Agent(err)
    }
}

pub type Result<T> = std::result::Result<T, DeckError>;

impl DeckError {
    /// Create a pipeline error
    pub fn pipeline(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Pipeline {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
