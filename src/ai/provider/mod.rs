//! Agent Process Abstraction
//!
//! Defines the `AgentRunner` trait: one prompt in, captured process output
//! out. Runners do not classify or retry; the invoker owns both.
//!
//! ## Modules
//!
//! - `cli_agent`: external agent CLI driven through `tokio::process`
//! - `scripted`: queued replies per task kind (tests only)

mod cli_agent;
#[cfg(test)]
pub(crate) mod scripted;

pub use cli_agent::CliAgent;

use async_trait::async_trait;

use crate::types::{Result, TaskKind};

// =============================================================================
// Request / Output
// =============================================================================

/// One agent invocation
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub task: TaskKind,
    pub prompt: String,
    /// Model id passed to the agent; `None` uses the agent's default
    pub model: Option<String>,
    /// Ask the agent for a JSON envelope instead of plain text
    pub structured_output: bool,
}

impl AgentRequest {
    pub fn new(task: TaskKind, prompt: impl Into<String>) -> Self {
        Self {
            task,
            prompt: prompt.into(),
            model: None,
            structured_output: task.requires_structured_output(),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Captured result of one agent process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl AgentOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

// =============================================================================
// Runner Trait
// =============================================================================

/// Executes a rendered prompt against a generation agent.
///
/// `Err` is reserved for failures to run the agent at all (spawn errors,
/// broken pipes); a process that ran and failed is an `Ok` output with a
/// non-zero exit code.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutput>;

    /// Runner name for logging
    fn name(&self) -> &str;

    /// Whether the agent can be started at all
    async fn health_check(&self) -> Result<bool>;
}
