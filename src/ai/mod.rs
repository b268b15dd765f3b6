//! AI Integration Layer
//!
//! Everything between a task description and a parsed agent answer:
//! prompt rendering, the agent process, failure recovery and structured
//! output parsing.

pub mod invoker;
pub mod prompt;
pub mod provider;
pub mod recovery;
pub mod validation;

pub use invoker::AgentInvoker;
pub use prompt::{ContextValue, TaskContext, TaskSpec, TemplateStore, render_prompt};
pub use provider::{AgentOutput, AgentRequest, AgentRunner, CliAgent};
pub use recovery::{FailureDisposition, RecoveryControl, RecoveryCoordinator, SuspensionNotice};
pub use validation::{
    ExpectedShape, ParseStrategy, StructuredParser, ValidationVerdict, items_of, strip_fence,
};
