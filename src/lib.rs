//! slidewright - Quality-Gated Slide Deck Generator
//!
//! Drives an external AI agent CLI (gemini, claude, codex, ...) through the
//! stages of a lecture deck: source analysis, page plan, slide content,
//! speaker notes and diagrams. Every stage is reviewed by a paired
//! validation task and reworked until it passes or its budget runs out.
//!
//! ## Core Features
//!
//! - **Quality Gate**: generate → validate → rework with accumulated feedback
//! - **Tolerant Parsing**: fenced, enveloped, broken and truncated JSON answers
//! - **Suspension**: expired logins and exhausted quotas pause the run for a
//!   human instead of burning attempts
//! - **Checkpoint/Resume**: per-page, per-artifact progress survives crashes
//!
//! ## Quick Start
//!
//! ```ignore
//! use slidewright::{CliAgent, Config, DeckPipeline};
//!
//! let config = Config::default();
//! let agent = Arc::new(CliAgent::from_config(&config.agent));
//! let pipeline = DeckPipeline::create(config, agent, Path::new("chapter.md"))?;
//! let summary = pipeline.run().await?;
//! ```
//!
//! ## Modules
//!
//! - [`ai`]: agent process, prompts, invoker, recovery, structured parsing
//! - [`deck`]: pipeline, rework loop, checkpoint store, output tree, review
//! - [`config`]: layered configuration

pub mod ai;
pub mod cli;
pub mod config;
pub mod constants;
pub mod deck;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

pub use config::{Config, ConfigLoader};
pub use types::{AgentFailure, DeckError, FailureKind, Result, TaskKind};

// =============================================================================
// Pipeline Re-exports
// =============================================================================

pub use deck::{
    CheckpointStore, DeckPipeline, OutputTree, ReworkLoop, ReworkOutcome, RunSummary, WorkUnit,
};

// =============================================================================
// AI Re-exports
// =============================================================================

pub use ai::{
    AgentInvoker, AgentRunner, CliAgent, RecoveryControl, RecoveryCoordinator, StructuredParser,
};
