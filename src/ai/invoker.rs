//! Agent Invoker
//!
//! Renders a task prompt, runs it through an [`AgentRunner`] and turns the
//! process outcome into text or a classified [`AgentFailure`].
//!
//! Empty answers are retried here with exponential backoff. Every other
//! failure is returned at once; the recovery coordinator and the rework
//! loop decide what it costs.

use backon::{ExponentialBuilder, Retryable};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::prompt::{TaskContext, TaskSpec, TemplateStore, render_prompt};
use super::provider::{AgentRequest, AgentRunner};
use crate::constants::agent::DEFAULT_RETRY_DELAY_MS;
use crate::types::{AgentFailure, ErrorClassifier, FailureKind, Result, TaskKind};

pub struct AgentInvoker {
    runner: Arc<dyn AgentRunner>,
    templates: Arc<TemplateStore>,
    retry_delay: Duration,
}

impl AgentInvoker {
    pub fn new(runner: Arc<dyn AgentRunner>, templates: Arc<TemplateStore>) -> Self {
        Self {
            runner,
            templates,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }

    /// First delay between empty-output retries
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn runner(&self) -> &dyn AgentRunner {
        self.runner.as_ref()
    }

    /// Render the full prompt for a task
    pub async fn render_prompt(&self, kind: TaskKind, context: &TaskContext) -> Result<String> {
        let instructions = self.templates.instructions(kind).await?;
        let prompt = render_prompt(&TaskSpec {
            kind,
            instructions,
            context,
        })
        .await;
        debug!("Rendered {} prompt ({} chars)", kind, prompt.chars().count());
        Ok(prompt)
    }

    /// Render and run a task
    pub async fn invoke(
        &self,
        kind: TaskKind,
        context: &TaskContext,
        model_override: Option<String>,
        max_local_retries: u32,
    ) -> std::result::Result<String, AgentFailure> {
        let prompt = self
            .render_prompt(kind, context)
            .await
            .map_err(|e| AgentFailure::new(FailureKind::Other, e.to_string()))?;
        self.invoke_rendered(kind, &prompt, model_override, max_local_retries)
            .await
    }

    /// Run an already rendered prompt.
    ///
    /// An empty answer is retried up to `max_local_retries` more times;
    /// the returned text is trimmed and never empty.
    pub async fn invoke_rendered(
        &self,
        kind: TaskKind,
        prompt: &str,
        model: Option<String>,
        max_local_retries: u32,
    ) -> std::result::Result<String, AgentFailure> {
        let call = || {
            let request = AgentRequest::new(kind, prompt).with_model(model.clone());
            async move { self.call_once(request).await }
        };

        call.retry(
            ExponentialBuilder::default()
                .with_min_delay(self.retry_delay)
                .with_max_times(max_local_retries as usize),
        )
        .when(|failure: &AgentFailure| failure.kind == FailureKind::Empty)
        .notify(|failure: &AgentFailure, delay: Duration| {
            warn!(
                "{} via {}: {}, retrying in {:?}",
                kind,
                self.runner.name(),
                failure,
                delay
            );
        })
        .await
    }

    async fn call_once(&self, request: AgentRequest) -> std::result::Result<String, AgentFailure> {
        let task = request.task;
        let output = self
            .runner
            .run(request)
            .await
            .map_err(|e| AgentFailure::new(FailureKind::Other, e.to_string()))?;

        if !output.is_success() {
            let failure =
                ErrorClassifier::from_process(&output.stderr, &output.stdout, output.exit_code);
            warn!("{} failed: {}", task, failure);
            return Err(failure);
        }

        let text = output.stdout.trim();
        if text.is_empty() {
            return Err(AgentFailure::empty(task));
        }
        Ok(text.to_string())
    }
}
