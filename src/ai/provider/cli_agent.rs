//! Agent CLI Runner
//!
//! Drives a gemini/claude/codex style CLI: the prompt is written to stdin,
//! the answer is read from stdout. Single-shot execution; retries and
//! classification live in the invoker.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{AgentOutput, AgentRequest, AgentRunner};
use crate::config::AgentConfig;
use crate::constants::agent::EXECUTABLE_SUFFIXES;
use crate::types::{DeckError, Result};

/// External agent CLI
pub struct CliAgent {
    command: String,
    program: PathBuf,
}

impl CliAgent {
    pub fn new(command: impl Into<String>, search_dir: Option<&Path>) -> Self {
        let command = command.into();
        let program = resolve_program(&command, search_dir);
        Self { command, program }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.command.clone(), config.search_dir.as_deref())
    }

    /// Executable that will be spawned
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command_for(&self, request: &AgentRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(build_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Locate the executable inside the search directory, trying the platform
/// suffixes in order. Falls back to the bare command (resolved via `PATH`).
fn resolve_program(command: &str, search_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = search_dir {
        for suffix in EXECUTABLE_SUFFIXES {
            let candidate = dir.join(format!("{}{}", command, suffix));
            if candidate.is_file() {
                debug!("Resolved agent executable: {}", candidate.display());
                return candidate;
            }
        }
        debug!(
            "Agent '{}' not found in {}, falling back to PATH",
            command,
            dir.display()
        );
    }
    PathBuf::from(command)
}

fn build_args(request: &AgentRequest) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(model) = request.model.as_deref().filter(|m| !m.trim().is_empty()) {
        args.push("-m".to_string());
        args.push(model.trim().to_string());
    }
    if request.structured_output {
        args.push("--output-format".to_string());
        args.push("json".to_string());
    }
    args
}

#[async_trait]
impl AgentRunner for CliAgent {
    async fn run(&self, request: AgentRequest) -> Result<AgentOutput> {
        debug!(
            "Executing {} for {} (model={:?}, prompt_chars={})",
            self.command,
            request.task,
            request.model,
            request.prompt.chars().count()
        );

        let mut child = self.command_for(&request).spawn().map_err(|e| {
            DeckError::pipeline(
                request.task.as_str(),
                format!("failed to spawn agent '{}': {}. Is it installed?", self.command, e),
            )
        })?;

        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt;
            tokio::spawn(async move {
                let written = stdin.write_all(prompt.as_bytes()).await;
                drop(stdin);
                written
            })
        });

        let output = child.wait_with_output().await?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Err(e)) => debug!("Agent closed stdin early: {}", e),
                Err(e) => debug!("Prompt writer task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        Ok(AgentOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    fn name(&self) -> &str {
        &self.command
    }

    async fn health_check(&self) -> Result<bool> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;

        match status {
            Ok(status) => Ok(status.success()),
            Err(e) => {
                debug!("Agent health check failed: {}", e);
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskKind;

    #[test]
    fn test_build_args() {
        let plain = AgentRequest::new(TaskKind::CreateMemo, "p");
        assert!(build_args(&plain).is_empty());

        let structured =
            AgentRequest::new(TaskKind::Plan, "p").with_model(Some("gemini-2.5-pro".into()));
        assert_eq!(
            build_args(&structured),
            vec!["-m", "gemini-2.5-pro", "--output-format", "json"]
        );

        let blank_model = AgentRequest::new(TaskKind::CreateMemo, "p").with_model(Some(" ".into()));
        assert!(build_args(&blank_model).is_empty());
    }

    #[test]
    fn test_resolve_in_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent.cmd"), "").unwrap();

        let agent = CliAgent::new("agent", Some(dir.path()));
        assert_eq!(agent.program(), dir.path().join("agent.cmd"));

        let missing = CliAgent::new("other", Some(dir.path()));
        assert_eq!(missing.program(), Path::new("other"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prompt_is_written_to_stdin() {
        // `sh` executes the script it reads on stdin.
        let agent = CliAgent::new("sh", None);
        let output = agent
            .run(AgentRequest::new(TaskKind::CreateMemo, "echo hello; echo oops >&2"))
            .await
            .unwrap();

        assert!(output.is_success());
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_captured() {
        let agent = CliAgent::new("sh", None);
        let output = agent
            .run(AgentRequest::new(
                TaskKind::CreateMemo,
                "echo 'Quota exhausted' >&2; exit 3",
            ))
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert!(output.stderr.contains("Quota exhausted"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let agent = CliAgent::new("slidewright-no-such-agent", None);
        assert!(agent.run(AgentRequest::new(TaskKind::Analyze, "x")).await.is_err());
        assert!(!agent.health_check().await.unwrap());
    }
}
