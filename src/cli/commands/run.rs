//! Run and Resume Commands
//!
//! Usage:
//!   slidewright run <SOURCE> [--existing-slides FILE] [overrides]
//!   slidewright resume <RUN_DIR> [--source FILE] [overrides]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::info;

use crate::ai::CliAgent;
use crate::cli::Output;
use crate::config::Config;
use crate::deck::{DeckPipeline, RunSummary};
use crate::types::{DeckError, Result};

/// Command-line overrides, the last configuration layer
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub agent: Option<String>,
    pub model: Option<String>,
    pub notes_locale: Option<String>,
    pub concurrency: Option<usize>,
    pub dual_language: bool,
    pub no_svg: bool,
    pub instruction: Option<String>,
    pub templates: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
}

impl RunOptions {
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(agent) = &self.agent {
            config.agent.command = agent.clone();
        }
        if let Some(model) = &self.model {
            config.agent.model = Some(model.clone());
        }
        if let Some(locale) = &self.notes_locale {
            config.generation.notes_locale = locale.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.generation.concurrency = concurrency;
        }
        if self.dual_language {
            config.generation.dual_language = true;
        }
        if self.no_svg {
            config.generation.generate_svg = false;
        }
        if let Some(instruction) = &self.instruction {
            config.generation.custom_instruction = Some(instruction.clone());
        }
        if let Some(templates) = &self.templates {
            config.paths.templates = templates.clone();
        }
        if let Some(root) = &self.output_root {
            config.paths.output_root = root.clone();
        }
        config.validate()
    }
}

/// Start a new run for `source`
pub fn run(
    mut config: Config,
    source: &Path,
    existing_slides: Option<PathBuf>,
    options: &RunOptions,
) -> Result<()> {
    options.apply(&mut config)?;
    let runner = Arc::new(CliAgent::from_config(&config.agent));
    info!("Agent: {}", runner.program().display());

    let pipeline = DeckPipeline::create(config, runner, source)?.with_existing_slides(existing_slides);
    Output::new().info(&format!("Run directory: {}", pipeline.run_dir().display()));

    let summary = Runtime::new()?.block_on(pipeline.run())?;
    report(&summary)
}

/// Continue an interrupted run
pub fn resume(
    mut config: Config,
    run_dir: &Path,
    source: Option<&Path>,
    options: &RunOptions,
) -> Result<()> {
    options.apply(&mut config)?;
    let runner = Arc::new(CliAgent::from_config(&config.agent));

    let pipeline = DeckPipeline::open(config, runner, run_dir, source)?;
    let summary = Runtime::new()?.block_on(pipeline.resume())?;
    report(&summary)
}

fn report(summary: &RunSummary) -> Result<()> {
    let output = Output::new();
    output.section("Run Summary");
    output.field("Directory", summary.run_dir.display());
    output.field("Pages", summary.units);
    output.field("Duration", format!("{}s", summary.duration_secs));
    output.count("Perfect", summary.perfect, false);
    output.count("Acceptable", summary.acceptable, false);
    output.count("Degraded", summary.degraded, true);
    output.count("Failed", summary.failed, true);
    output.count("Declined", summary.declined, false);
    output.count("Skipped", summary.skipped, false);
    output.count("Deferred", summary.deferred, true);

    if summary.is_complete() {
        output.success("All artifacts written");
        if summary.degraded > 0 {
            output.warning("Some artifacts carry a DEGRADED-OUTPUT banner; review them by hand");
        }
        return Ok(());
    }

    for pair in &summary.incomplete {
        output.error(&format!("incomplete: {}", pair));
    }
    output.hint(&format!(
        "slidewright resume {}",
        summary.run_dir.display()
    ));
    Err(DeckError::pipeline(
        "run",
        format!("{} artifact(s) incomplete", summary.incomplete.len()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_over_config() {
        let mut config = Config::default();
        let options = RunOptions {
            agent: Some("claude".into()),
            concurrency: Some(8),
            no_svg: true,
            dual_language: true,
            ..Default::default()
        };
        options.apply(&mut config).unwrap();

        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.generation.concurrency, 8);
        assert!(!config.generation.generate_svg);
        assert!(config.generation.dual_language);
        assert_eq!(config.generation.notes_locale, "zh-TW");
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let mut config = Config::default();
        let options = RunOptions {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            options.apply(&mut config),
            Err(DeckError::Config(_))
        ));
    }
}
