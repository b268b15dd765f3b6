use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use slidewright::cli::commands::{config as config_cmd, control, review, run, status};
use slidewright::cli::commands::run::RunOptions;
use slidewright::{Config, ConfigLoader};

#[derive(Parser)]
#[command(name = "slidewright")]
#[command(
    version,
    about = "Quality-gated slide deck and speaker-notes generator driving AI agent CLIs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project layers
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(clap::Args, Debug, Default)]
struct Overrides {
    #[arg(long, help = "Agent executable (gemini, claude, codex, ...)")]
    agent: Option<String>,
    #[arg(long, short, help = "Model passed to the agent")]
    model: Option<String>,
    #[arg(long, help = "Locale of the speaker notes")]
    notes_locale: Option<String>,
    #[arg(long, help = "Pages processed concurrently")]
    concurrency: Option<usize>,
    #[arg(long, help = "Also write English speaker notes")]
    dual_language: bool,
    #[arg(long, help = "Skip slide and conceptual diagrams")]
    no_svg: bool,
    #[arg(long, help = "Extra instruction passed to every generating task")]
    instruction: Option<String>,
    #[arg(long, help = "Templates file with one `## [KIND]` section per task")]
    templates: Option<PathBuf>,
    #[arg(long, help = "Parent directory of run directories")]
    output_root: Option<PathBuf>,
}

impl From<Overrides> for RunOptions {
    fn from(o: Overrides) -> Self {
        Self {
            agent: o.agent,
            model: o.model,
            notes_locale: o.notes_locale,
            concurrency: o.concurrency,
            dual_language: o.dual_language,
            no_svg: o.no_svg,
            instruction: o.instruction,
            templates: o.templates,
            output_root: o.output_root,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a deck from a source document
    Run {
        #[arg(help = "Source document (chapter, paper)")]
        source: PathBuf,
        #[arg(long, help = "Plan from an existing slide deck")]
        existing_slides: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Continue an interrupted run
    Resume {
        #[arg(help = "Run directory")]
        run_dir: PathBuf,
        #[arg(long, help = "Source document, when run.json is missing")]
        source: Option<PathBuf>,
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show progress of a run
    Status {
        #[arg(help = "Run directory")]
        run_dir: PathBuf,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Release a suspended run
    Continue {
        #[arg(help = "Run directory")]
        run_dir: PathBuf,
        #[arg(long, short, help = "Switch to this model for the rest of the run")]
        model: Option<String>,
    },

    /// Check slides and notes offline (alignment, terms, speaking time)
    Review {
        #[arg(help = "Run directory (default: current directory)")]
        run_dir: Option<PathBuf>,
        #[arg(long, help = "Slides directory")]
        slides: Option<PathBuf>,
        #[arg(long, help = "Notes directory")]
        notes: Option<PathBuf>,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a default configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mslidewright encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!("\n\x1b[33mProgress is checkpointed; `slidewright resume <run-dir>` continues.\x1b[0m");
        eprintln!();

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    Ok(match path {
        Some(path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    })
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Run {
            source,
            existing_slides,
            overrides,
        } => {
            let config = load_config(cli.config.as_ref())?;
            run::run(config, &source, existing_slides, &overrides.into())?;
        }
        Commands::Resume {
            run_dir,
            source,
            overrides,
        } => {
            let config = load_config(cli.config.as_ref())?;
            run::resume(config, &run_dir, source.as_deref(), &overrides.into())?;
        }
        Commands::Status { run_dir, format } => {
            status::run(&run_dir, &format)?;
        }
        Commands::Continue { run_dir, model } => {
            control::run(&run_dir, model.as_deref())?;
        }
        Commands::Review {
            run_dir,
            slides,
            notes,
            format,
        } => {
            let config = load_config(cli.config.as_ref())?;
            review::run(config.review, run_dir.as_deref(), slides, notes, &format)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => config_cmd::show(global, &format)?,
            ConfigAction::Path => config_cmd::path()?,
            ConfigAction::Init { global, force } => config_cmd::init(global, force)?,
        },
    }

    Ok(())
}
