//! Review Command
//!
//! Offline checks over a finished run (or any slides/notes pair of
//! directories). Exits non-zero when errors are found.

use std::path::{Path, PathBuf};

use crate::cli::Output;
use crate::config::ReviewConfig;
use crate::constants::output::{NOTES_DIR, SLIDES_DIR};
use crate::deck::review::{ReviewReport, Reviewer, Severity};
use crate::types::{DeckError, Result};

pub fn run(
    config: ReviewConfig,
    run_dir: Option<&Path>,
    slides: Option<PathBuf>,
    notes: Option<PathBuf>,
    format: &str,
) -> Result<()> {
    let base = run_dir.unwrap_or_else(|| Path::new("."));
    let slides = slides.unwrap_or_else(|| base.join(SLIDES_DIR));
    let notes = notes.unwrap_or_else(|| base.join(NOTES_DIR));

    let window = (config.time_min, config.time_max);
    let report = Reviewer::new(config).review(&slides, &notes)?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &slides, &notes, window);
    }

    if report.passed() {
        Ok(())
    } else {
        Err(DeckError::pipeline(
            "review",
            format!("{} error(s) found", report.errors()),
        ))
    }
}

fn print_report(report: &ReviewReport, slides: &Path, notes: &Path, (min, max): (f64, f64)) {
    let output = Output::new();
    output.header("slidewright review");
    output.field("Slides", format!("{} ({})", report.slides, slides.display()));
    output.field("Notes", format!("{} ({})", report.notes, notes.display()));
    output.field("Pages", report.pages);

    if !report.minutes.is_empty() {
        output.section(&format!("Speaking time (target {:.1}-{:.1} min)", min, max));
        for (page, minutes) in &report.minutes {
            output.field(&format!("Page {}", page), format!("{:.2} min", minutes));
        }
    }

    output.section("Findings");
    if report.findings.is_empty() {
        output.success("No issues");
        return;
    }
    for finding in &report.findings {
        match finding.severity {
            Severity::Error => output.error(&finding.message),
            Severity::Warning => output.warning(&finding.message),
        }
    }
    output.count("Errors", report.errors(), true);
    output.count("Warnings", report.warnings(), false);
}
