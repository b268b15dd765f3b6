//! Local review of a finished run.
//!
//! Three offline checks over `slides/` and `notes/`:
//! - alignment: every slide page has notes and vice versa
//! - English terms: notes keep original-language terminology
//! - speaking time: CJK chars / 250 + English words / 150 minutes per page,
//!   inside the configured window with a small tolerance

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

use crate::config::ReviewConfig;
use crate::constants::review::{CJK_CHARS_PER_MINUTE, EN_WORDS_PER_MINUTE, TIME_TOLERANCE_MINUTES};
use crate::types::Result;

static PAGE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,3})").expect("static page pattern"));
static CJK_CHAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x{4e00}-\x{9fff}]").expect("static cjk pattern"));
static EN_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9][A-Za-z0-9\-]*").expect("static word pattern"));

const TEXT_EXTENSIONS: [&str; 2] = ["md", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewCheck {
    Alignment,
    EnglishTerms,
    SpeakingTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub check: ReviewCheck,
    pub severity: Severity,
    pub pages: Vec<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReviewReport {
    pub slides: usize,
    pub notes: usize,
    pub pages: usize,
    /// Estimated speaking minutes per notes page
    pub minutes: BTreeMap<String, f64>,
    pub findings: Vec<Finding>,
}

impl ReviewReport {
    pub fn errors(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warnings(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    pub fn passed(&self) -> bool {
        self.errors() == 0
    }
}

pub struct Reviewer {
    config: ReviewConfig,
}

impl Reviewer {
    pub fn new(config: ReviewConfig) -> Self {
        Self { config }
    }

    pub fn review(&self, slides_dir: &Path, notes_dir: &Path) -> Result<ReviewReport> {
        for dir in [slides_dir, notes_dir] {
            if !dir.is_dir() {
                warn!("Review directory missing: {}", dir.display());
            }
        }

        let slides = pages_map(slides_dir, false)?;
        let notes = pages_map(notes_dir, true)?;
        let all: BTreeSet<&String> = slides.keys().chain(notes.keys()).collect();

        let mut report = ReviewReport {
            slides: slides.len(),
            notes: notes.len(),
            pages: all.len(),
            ..Default::default()
        };

        if self.config.check_alignment {
            self.check_alignment(&slides, &notes, &mut report);
        }

        let texts: BTreeMap<&String, String> = notes
            .iter()
            .map(|(page, path)| (page, read_lossy(path)))
            .collect();

        if self.config.check_keywords {
            for (page, text) in &texts {
                if !has_english_terms(text) {
                    report.findings.push(Finding {
                        check: ReviewCheck::EnglishTerms,
                        severity: Severity::Warning,
                        pages: vec![(*page).clone()],
                        message: format!(
                            "no English letters found, original terms may be missing ({})",
                            file_name(&notes[*page])
                        ),
                    });
                }
            }
        }

        if self.config.check_time {
            self.check_time(&texts, &mut report);
        }

        debug!(
            "Review: {} error(s), {} warning(s)",
            report.errors(),
            report.warnings()
        );
        Ok(report)
    }

    fn check_alignment(
        &self,
        slides: &BTreeMap<String, PathBuf>,
        notes: &BTreeMap<String, PathBuf>,
        report: &mut ReviewReport,
    ) {
        let missing_notes: Vec<String> = slides
            .keys()
            .filter(|p| !notes.contains_key(*p))
            .cloned()
            .collect();
        let missing_slides: Vec<String> = notes
            .keys()
            .filter(|p| !slides.contains_key(*p))
            .cloned()
            .collect();

        if !missing_notes.is_empty() {
            report.findings.push(Finding {
                check: ReviewCheck::Alignment,
                severity: Severity::Error,
                message: format!("pages without notes: {}", missing_notes.join(", ")),
                pages: missing_notes,
            });
        }
        if !missing_slides.is_empty() {
            report.findings.push(Finding {
                check: ReviewCheck::Alignment,
                severity: Severity::Error,
                message: format!("pages without slides: {}", missing_slides.join(", ")),
                pages: missing_slides,
            });
        }
    }

    fn check_time(&self, texts: &BTreeMap<&String, String>, report: &mut ReviewReport) {
        let (min, max) = (self.config.time_min, self.config.time_max);
        let mut too_short = Vec::new();
        let mut too_long = Vec::new();

        for (page, text) in texts {
            let minutes = estimate_speaking_minutes(text);
            report.minutes.insert((*page).clone(), minutes);
            if minutes < min - TIME_TOLERANCE_MINUTES {
                too_short.push(format!("{} ({:.2} min)", page, minutes));
            } else if minutes > max + TIME_TOLERANCE_MINUTES {
                too_long.push(format!("{} ({:.2} min)", page, minutes));
            }
        }

        for (pages, kind) in [(too_short, "shorter"), (too_long, "longer")] {
            if pages.is_empty() {
                continue;
            }
            report.findings.push(Finding {
                check: ReviewCheck::SpeakingTime,
                severity: Severity::Error,
                message: format!(
                    "notes {} than {:.1}-{:.1} minutes: {}",
                    kind,
                    min,
                    max,
                    pages.join(", ")
                ),
                pages: pages
                    .iter()
                    .filter_map(|p| p.split_whitespace().next().map(str::to_string))
                    .collect(),
            });
        }
    }
}

/// `CJK chars / 250 + English words / 150`; purely numeric tokens are not
/// counted as words.
pub fn estimate_speaking_minutes(text: &str) -> f64 {
    let cjk = CJK_CHAR.find_iter(text).count() as f64;
    let words = EN_WORD
        .find_iter(text)
        .filter(|m| m.as_str().chars().any(|c| c.is_ascii_alphabetic()))
        .count() as f64;
    cjk / CJK_CHARS_PER_MINUTE + words / EN_WORDS_PER_MINUTE
}

pub fn has_english_terms(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

/// First 1-3 digit group of the file stem, zero-padded
fn page_of(file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let digits = PAGE_NUMBER.captures(stem)?.get(1)?.as_str();
    digits.parse::<u32>().ok().map(|n| format!("{:02}", n))
}

/// page → file, recursively. The alphabetically first file wins a page.
/// Secondary-language notes (`-en`) are left out of the notes map.
fn pages_map(dir: &Path, skip_secondary: bool) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)?;
    files.sort();

    let mut map = BTreeMap::new();
    for path in files {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
            continue;
        }
        let name = file_name(&path);
        if skip_secondary && name.ends_with(&format!("-en.{}", ext)) {
            continue;
        }
        if let Some(page) = page_of(&name) {
            map.entry(page).or_insert(path);
        }
    }
    Ok(map)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn read_lossy(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReviewConfig {
        ReviewConfig {
            check_alignment: true,
            check_keywords: true,
            check_time: true,
            time_min: 2.0,
            time_max: 3.0,
        }
    }

    fn write(dir: &Path, name: &str, text: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn test_estimate() {
        let cjk = "中".repeat(250);
        assert!((estimate_speaking_minutes(&cjk) - 1.0).abs() < 1e-9);

        let words = "word ".repeat(150) + "2024 12-34";
        assert!((estimate_speaking_minutes(&words) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_page_of() {
        assert_eq!(page_of("03_Intro.md").as_deref(), Some("03"));
        assert_eq!(page_of("note-7_Topic-zh.md").as_deref(), Some("07"));
        assert_eq!(page_of("readme.md"), None);
    }

    #[test]
    fn test_clean_run_passes() {
        let dir = tempfile::tempdir().unwrap();
        let (slides, notes) = (dir.path().join("slides"), dir.path().join("notes"));
        let note = format!("{} Transformer attention", "字".repeat(600));
        write(&slides, "01_Intro.md", "# Intro");
        write(&notes, "note-01_Intro-zh.md", &note);
        write(&notes, "note-01_Intro-en.md", "short");

        let report = Reviewer::new(config()).review(&slides, &notes).unwrap();
        assert!(report.passed(), "{:?}", report.findings);
        assert_eq!(report.warnings(), 0);
        assert_eq!((report.slides, report.notes, report.pages), (1, 1, 1));
    }

    #[test]
    fn test_findings() {
        let dir = tempfile::tempdir().unwrap();
        let (slides, notes) = (dir.path().join("slides"), dir.path().join("notes"));
        write(&slides, "01_Intro.md", "# Intro");
        write(&slides, "02_Methods.md", "# Methods");
        write(&notes, "note-01_Intro-zh.md", "太短了");
        write(&notes, "note-03_Extra-zh.md", &"字".repeat(1000));

        let report = Reviewer::new(config()).review(&slides, &notes).unwrap();
        let checks: Vec<(ReviewCheck, Severity)> =
            report.findings.iter().map(|f| (f.check, f.severity)).collect();

        assert!(checks.contains(&(ReviewCheck::Alignment, Severity::Error)));
        assert!(checks.contains(&(ReviewCheck::EnglishTerms, Severity::Warning)));
        assert_eq!(report.errors(), 4);
        assert!(!report.passed());

        let long = report
            .findings
            .iter()
            .find(|f| f.check == ReviewCheck::SpeakingTime && f.message.contains("longer"))
            .unwrap();
        assert_eq!(long.pages, vec!["03"]);
    }

    #[test]
    fn test_disabled_checks() {
        let dir = tempfile::tempdir().unwrap();
        let (slides, notes) = (dir.path().join("slides"), dir.path().join("notes"));
        write(&slides, "01_Intro.md", "# Intro");

        let report = Reviewer::new(ReviewConfig {
            check_alignment: false,
            check_keywords: false,
            check_time: false,
            ..config()
        })
        .review(&slides, &notes)
        .unwrap();
        assert!(report.findings.is_empty());
    }
}
