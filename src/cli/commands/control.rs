//! Continue Command
//!
//! Releases a suspended run: optionally leaves a model override, then
//! removes the recovery signal so waiting tasks retry.

use std::path::Path;

use crate::ai::RecoveryControl;
use crate::cli::Output;
use crate::types::{DeckError, Result};

pub fn run(run_dir: &Path, model: Option<&str>) -> Result<()> {
    if !run_dir.is_dir() {
        return Err(DeckError::NotARun(run_dir.display().to_string()));
    }

    let output = Output::new();
    let control = RecoveryControl::new(run_dir);
    let Some(notice) = control.notice()? else {
        output.info("Run is not suspended; nothing to continue");
        return Ok(());
    };

    output.field("Suspended on", format!("{} ({})", notice.task, notice.reason));
    output.field("Since", notice.raised_at.format("%Y-%m-%d %H:%M:%S UTC"));

    if control.release(model)? {
        match model.map(str::trim).filter(|m| !m.is_empty()) {
            Some(model) => output.success(&format!("Resumed with model {}", model)),
            None => output.success("Resumed"),
        }
    } else {
        output.info("The run was resumed by someone else");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::recovery::{OVERRIDE_FILE, SIGNAL_FILE};

    #[test]
    fn test_continue_releases_with_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SIGNAL_FILE), "quota exhausted").unwrap();

        run(dir.path(), Some("gemini-2.5-flash")).unwrap();
        assert!(!dir.path().join(SIGNAL_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join(OVERRIDE_FILE)).unwrap(),
            "gemini-2.5-flash"
        );
    }

    #[test]
    fn test_continue_without_suspension() {
        let dir = tempfile::tempdir().unwrap();
        run(dir.path(), Some("x")).unwrap();
        assert!(!dir.path().join(OVERRIDE_FILE).exists());
    }
}
