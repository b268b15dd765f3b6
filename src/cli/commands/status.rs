//! Status Command
//!
//! Progress of a run directory: checkpoint counts and any pending suspension.

use std::path::Path;

use crate::ai::RecoveryControl;
use crate::cli::Output;
use crate::deck::{CheckpointStore, OutputTree};
use crate::types::Result;

pub fn run(run_dir: &Path, format: &str) -> Result<()> {
    let tree = OutputTree::open(run_dir)?;
    let summary = CheckpointStore::load(tree.checkpoint_path())?.summary()?;
    let manifest = tree.read_manifest()?;
    let notice = RecoveryControl::new(run_dir).notice()?;

    if format == "json" {
        let status = serde_json::json!({
            "run_dir": tree.root(),
            "source": manifest.as_ref().map(|m| &m.source),
            "finished": summary.is_finished(),
            "checkpoint": summary,
            "suspended": notice,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let output = Output::new();
    output.header("slidewright status");
    output.field("Run", tree.root().display());
    if let Some(manifest) = &manifest {
        output.field("Source", manifest.source.display());
        output.field("Started", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
        if !manifest.source_unchanged() {
            output.warning("Source document changed since the run started");
        }
    }
    output.field("Units", summary.units);

    output.section("Artifacts");
    for (artifact, (completed, tracked)) in &summary.by_artifact {
        output.field(artifact, format!("{}/{}", completed, tracked));
    }
    output.count("Pending", summary.pending, true);

    match notice {
        Some(notice) => {
            output.section("Suspended");
            output.field("Reason", &notice.reason);
            output.field("Task", &notice.task);
            output.field("Message", &notice.message);
            if let Some(hint) = &notice.reset_hint {
                output.field("Resets after", hint);
            }
            output.hint(&format!(
                "slidewright continue {} [--model <id>]",
                run_dir.display()
            ));
        }
        None if summary.is_finished() => output.success("Run finished"),
        None => output.hint(&format!("slidewright resume {}", run_dir.display())),
    }
    Ok(())
}
