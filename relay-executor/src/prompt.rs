//! Per-attempt prompt assembly for a dispatched subtask.

use crate::WorkspaceWriter;
use relay_types::{Task, Subtask};

const RESULT_INLINE_LIMIT: usize = 2000;

/// Assemble the prompt for one attempt at `subtask`, in the mandated order:
/// browser-state notice, the task body, historical workflow guidance,
/// dependency results (inlined or file-referenced past
/// [`RESULT_INLINE_LIMIT`] chars), a workspace file listing, and a
/// replan-instruction trailer.
pub async fn assemble(
    task: &Task,
    subtask: &Subtask,
    session_id: Option<&str>,
    workspace: &dyn WorkspaceWriter,
) -> String {
    let mut sections = Vec::new();

    if let Some(session_id) = session_id {
        sections.push(format!(
            "A browser session (`{session_id}`) is already open for this task \u{2014} do not re-navigate or open a new tab unless your task specifically requires it."
        ));
    }

    sections.push(format!("## Your Task\n{}", subtask.content));

    if let Some(guide) = &subtask.workflow_guide {
        sections.push(format!(
            "## Reference: Historical Workflow\n{guide}\n\nUse this as background only; do not execute steps beyond your assigned task."
        ));
    }

    for dep_id in &subtask.depends_on {
        let Some(dep) = task.subtask(dep_id) else { continue };
        let Some(result) = &dep.result else { continue };
        if result.chars().count() > RESULT_INLINE_LIMIT {
            let file_name = format!("{}_result.md", dep.id);
            workspace.write_file(&file_name, result).await;
            sections.push(format!(
                "## Dependency '{}' result\nToo large to inline; written to workspace file `{file_name}`. Read it before proceeding.",
                dep.id
            ));
        } else {
            sections.push(format!("## Dependency '{}' result\n{result}", dep.id));
        }
    }

    let files = workspace.list_files().await;
    if !files.is_empty() {
        let listing = files
            .iter()
            .map(|(name, bytes)| format!("- {name} ({:.1} KB)", *bytes as f64 / 1024.0))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("## Workspace files\n{listing}"));
    }

    sections.push(
        "If this task turns out to be larger than you can complete in one pass, call \
         `split_and_handoff` to hand off the remainder as new subtasks instead of attempting \
         everything yourself."
            .to_string(),
    );

    sections.join("\n\n")
}
