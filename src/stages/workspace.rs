//! Workspace reset

use crate::core::config::{WorkspaceResetConfig, STATE_DIR};
use crate::stages::{StageError, StageOutcome, StageRun};
use crate::vcs::Vcs;

/// Remove untracked and ignored files except the kept caches and the
/// pyci state directory, then create the output directory.
pub async fn reset_workspace(
    vcs: &dyn Vcs,
    run: &mut StageRun<'_>,
    config: &WorkspaceResetConfig,
) -> Result<StageOutcome, StageError> {
    if config.clean {
        let mut keep: Vec<String> = config.keep.iter().map(|k| run.context.render(k)).collect();
        if !keep.iter().any(|k| k.trim_end_matches('/') == STATE_DIR) {
            keep.push(STATE_DIR.to_string());
        }
        run.note(format!("Cleaning workspace (keeping {})", keep.join(", ")));
        vcs.clean(&run.context.workspace, &keep).await?;
    }

    let output_dir = run.context.resolve_path(&config.output_dir);
    std::fs::create_dir_all(&output_dir).map_err(|e| StageError::io(&output_dir, e))?;

    let relative = run.context.relative(&output_dir).display().to_string();
    run.note(format!("Created {}", relative));

    Ok(StageOutcome::Done(format!("workspace ready, output in {}", relative)))
}
