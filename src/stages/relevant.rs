//! Relevant-files stage

use crate::core::config::RelevantFilesConfig;
use crate::stages::{StageError, StageOutcome, StageRun};
use crate::vcs::{resolve_relevant_files, write_relevant_files, Vcs};
use regex::Regex;

pub async fn compute_relevant_files(
    vcs: &dyn Vcs,
    run: &mut StageRun<'_>,
    config: &RelevantFilesConfig,
) -> Result<StageOutcome, StageError> {
    let source_dir = run.context.render(&config.source_dir);
    let pattern = Regex::new(&run.context.render(&config.pattern))?;
    let remote = run.context.render(&config.remote);
    let output = run.context.resolve_path(&config.output);

    let relevant = resolve_relevant_files(vcs, &run.context, &source_dir, &pattern, &remote).await?;

    let side = |r: &Option<crate::vcs::ResolvedRef>| match r {
        Some(r) => format!("{} ({})", r.rev, r.strategy),
        None => "null".to_string(),
    };
    let (lhs, rhs) = (side(&relevant.lhs), side(&relevant.rhs));
    run.note(format!("LHS={}", lhs));
    run.note(format!("RHS={}", rhs));

    for file in &relevant.files {
        run.note(format!("  {}", file));
    }

    write_relevant_files(&output, &relevant).map_err(|e| StageError::io(&output, e))?;

    Ok(StageOutcome::Done(format!(
        "{} relevant file(s) written to {}",
        relevant.files.len(),
        run.context.relative(&output).display()
    )))
}
