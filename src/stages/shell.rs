//! Free-form shell stage

use crate::core::config::ShellConfig;
use crate::execution::runner::ShellCommand;
use crate::stages::{StageError, StageOutcome, StageRun};

/// Run each command through `sh -c`, stopping at the first failure
pub async fn run_shell(run: &mut StageRun<'_>, config: &ShellConfig) -> Result<StageOutcome, StageError> {
    for script in &config.commands {
        let script = run.context.render(script);
        run.check(ShellCommand::shell(script)).await?;
    }

    Ok(StageOutcome::Done(format!(
        "{} command(s) succeeded",
        config.commands.len()
    )))
}
