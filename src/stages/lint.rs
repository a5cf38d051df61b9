//! Lint stage
//!
//! Lints exactly the files listed by the relevant-files stage. The JSON
//! report is always a valid JSON array before the converter runs.

use crate::core::config::LintConfig;
use crate::execution::runner::ShellCommand;
use crate::stages::{render_argv, StageError, StageOutcome, StageRun};
use crate::vcs::read_relevant_files;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Linter stdout as a JSON array, plus its number of findings.
///
/// Blank output, invalid JSON or a non-array document becomes `[]`.
pub fn normalize_lint_json(stdout: &str) -> (String, usize) {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Array(findings)) => {
            let count = findings.len();
            let text = serde_json::to_string_pretty(&Value::Array(findings))
                .unwrap_or_else(|_| "[]".to_string());
            (text, count)
        }
        Ok(_) | Err(_) => {
            if !stdout.trim().is_empty() {
                warn!("Linter output is not a JSON array; writing an empty report");
            }
            ("[]".to_string(), 0)
        }
    }
}

fn write_report(path: &Path, content: &str) -> Result<(), StageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| StageError::io(path, e))
}

pub async fn run_lint(run: &mut StageRun<'_>, config: &LintConfig) -> Result<StageOutcome, StageError> {
    let list = run.context.resolve_path(&config.relevant_files);
    let json_report = run.context.resolve_path(&config.json_report);

    let files = read_relevant_files(&list).map_err(|e| StageError::io(&list, e))?;
    if files.is_empty() {
        write_report(&json_report, "[]")?;
        run.note("SKIPPING PYLINT");
        return Ok(StageOutcome::Skipped("no relevant files".to_string()));
    }

    let mut argv = render_argv(&run.context, &config.command);
    argv.extend(files.iter().cloned());
    let command = ShellCommand::from_argv(&argv).ok_or(StageError::EmptyCommand)?;
    let display = command.display();
    let output = run.run(command).await?;

    let (report, findings) = normalize_lint_json(&output.stdout);
    write_report(&json_report, &report)?;
    run.note(format!("{} finding(s) in {} file(s)", findings, files.len()));

    if let Some(converter) = &config.converter {
        let argv = render_argv(&run.context, converter);
        if let Some(convert) = ShellCommand::from_argv(&argv) {
            run.check(convert).await?;
        }
    }

    if !output.success() {
        return Err(StageError::CommandFailed {
            command: display,
            exit_code: output.exit_code,
        });
    }

    Ok(StageOutcome::Done(format!(
        "{} file(s) linted, {} finding(s)",
        files.len(),
        findings
    )))
}
