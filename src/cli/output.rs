//! CLI output formatting

use crate::{
    core::ExecutionStatus,
    execution::{runner::OutputSink, runner::OutputStream, ExecutionEvent},
    persistence::{BuildSummary, StageRecord},
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Spinner shown while a build runs
pub fn create_spinner() -> ProgressBar {
    let progress = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Prints command output as it arrives, above the spinner
pub struct ConsoleSink {
    progress: ProgressBar,
}

impl ConsoleSink {
    pub fn new(progress: ProgressBar) -> Self {
        Self { progress }
    }
}

impl OutputSink for ConsoleSink {
    fn on_line(&self, stream: OutputStream, line: &str) {
        let line = fit_terminal(line);
        let line = match stream {
            OutputStream::Stdout => style(line).dim().to_string(),
            OutputStream::Stderr => style(line).yellow().dim().to_string(),
        };
        self.progress.println(format!("    {}", line));
    }
}

/// Cut a line to the terminal width
pub fn fit_terminal(line: &str) -> String {
    match term_size::dimensions() {
        Some((width, _)) => truncate_to(line, width.saturating_sub(4)),
        None => line.to_string(),
    }
}

/// Cut a line to `width` characters, marking the cut
pub fn truncate_to(line: &str, width: usize) -> String {
    if width == 0 || line.chars().count() <= width {
        return line.to_string();
    }
    let kept: String = line.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

/// Format a build status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("SUCCESS").green().to_string(),
        ExecutionStatus::Failed => style("FAILURE").red().to_string(),
        ExecutionStatus::Cancelled => style("ABORTED").yellow().to_string(),
    }
}

/// Format one stage line of a stored build
pub fn format_stage_record(record: &StageRecord) -> String {
    let label = match record.result.as_str() {
        "SUCCESS" => style(record.result.as_str()).green(),
        "FAILURE" => style(record.result.as_str()).red(),
        "SKIPPED" | "PENDING" => style(record.result.as_str()).dim(),
        _ => style(record.result.as_str()).yellow(),
    };
    let name = if record.post {
        format!("{} (post)", record.name)
    } else {
        record.name.clone()
    };

    match &record.detail {
        Some(detail) => format!("{:<28} {} {}", name, label, style(detail).dim()),
        None => format!("{:<28} {}", name, label),
    }
}

/// Format build summary for display
pub fn format_build_summary(summary: &BuildSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        ExecutionStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {} ({}/{} stages, {} failed)",
        status_icon,
        style(&summary.build_id).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.completed_stages,
        summary.total_stages,
        summary.failed_stages,
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            build_id,
            pipeline_name,
            ..
        } => format!(
            "{} Starting {} (build {})",
            ROCKET,
            style(pipeline_name).bold(),
            style(build_id).dim()
        ),
        ExecutionEvent::StageStarted { stage_id, name } => {
            if name == stage_id {
                format!("{} {}", SPINNER, style(stage_id).cyan())
            } else {
                format!("{} {} {}", SPINNER, style(stage_id).cyan(), style(name).dim())
            }
        }
        ExecutionEvent::StageOutput { stage_id, lines } => format!(
            "{} {} logged {} line(s)",
            INFO,
            style(stage_id).dim(),
            lines.len()
        ),
        ExecutionEvent::StageCompleted { stage_id, summary } => {
            format!("{} {} {}", CHECK, style(stage_id).green(), style(summary).dim())
        }
        ExecutionEvent::StageSkipped { stage_id, reason } => {
            format!("{} {} skipped: {}", SKIP, style(stage_id).dim(), style(reason).dim())
        }
        ExecutionEvent::StageFailed {
            stage_id,
            error,
            tolerated: true,
            ..
        } => format!(
            "{} {} failed (continuing): {}",
            WARN,
            style(stage_id).yellow(),
            style(error).dim()
        ),
        ExecutionEvent::StageFailed { stage_id, error, .. } => {
            format!("{} {}: {}", CROSS, style(stage_id).red(), style(error).dim())
        }
        ExecutionEvent::StageCancelled { stage_id, reason } => {
            format!("{} {} aborted: {}", WARN, style(stage_id).yellow(), reason)
        }
        ExecutionEvent::PipelineCompleted { status, .. } => {
            format!("{} Build finished: {}", INFO, format_status(*status))
        }
    }
}

/// Format stage output with truncation
pub fn format_output(lines: &[String], max_lines: usize) -> String {
    if lines.len() <= max_lines {
        return lines.join("\n");
    }

    let hidden = lines.len() - max_lines;
    format!(
        "{}\n{} ({} earlier lines)",
        lines[hidden..].join("\n"),
        style("[truncated]").dim(),
        hidden
    )
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
