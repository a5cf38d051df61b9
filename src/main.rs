use anyhow::{Context, Result};
use pyci::cli::commands::{
    HistoryCommand, ListCommand, RelevantFilesCommand, RunCommand, ValidateCommand,
};
use pyci::cli::output::*;
use pyci::cli::{Cli, Command};
use pyci::core::config::{PipelineConfig, STATE_DIR};
use pyci::core::{BuildContext, ExecutionStatus, Pipeline};
use pyci::execution::{ExecutionEngine, ExecutionEvent, ProcessRunner, SchedulingStrategy};
use pyci::persistence::retention::{prune_entries, EntryKind};
use pyci::persistence::{create_summary, BuildSummary, InMemoryPersistence, PersistenceBackend};
use pyci::vcs::{resolve_relevant_files, write_relevant_files, GitCli, Vcs};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Per-build logs live here, relative to the workspace
const LOG_DIR: &str = "logs";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.stream).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::RelevantFiles(cmd) => relevant_files(cmd).await?,
        Command::History(cmd) => show_history(cmd, cli.verbose).await?,
        Command::List(cmd) => list_pipelines(cmd).await?,
    }

    Ok(())
}

fn load_config(file: Option<&str>) -> Result<PipelineConfig> {
    match file {
        Some(path) => PipelineConfig::from_file(path).context("Failed to load pipeline config"),
        None => PipelineConfig::builtin(),
    }
}

/// Open the history database
#[cfg(feature = "sqlite")]
async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(
        pyci::persistence::SqliteBuildStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without the sqlite feature; history is not kept between runs");
    Ok(Arc::new(InMemoryPersistence::new()))
}

/// Override or add environment entries before they are rendered
fn apply_overrides(pipeline: &mut Pipeline, overrides: &[(String, String)]) {
    for (key, value) in overrides {
        match pipeline.environment.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.clone(),
            None => pipeline.environment.push((key.clone(), value.clone())),
        }
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }
}

async fn run_pipeline(cmd: &RunCommand, stream: bool) -> Result<()> {
    let config = load_config(cmd.file.as_deref())?;
    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let workspace = std::fs::canonicalize(&cmd.workspace)
        .with_context(|| format!("Workspace {} not found", cmd.workspace.display()))?;

    let mut pipeline = config.to_pipeline();
    apply_overrides(&mut pipeline, &cmd.variable);

    let mut context = pipeline
        .create_context(&workspace)
        .with_ci_refs(cmd.refs.change_target.clone(), cmd.refs.branch_name.clone());

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_store().await?
    };

    let progress = create_spinner();
    let runner = if stream {
        ProcessRunner::new().with_sink(Arc::new(ConsoleSink::new(progress.clone())))
    } else {
        ProcessRunner::new()
    };
    let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new());

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting build");
            let _ = cancel_tx.send(true);
        }
    });

    let strategy = SchedulingStrategy::from(cmd.strategy);
    let engine = ExecutionEngine::new(runner, vcs, strategy).with_cancellation(cancel_rx);

    // Everything that happens goes into the build log; the console gets
    // the event lines and, for failures, the tail of the stage output.
    let build_log = Arc::new(Mutex::new(Vec::<String>::new()));
    let last_output = Arc::new(Mutex::new(Vec::<String>::new()));
    {
        let build_log = build_log.clone();
        let last_output = last_output.clone();
        let progress = progress.clone();
        engine.add_event_handler(move |event| {
            let line = format_execution_event(&event);
            let mut log = build_log.lock().unwrap_or_else(|p| p.into_inner());
            log.push(console::strip_ansi_codes(&line).into_owned());

            match &event {
                ExecutionEvent::StageOutput { stage_id, lines } => {
                    log.extend(lines.iter().map(|l| format!("[{}] {}", stage_id, l)));
                    *last_output.lock().unwrap_or_else(|p| p.into_inner()) = lines.clone();
                    return;
                }
                ExecutionEvent::StageStarted { stage_id, .. } => {
                    progress.set_message(format!("running {}", stage_id));
                }
                _ => {}
            }

            progress.println(line);
            if let ExecutionEvent::StageFailed { tolerated: false, .. } = &event {
                if !stream {
                    let tail = last_output.lock().unwrap_or_else(|p| p.into_inner());
                    progress.println(format_output(&tail, 20));
                }
            }
        });
    }

    println!();
    let result = engine.execute(&mut pipeline, &mut context).await;
    progress.finish_and_clear();

    let status = match &result {
        Ok(status) => *status,
        Err(e) => {
            error!("{}", e);
            ExecutionStatus::Failed
        }
    };

    let summary = create_summary(&pipeline, &context.build_id);
    let log_path = write_build_log(&workspace, &summary, &build_log)?;
    println!(
        "\n{} Build log: {}",
        INFO,
        style(log_path.display()).dim()
    );

    let keep_logs = pipeline.retention.keep_logs;
    let log_dir = workspace.join(STATE_DIR).join(LOG_DIR);
    match prune_entries(&log_dir, EntryKind::Files("log"), keep_logs) {
        Ok(removed) if !removed.is_empty() => {
            println!("{} Removed {} old build log(s)", INFO, removed.len())
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to prune build logs: {}", e),
    }

    // Save to history
    if !cmd.no_history {
        store.save_build(&summary).await?;
        let pruned = store.prune(&summary.pipeline_name, keep_logs).await?;
        println!(
            "{} Build saved to history (ID: {}{})",
            INFO,
            style(&summary.build_id).dim(),
            if pruned > 0 {
                format!(", {} old build(s) forgotten", pruned)
            } else {
                String::new()
            }
        );
    }

    println!();
    for record in &summary.stages {
        println!("  {}", format_stage_record(record));
    }

    // Print final status
    match status {
        ExecutionStatus::Completed => {
            println!(
                "\n{} {} completed {}",
                CHECK,
                style(&pipeline.name).bold(),
                style("successfully").green()
            );
            Ok(())
        }
        other => {
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                format_status(other)
            );
            std::process::exit(1);
        }
    }
}

fn write_build_log(
    workspace: &Path,
    summary: &BuildSummary,
    lines: &Mutex<Vec<String>>,
) -> Result<PathBuf> {
    let dir = workspace.join(STATE_DIR).join(LOG_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let mut content = lines.lock().unwrap_or_else(|p| p.into_inner()).join("\n");
    content.push_str("\n\n");
    for record in &summary.stages {
        content.push_str(&format!(
            "{}: {}{}\n",
            record.stage_id,
            record.result,
            record
                .detail
                .as_ref()
                .map(|d| format!(" ({})", d))
                .unwrap_or_default()
        ));
    }
    content.push_str(&format!("Finished: {:?}\n", summary.status));

    let path = dir.join(format!("{}.log", summary.build_id));
    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match load_config(cmd.file.as_deref()) {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Post stages: {}", style(config.post.len()).cyan());
            println!("  Environment: {}", style(config.environment().len()).cyan());

            let pipeline = config.to_pipeline();
            println!("  Order: {}", style(pipeline.execution_order().join(" → ")).dim());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn relevant_files(cmd: &RelevantFilesCommand) -> Result<()> {
    let pattern = Regex::new(&cmd.pattern).context("Invalid file pattern")?;
    let workspace = std::fs::canonicalize(&cmd.workspace)
        .with_context(|| format!("Workspace {} not found", cmd.workspace.display()))?;
    let context = BuildContext::new(&workspace)
        .with_ci_refs(cmd.refs.change_target.clone(), cmd.refs.branch_name.clone());

    let git = GitCli::new();
    let relevant =
        resolve_relevant_files(&git, &context, &cmd.source_dir, &pattern, &cmd.remote).await?;

    let side = |r: &Option<pyci::vcs::ResolvedRef>| match r {
        Some(r) => format!("{} ({})", r.rev, r.strategy),
        None => "null".to_string(),
    };
    eprintln!("{} LHS={} RHS={}", INFO, side(&relevant.lhs), side(&relevant.rhs));

    match &cmd.output {
        Some(path) => {
            write_relevant_files(path, &relevant)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} {} relevant file(s) written to {}",
                CHECK,
                relevant.files.len(),
                path.display()
            );
        }
        None => print!("{}", relevant.to_file_contents()),
    }

    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = open_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    let mut json_data = Vec::new();
    if !cmd.json {
        println!("{} Pipelines in history:", INFO);
    }

    for pipeline_name in &pipelines {
        let builds = store.list_builds(pipeline_name).await?;
        let succeeded = builds.iter().filter(|b| b.status == ExecutionStatus::Completed).count();
        let failed = builds.iter().filter(|b| b.status == ExecutionStatus::Failed).count();

        if cmd.json {
            json_data.push(serde_json::json!({
                "name": pipeline_name,
                "build_count": builds.len(),
                "succeeded": succeeded,
                "failed": failed,
            }));
        } else if cmd.with_counts {
            println!(
                "  {} ({} builds: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(builds.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand, verbose: bool) -> Result<()> {
    let store = open_store().await?;

    if let Some(build_id) = &cmd.build_id {
        match store.load_build(build_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => print_build_details(&summary, verbose),
            None => println!("{} Build {} not found", WARN, build_id),
        }
        return Ok(());
    }

    let builds: Vec<BuildSummary> = match &cmd.pipeline {
        Some(pipeline_name) => store.list_builds(pipeline_name).await?,
        None => {
            let mut all = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all.extend(store.list_builds(&pipeline).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    }
    .into_iter()
    .take(cmd.limit)
    .collect();

    if cmd.json {
        let data = serde_json::json!({ "builds": builds });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if builds.is_empty() {
        println!("{} No builds found", INFO);
        return Ok(());
    }

    println!("{} Build history (showing latest {}):", INFO, builds.len());
    for summary in &builds {
        println!("  {}", format_build_summary(summary));
        if verbose {
            for record in &summary.stages {
                println!("      {}", format_stage_record(record));
            }
        }
    }

    Ok(())
}

fn print_build_details(summary: &BuildSummary, verbose: bool) {
    println!("{} Build Details", INFO);
    println!("  Build: {}", style(&summary.build_id).cyan());
    println!("  Execution: {}", style(summary.execution_id).dim());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {}/{} done, {} failed",
        summary.completed_stages, summary.total_stages, summary.failed_stages
    );

    let stages = summary.stages.iter().filter(|s| verbose || s.result != "SUCCESS");
    for record in stages {
        println!("    {}", format_stage_record(record));
    }
}
