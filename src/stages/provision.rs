//! Python environment provisioning
//!
//! The work is described up front as a [`ProvisionPlan`]: an ordered list of
//! commands, each with the exit status it must produce. Executing the plan
//! stops at the first step whose result does not match.

use crate::core::config::ProvisionConfig;
use crate::core::{BuildContext, ContextChange};
use crate::execution::runner::ShellCommand;
use crate::stages::{StageError, StageOutcome, StageRun};
use std::path::PathBuf;

/// Exit status a plan step must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Success,
    /// The command must fail (the forbidden-module import)
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub description: String,
    pub command: ShellCommand,
    pub expect: Expect,
    /// Virtualenv to activate once this step succeeds
    pub activates: Option<PathBuf>,
}

impl PlanStep {
    fn new(description: impl Into<String>, command: ShellCommand) -> Self {
        Self {
            description: description.into(),
            command,
            expect: Expect::Success,
            activates: None,
        }
    }
}

/// Ordered provisioning commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionPlan {
    pub steps: Vec<PlanStep>,
    pub forbidden_module: Option<String>,
}

impl ProvisionPlan {
    /// Build the plan for `config`, rendering every template against `context`
    pub fn build(config: &ProvisionConfig, context: &BuildContext) -> Self {
        let version = context.render(&config.python_version);
        let tool_dir = context.resolve_path(&config.tool_dir);
        let venv_dir = context.resolve_path(&config.venv_dir);
        let venv_python = venv_dir.join("bin").join("python").display().to_string();
        let mut steps = Vec::new();

        if config.pyenv {
            steps.push(PlanStep::new(
                format!("Install Python {}", version),
                ShellCommand::new("pyenv").args(["install", "--skip-existing", version.as_str()]),
            ));
            steps.push(PlanStep::new(
                format!("Pin Python {}", version),
                ShellCommand::new("pyenv").args(["local", version.as_str()]),
            ));
        }

        let tool_dir_arg = tool_dir.display().to_string();
        steps.push(PlanStep::new(
            "Install virtualenv",
            ShellCommand::new(context.python()).args([
                "-m",
                "pip",
                "install",
                "--target",
                tool_dir_arg.as_str(),
                "virtualenv",
            ]),
        ));

        let mut create = PlanStep::new(
            "Create virtualenv",
            ShellCommand::new(context.python())
                .args(["-m", "virtualenv"])
                .arg(venv_dir.display().to_string())
                .env("PYTHONPATH", tool_dir_arg.as_str()),
        );
        create.activates = Some(venv_dir.clone());
        steps.push(create);

        let pip = |extra: &[&str]| {
            ShellCommand::new(venv_python.as_str())
                .args(["-m", "pip"])
                .args(extra.iter().copied())
        };

        if let Some(pip_version) = &config.pip_version {
            let pin = format!("pip=={}", context.render(pip_version));
            steps.push(PlanStep::new(
                format!("Pin {}", pin),
                pip(&["install", "-U", pin.as_str()]),
            ));
        }

        if let Some(script) = &config.requirements_script {
            let script = context.render(script);
            let program = if script.contains('/') {
                context.resolve_path(&script).display().to_string()
            } else {
                script.clone()
            };
            steps.push(PlanStep::new(
                format!("Generate requirements with {}", script),
                ShellCommand::new(program).stdin(context.render(&config.script_answer)),
            ));
        }

        for requirements in &config.requirements {
            let requirements = context.render(requirements);
            steps.push(PlanStep::new(
                format!("Install {}", requirements),
                pip(&["install", "-r", requirements.as_str()]),
            ));
        }

        for package in &config.uninstall {
            let package = context.render(package);
            steps.push(PlanStep::new(
                format!("Remove {}", package),
                pip(&["uninstall", "-y", package.as_str()]),
            ));
        }

        let forbidden_module = config.forbidden_module.as_ref().map(|m| context.render(m));
        if let Some(module) = &forbidden_module {
            let mut check = PlanStep::new(
                format!("Check that {} is not importable", module),
                ShellCommand::new(venv_python.as_str())
                    .arg("-c")
                    .arg(format!("import {}", module)),
            );
            check.expect = Expect::Failure;
            steps.push(check);
        }

        Self {
            steps,
            forbidden_module,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Execute the provisioning plan
pub async fn provision(run: &mut StageRun<'_>, config: &ProvisionConfig) -> Result<StageOutcome, StageError> {
    let plan = ProvisionPlan::build(config, &run.context);
    let total = plan.len();

    for (index, step) in plan.steps.into_iter().enumerate() {
        run.note(format!("[{}/{}] {}", index + 1, total, step.description));

        match step.expect {
            Expect::Success => {
                run.check(step.command).await?;
            }
            Expect::Failure => {
                let output = run.run(step.command).await?;
                if output.success() {
                    let module = plan.forbidden_module.clone().unwrap_or_default();
                    return Err(StageError::ForbiddenModule(module));
                }
            }
        }

        if let Some(venv) = step.activates {
            run.note(format!("Activated {}", run.context.relative(&venv).display()));
            run.change(ContextChange::ActivateVirtualenv(venv));
        }
    }

    Ok(StageOutcome::Done(format!("{} provisioning step(s) succeeded", total)))
}
