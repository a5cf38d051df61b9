//! Build context - the explicit replacement for ambient shell state
//!
//! Every stage receives a clone of the context. Stages never mutate the
//! shared copy directly; they return [`ContextChange`]s which the engine
//! applies once the stage has finished.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Variable holding the pull request's base branch
pub const CHANGE_TARGET: &str = "CHANGE_TARGET";

/// Variable holding the branch being built
pub const BRANCH_NAME: &str = "BRANCH_NAME";

/// Execution context for a build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildContext {
    /// Sortable build identifier
    pub build_id: String,

    /// Workspace root; every relative path is resolved against it
    pub workspace: PathBuf,

    /// Rendered `environment` block plus user overrides
    pub variables: BTreeMap<String, String>,

    /// Base branch of the change under test, if any
    pub change_target: Option<String>,

    /// Branch being built, if any
    pub branch_name: Option<String>,

    /// Virtualenv activated by the provisioning stage
    pub virtualenv: Option<PathBuf>,
}

/// A change a stage asks the engine to apply to the shared context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextChange {
    /// Run every later command inside this virtualenv
    ActivateVirtualenv(PathBuf),
    /// Set a variable for later stages
    SetVariable(String, String),
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl BuildContext {
    /// Create a context rooted at `workspace`
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            build_id: String::new(),
            workspace: workspace.into(),
            variables: BTreeMap::new(),
            change_target: None,
            branch_name: None,
            virtualenv: None,
        }
    }

    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = build_id.into();
        self
    }

    /// Record the CI host's refs. Empty strings count as unset.
    pub fn with_ci_refs(mut self, change_target: Option<String>, branch_name: Option<String>) -> Self {
        self.change_target = non_empty(change_target);
        self.branch_name = non_empty(branch_name);
        self
    }

    /// Set a variable
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Get a variable, including the built-in ones
    pub fn get_variable(&self, key: &str) -> Option<String> {
        match key {
            CHANGE_TARGET => self.change_target.clone(),
            BRANCH_NAME => self.branch_name.clone(),
            "BUILD_ID" => Some(self.build_id.clone()),
            "WORKSPACE" => Some(self.workspace.display().to_string()),
            _ => self.variables.get(key).cloned(),
        }
    }

    /// Add environment entries in declaration order; each value may
    /// reference entries declared before it.
    pub fn extend_environment<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in entries {
            let rendered = self.render(&value);
            self.variables.insert(key, rendered);
        }
    }

    /// Replace `{{ NAME }}` placeholders. Unknown names are left untouched.
    pub fn render(&self, template: &str) -> String {
        placeholder_regex()
            .replace_all(template, |caps: &regex::Captures<'_>| {
                self.get_variable(&caps[1]).unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }

    /// Render a path template and anchor it to the workspace. Interior `.`
    /// components are dropped.
    pub fn resolve_path(&self, template: &str) -> PathBuf {
        let rendered = PathBuf::from(self.render(template));
        let anchored = if rendered.is_absolute() {
            rendered
        } else {
            self.workspace.join(rendered)
        };
        anchored.components().collect()
    }

    /// Path relative to the workspace, for display and for argv
    pub fn relative<'a>(&self, path: &'a Path) -> &'a Path {
        path.strip_prefix(&self.workspace).unwrap_or(path)
    }

    /// Apply a stage's requested change
    pub fn apply(&mut self, change: &ContextChange) {
        match change {
            ContextChange::ActivateVirtualenv(path) => {
                self.virtualenv = Some(path.clone());
            }
            ContextChange::SetVariable(key, value) => {
                self.variables.insert(key.clone(), value.clone());
            }
        }
    }

    /// Python interpreter to invoke: the virtualenv's once activated
    pub fn python(&self) -> String {
        match &self.virtualenv {
            Some(venv) => venv.join("bin").join("python").display().to_string(),
            None => "python".to_string(),
        }
    }

    /// Environment passed to every subprocess
    pub fn process_env(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(target) = &self.change_target {
            env.push((CHANGE_TARGET.to_string(), target.clone()));
        }
        if let Some(branch) = &self.branch_name {
            env.push((BRANCH_NAME.to_string(), branch.clone()));
        }

        if let Some(venv) = &self.virtualenv {
            env.push(("VIRTUAL_ENV".to_string(), venv.display().to_string()));

            let mut paths = vec![venv.join("bin")];
            if let Some(existing) = std::env::var_os("PATH") {
                paths.extend(std::env::split_paths(&existing));
            }
            if let Ok(joined) = std::env::join_paths(paths) {
                env.push(("PATH".to_string(), joined.to_string_lossy().into_owned()));
            }
        }

        env
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(".")
    }
}
