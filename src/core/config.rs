//! Pipeline configuration from YAML

use crate::core::Pipeline;
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::HashSet;
use std::path::Path;

/// Default pipeline shipped with the binary
const BUILTIN_PIPELINE: &str = include_str!("../../pipelines/python-ci.yaml");

/// Workspace directory holding build logs and published reports. It
/// survives every workspace clean.
pub const STATE_DIR: &str = ".pyci";

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Process-wide constants, in declaration order. Values may reference
    /// earlier entries with `{{ NAME }}`.
    #[serde(default)]
    environment: Mapping,

    /// Main stages
    pub stages: Vec<StageConfig>,

    /// Stages that always run once the main stages are done
    #[serde(default)]
    pub post: Vec<StageConfig>,

    /// Abort the whole build after this many minutes
    #[serde(default)]
    pub timeout_minutes: Option<u64>,

    /// Default timeout for each command (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,

    /// How many previous builds to keep around
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Retention policy for logs and published reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Prior builds whose logs (and history rows) are kept
    #[serde(default = "default_keep_logs")]
    pub keep_logs: usize,

    /// Prior builds whose published reports are kept
    #[serde(default = "default_keep_artifacts")]
    pub keep_artifacts: usize,
}

fn default_keep_logs() -> usize {
    2
}

fn default_keep_artifacts() -> usize {
    1
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_logs: default_keep_logs(),
            keep_artifacts: default_keep_artifacts(),
        }
    }
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage identifier
    pub id: String,

    /// Human-readable stage name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,

    /// Optional stage description
    #[serde(default)]
    pub description: Option<String>,

    /// List of stage IDs this stage depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Record a failure without failing the build
    #[serde(default)]
    pub continue_on_error: bool,

    /// Timeout for each command of this stage (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// What the stage does
    #[serde(flatten)]
    pub kind: StageKind,
}

/// The work a stage performs. Exactly one key per stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Arbitrary shell commands, run in order
    Shell(ShellConfig),
    /// Clean the workspace and create the output directory
    WorkspaceReset(WorkspaceResetConfig),
    /// Compute the files changed between two commits
    RelevantFiles(RelevantFilesConfig),
    /// Build the Python environment
    Provision(ProvisionConfig),
    /// Run the unit test suite
    UnitTests(UnitTestConfig),
    /// Lint the relevant files
    Lint(LintConfig),
    /// Publish the report files
    Publish(PublishConfig),
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Shell(_) => "shell",
            StageKind::WorkspaceReset(_) => "workspace_reset",
            StageKind::RelevantFiles(_) => "relevant_files",
            StageKind::Provision(_) => "provision",
            StageKind::UnitTests(_) => "unit_tests",
            StageKind::Lint(_) => "lint",
            StageKind::Publish(_) => "publish",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Each entry is passed to `sh -c`
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceResetConfig {
    /// Paths excluded from the clean (dependency caches)
    pub keep: Vec<String>,
    /// Directory created after the clean
    pub output_dir: String,
    /// Set to false to only create the output directory
    pub clean: bool,
}

impl Default for WorkspaceResetConfig {
    fn default() -> Self {
        Self {
            keep: vec![".pip-cache".to_string()],
            output_dir: "{{ OUTPUT }}".to_string(),
            clean: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevantFilesConfig {
    /// Only files under this directory are considered
    pub source_dir: String,
    /// Regex a candidate path must match
    pub pattern: String,
    /// Where the list is written
    pub output: String,
    /// Remote whose tracking refs are tried first
    pub remote: String,
}

impl Default for RelevantFilesConfig {
    fn default() -> Self {
        Self {
            source_dir: "hubblestack".to_string(),
            pattern: r"\.py$".to_string(),
            output: "{{ REF }}".to_string(),
            remote: "origin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Interpreter version pinned through pyenv
    pub python_version: String,
    /// Whether to install/pin the interpreter with pyenv
    pub pyenv: bool,
    /// Local directory the virtualenv tool is installed into
    pub tool_dir: String,
    /// Virtualenv location
    pub venv_dir: String,
    /// Pinned pip version
    pub pip_version: Option<String>,
    /// Helper script that writes the requirements file
    pub requirements_script: Option<String>,
    /// Fed to the helper script's stdin
    pub script_answer: String,
    /// Requirement files installed in order
    pub requirements: Vec<String>,
    /// Packages removed after installation
    pub uninstall: Vec<String>,
    /// Module that must not be importable once provisioning is done
    pub forbidden_module: Option<String>,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            python_version: "{{ TEST_PY_V }}".to_string(),
            pyenv: true,
            tool_dir: ".pip-cache/tools".to_string(),
            venv_dir: "venv".to_string(),
            pip_version: None,
            requirements_script: None,
            script_answer: "n\n".to_string(),
            requirements: vec!["requirements.txt".to_string()],
            uninstall: Vec::new(),
            forbidden_module: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitTestConfig {
    /// Test runner argv
    pub command: Vec<String>,
    /// Directory the runner writes its reports into
    pub report_dir: String,
    /// Files the run is expected to produce in `report_dir`
    pub artifacts: Vec<String>,
}

impl Default for UnitTestConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "pytest".to_string(),
                "-v".to_string(),
                "--html={{ OUTPUT }}/pytest.html".to_string(),
                "--self-contained-html".to_string(),
                "tests/unittests".to_string(),
            ],
            report_dir: "{{ OUTPUT }}".to_string(),
            artifacts: vec![
                "pytest.html".to_string(),
                "combined.svg".to_string(),
                "profile-diagram.svg".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LintConfig {
    /// List produced by the relevant-files stage
    pub relevant_files: String,
    /// Linter argv; the relevant files are appended
    pub command: Vec<String>,
    /// JSON report written from the linter's stdout
    pub json_report: String,
    /// Converter argv run after the JSON report is written
    pub converter: Option<Vec<String>>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            relevant_files: "{{ REF }}".to_string(),
            command: vec!["pylint".to_string(), "--output-format=json".to_string()],
            json_report: "{{ OUTPUT }}/pylint.json".to_string(),
            converter: Some(vec![
                "pylint-json2html".to_string(),
                "-f".to_string(),
                "json".to_string(),
                "-o".to_string(),
                "{{ OUTPUT }}/pylint.html".to_string(),
                "{{ OUTPUT }}/pylint.json".to_string(),
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Directory holding the reports; it must exist
    pub report_dir: String,
    /// Report file names, relative to `report_dir`
    pub files: Vec<String>,
    /// Where published report sets are stored, one directory per build
    pub publish_dir: String,
    /// Title of the generated index page
    pub title: String,
    /// Tolerate missing report files
    pub allow_missing: bool,
    /// Prior report sets to keep (defaults to the pipeline retention)
    pub keep: Option<usize>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            report_dir: "{{ OUTPUT }}".to_string(),
            files: vec![
                "relevant-files.txt".to_string(),
                "pytest.html".to_string(),
                "combined.svg".to_string(),
                "profile-diagram.svg".to_string(),
                "pylint.html".to_string(),
            ],
            publish_dir: format!("{}/reports", STATE_DIR),
            title: "Test Reports".to_string(),
            allow_missing: true,
            keep: None,
        }
    }
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// The default Python CI pipeline
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_PIPELINE).context("Built-in pipeline is invalid")
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        // Check that all stage IDs are unique, post stages included
        let mut seen_ids = HashSet::new();
        for stage in self.stages.iter().chain(self.post.iter()) {
            if !seen_ids.insert(&stage.id) {
                anyhow::bail!("Duplicate stage ID: {}", stage.id);
            }
        }

        let stage_ids: HashSet<_> = self.stages.iter().map(|s| &s.id).collect();
        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !stage_ids.contains(dep) {
                    anyhow::bail!(
                        "Stage '{}' depends on non-existent stage '{}'",
                        stage.id,
                        dep
                    );
                }
            }
        }

        for stage in &self.post {
            if !stage.depends_on.is_empty() {
                anyhow::bail!(
                    "Post stage '{}' cannot declare depends_on; post stages always run last",
                    stage.id
                );
            }
        }

        for stage in self.stages.iter().chain(self.post.iter()) {
            Self::validate_kind(stage)?;
        }

        self.check_cycles()?;

        Ok(())
    }

    fn validate_kind(stage: &StageConfig) -> Result<()> {
        match &stage.kind {
            StageKind::Shell(shell) => {
                if shell.commands.is_empty() {
                    anyhow::bail!("Stage '{}' has no shell commands", stage.id);
                }
            }
            StageKind::RelevantFiles(relevant) => {
                Regex::new(&relevant.pattern).with_context(|| {
                    format!("Stage '{}' has an invalid file pattern", stage.id)
                })?;
            }
            StageKind::UnitTests(tests) => {
                if tests.command.is_empty() {
                    anyhow::bail!("Stage '{}' has an empty test command", stage.id);
                }
            }
            StageKind::Lint(lint) => {
                if lint.command.is_empty() {
                    anyhow::bail!("Stage '{}' has an empty lint command", stage.id);
                }
                if lint.converter.as_ref().is_some_and(|c| c.is_empty()) {
                    anyhow::bail!("Stage '{}' has an empty converter command", stage.id);
                }
            }
            StageKind::WorkspaceReset(_) | StageKind::Provision(_) | StageKind::Publish(_) => {}
        }
        Ok(())
    }

    /// Check for cycles in the stage dependency graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for stage in &self.stages {
            if !visited.contains(&stage.id) {
                self.dfs_check(&stage.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        stage_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(stage_id.to_string());
        recursion_stack.insert(stage_id.to_string());

        if let Some(stage) = self.stages.iter().find(|s| s.id == stage_id) {
            for dep in &stage.depends_on {
                if recursion_stack.contains(dep) {
                    anyhow::bail!("Cycle detected in dependency graph involving stage '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(stage_id);
        Ok(())
    }

    /// Environment entries as strings, in declaration order
    pub fn environment(&self) -> Vec<(String, String)> {
        self.environment
            .iter()
            .filter_map(|(key, value)| {
                let key = key.as_str()?.to_string();
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Null => String::new(),
                    // Fallback: convert to string
                    other => serde_yaml::to_string(other)
                        .unwrap_or_default()
                        .trim_end()
                        .to_string(),
                };
                Some((key, value))
            })
            .collect()
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}
