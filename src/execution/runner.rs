//! Command runner - spawns the external tools each stage drives

use crate::core::BuildContext;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// A single command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    /// Executable name or path
    pub program: String,

    /// Arguments, passed verbatim
    pub args: Vec<String>,

    /// Extra environment on top of the build context's
    pub env: Vec<(String, String)>,

    /// Text written to the child's stdin, which is then closed
    pub stdin: Option<String>,

    /// Kill the child after this long
    pub timeout: Option<Duration>,
}

impl ShellCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// `sh -c <script>`
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Build from an argv vector; `None` when it is empty
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command line as it would be typed in a shell
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part.replace('\'', r"'\''"))
                } else {
                    part.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (-1 when killed by a signal)
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Errors raised before a command could produce an exit code
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    #[error("I/O error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives output lines while a command is still running
pub trait OutputSink: Send + Sync {
    fn on_line(&self, stream: OutputStream, line: &str);
}

/// Trait for command execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a command inside the build context and wait for it
    async fn run(
        &self,
        command: &ShellCommand,
        context: &BuildContext,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Runs commands as real subprocesses
#[derive(Clone, Default)]
pub struct ProcessRunner {
    sink: Option<Arc<dyn OutputSink>>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every output line to `sink` as it arrives
    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl std::fmt::Debug for ProcessRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRunner")
            .field("streaming", &self.sink.is_some())
            .finish()
    }
}

async fn collect_lines<R>(
    reader: Option<R>,
    stream: OutputStream,
    sink: Option<Arc<dyn OutputSink>>,
) -> String
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return String::new();
    };

    let mut reader = BufReader::new(reader);
    let mut collected = String::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                if let Some(sink) = &sink {
                    sink.on_line(stream, line.trim_end_matches(['\n', '\r']));
                }
                collected.push_str(&line);
            }
        }
    }

    collected
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        command: &ShellCommand,
        context: &BuildContext,
    ) -> Result<CommandOutput, RunnerError> {
        let shown = command.display();
        debug!("Running `{}` in {}", shown, context.workspace.display());

        let start = Instant::now();
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&context.workspace)
            .envs(context.process_env())
            .envs(command.env.iter().cloned())
            .stdin(if command.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut stdin)) = (&command.stdin, child.stdin.take()) {
            // The child may exit without reading; a broken pipe is not our failure
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("Could not write stdin of `{}`: {}", shown, e);
            }
        }

        let stdout_task = tokio::spawn(collect_lines(
            child.stdout.take(),
            OutputStream::Stdout,
            self.sink.clone(),
        ));
        let stderr_task = tokio::spawn(collect_lines(
            child.stderr.take(),
            OutputStream::Stderr,
            self.sink.clone(),
        ));

        let status = match command.timeout {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!("`{}` timed out after {}s, killing it", shown, limit.as_secs());
                    let _ = child.kill().await;
                    stdout_task.abort();
                    stderr_task.abort();
                    return Err(RunnerError::Timeout {
                        command: shown,
                        secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|source| RunnerError::Io {
            command: shown.clone(),
            source,
        })?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let exit_code = status.code().unwrap_or(-1);

        debug!("`{}` exited with code {}", shown, exit_code);

        Ok(CommandOutput {
            exit_code,
            stdout,
            stderr,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
