//! External command execution.
//!
//! Every invoke ends in one or more external tools (`make`, `tar`, `aws`, the
//! code generator). They run through a [`CommandRunner`] so tests can script
//! results and `Cancel` can stop whatever is in flight.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ProviderError;

/// Number of stderr lines kept for error messages.
const STDERR_TAIL_LINES: usize = 20;

/// A command line to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program name or path.
    pub program: String,
    /// Arguments, passed without shell interpretation.
    pub args: Vec<String>,
    /// Working directory; `None` inherits the provider's.
    pub current_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Create a command with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the working directory.
    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.current_dir = dir;
        self
    }

    /// The command line as a single string, for logs and errors.
    pub fn display(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {:?}", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Result of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Everything written to stdout.
    pub stdout: String,
    /// The last lines written to stderr.
    pub stderr_tail: String,
}

/// Runs external commands.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run a command to completion.
    ///
    /// A non-zero exit is an error of kind [`ProviderError::Command`].
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProviderError>;

    /// Abort running commands and refuse new ones.
    fn cancel(&self) {}
}

/// Keeps the last `max` lines pushed into it.
#[derive(Debug, Default)]
struct TailBuffer {
    max: usize,
    lines: VecDeque<String>,
}

impl TailBuffer {
    fn new(max: usize) -> Self {
        Self {
            max,
            lines: VecDeque::new(),
        }
    }

    fn push(&mut self, line: String) {
        if self.max == 0 {
            return;
        }
        if self.lines.len() == self.max {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_string(self) -> String {
        Vec::from(self.lines).join("\n")
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn capture_lines<R: AsyncRead + Unpin>(
    reader: R,
    stream: Stream,
    command: String,
) -> std::io::Result<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut stdout = String::new();
    let mut tail = TailBuffer::new(STDERR_TAIL_LINES);

    while let Some(line) = lines.next_line().await? {
        match stream {
            Stream::Stdout => {
                info!(command = %command, "{}", line);
                stdout.push_str(&line);
                stdout.push('\n');
            },
            Stream::Stderr => {
                warn!(command = %command, "{}", line);
                tail.push(line);
            },
        }
    }

    Ok(match stream {
        Stream::Stdout => stdout,
        Stream::Stderr => tail.into_string(),
    })
}

/// Runs commands as child processes of the provider.
#[derive(Debug)]
pub struct SystemRunner {
    cancelled: watch::Sender<bool>,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    /// Create a runner.
    pub fn new() -> Self {
        let (cancelled, _) = watch::channel(false);
        Self { cancelled }
    }

    /// Whether [`CommandRunner::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProviderError> {
        let command_line = spec.display();
        let mut cancelled = self.cancelled.subscribe();
        if *cancelled.borrow() {
            return Err(ProviderError::Cancelled(command_line));
        }

        debug!(command = %command_line, dir = ?spec.current_dir, "Running command");

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| ProviderError::Command {
            command: command_line.clone(),
            reason: format!("failed to start: {}", e),
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout is not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr is not captured"))?;

        let stdout_task = tokio::spawn(capture_lines(stdout, Stream::Stdout, command_line.clone()));
        let stderr_task = tokio::spawn(capture_lines(stderr, Stream::Stderr, command_line.clone()));

        let exited = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancelled.wait_for(|c| *c) => None,
        };
        let Some(status) = exited else {
            warn!(command = %command_line, "Cancelling command");
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            return Err(ProviderError::Cancelled(command_line));
        };

        let stdout = join_capture(stdout_task).await?;
        let stderr_tail = join_capture(stderr_task).await?;

        if !status.success() {
            let exit = match status.code() {
                Some(code) => format!("exit status {}", code),
                None => "terminated by signal".to_string(),
            };
            let reason = if stderr_tail.is_empty() {
                exit
            } else {
                format!("{}: {}", exit, stderr_tail)
            };
            return Err(ProviderError::Command {
                command: command_line,
                reason,
            });
        }

        debug!(command = %command_line, "Command completed");
        Ok(CommandOutput {
            stdout,
            stderr_tail,
        })
    }

    fn cancel(&self) {
        self.cancelled.send_replace(true);
    }
}

async fn join_capture(
    task: tokio::task::JoinHandle<std::io::Result<String>>,
) -> Result<String, ProviderError> {
    match task.await {
        Ok(result) => Ok(result?),
        Err(err) => Err(ProviderError::Io(std::io::Error::other(err))),
    }
}
