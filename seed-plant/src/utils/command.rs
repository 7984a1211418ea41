//! Running external tools with their output routed into `tracing`.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// How many trailing stderr lines are kept for diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Output from a command execution.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
    /// Last lines written to stderr.
    pub stderr_tail: Vec<String>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last stderr line, handy for one-line diagnostics.
    pub fn last_error_line(&self) -> Option<&str> {
        self.stderr_tail.last().map(String::as_str)
    }
}

/// Render a command the way a shell user would type it.
pub fn describe(command: &Command) -> String {
    let std_cmd = command.as_std();
    std::iter::once(std_cmd.get_program())
        .chain(std_cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a command to completion, streaming stdout/stderr into the log.
///
/// stdout lines are logged at debug level. stderr lines are logged at warn level
/// when they look like errors and kept (bounded) for the caller.
pub async fn run_captured(command: &mut Command) -> Result<CommandOutput> {
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();
    let start = Instant::now();

    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());
    command.stdin(Stdio::null());

    let mut child = command
        .spawn()
        .map_err(|e| Error::command(&program, e.to_string()))?;

    let stdout_task = child.stdout.take().map(|stdout| {
        let program = program.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if !line.is_empty() {
                    debug!(program = %program, "stdout: {}", line);
                }
            }
        })
    });

    let stderr_task = child.stderr.take().map(|stderr| {
        let program = program.clone();
        tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                if line.to_lowercase().contains("error") {
                    warn!(program = %program, "stderr: {}", line);
                } else {
                    debug!(program = %program, "stderr: {}", line);
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|e| Error::command(&program, format!("failed to wait: {}", e)))?;
    let duration = start.elapsed();

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    let stderr_tail = match stderr_task {
        Some(task) => task.await.map(Vec::from).unwrap_or_default(),
        None => Vec::new(),
    };

    Ok(CommandOutput {
        exit_code: status.code(),
        duration,
        stderr_tail,
    })
}
