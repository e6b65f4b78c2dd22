use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use which::which;

use crate::errors::{CommandError, ConfigError};

/// Finds an executable in the system PATH.
pub fn find_executable(tool: &'static str) -> Result<PathBuf, ConfigError> {
    which(tool).map_err(|source| ConfigError::ToolNotFound { tool, source })
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs `command` to completion with captured output.
///
/// A non-zero exit becomes `CommandError::Failed` carrying everything the tool
/// printed. When `timeout` elapses the child is killed.
pub async fn run_command(
    mut command: Command,
    timeout: Option<Duration>,
) -> Result<CommandOutput, CommandError> {
    let program = program_name(command.as_std().get_program());
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let wait = child.wait_with_output();
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                return Err(CommandError::TimedOut {
                    program,
                    after: limit,
                });
            }
        },
        None => wait.await,
    };
    let output = result.map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let captured = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };

    if !output.status.success() {
        return Err(CommandError::Failed {
            program,
            status: output.status.to_string(),
            output: captured.combined(),
        });
    }
    Ok(captured)
}

fn program_name(program: &std::ffi::OsStr) -> String {
    Path::new(program)
        .file_name()
        .unwrap_or(program)
        .to_string_lossy()
        .into_owned()
}

/// Masks a secret for logging, keeping only its length.
pub fn redact(secret: &str) -> String {
    "*".repeat(secret.chars().count())
}
