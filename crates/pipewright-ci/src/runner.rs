//! External command execution.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{RunnerError, RunnerResult};

/// One shell command to run in a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub command: String,
    pub working_dir: PathBuf,
    /// Added on top of the inherited process environment.
    pub env: BTreeMap<String, String>,
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// A successful output carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty line of stderr, for reports.
    pub fn last_error_line(&self) -> Option<&str> {
        self.stderr.lines().rev().map(str::trim).find(|l| !l.is_empty())
    }
}

/// The process-execution collaborator.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the command. `Err` means it could not be run at all.
    async fn execute(&self, request: &CommandRequest) -> RunnerResult<CommandOutput>;
}

/// Runs commands through the host shell (`sh -c`, or `cmd /C` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    fn command(script: &str) -> Command {
        if cfg!(windows) {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(script);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        }
    }
}

#[async_trait]
impl CommandExecutor for ShellExecutor {
    async fn execute(&self, request: &CommandRequest) -> RunnerResult<CommandOutput> {
        let start = Instant::now();
        debug!(command = %request.command, cwd = %request.working_dir.display(), "Spawning command");

        let child = Self::command(&request.command)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: request.command.clone(),
                source,
            })?;

        let output = child.wait_with_output().await?;
        let duration_ms = start.elapsed().as_millis() as u64;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, dir: &std::path::Path) -> CommandRequest {
        CommandRequest {
            command: command.to_string(),
            working_dir: dir.to_path_buf(),
            env: BTreeMap::from([("PIPEWRIGHT_TEST".to_string(), "hello".to_string())]),
        }
    }

    #[test]
    fn last_error_line_skips_blank_lines() {
        let output = CommandOutput {
            exit_code: 1,
            stderr: "warning: x\nerror: boom\n\n".to_string(),
            ..CommandOutput::default()
        };
        assert_eq!(output.last_error_line(), Some("error: boom"));
        assert!(!output.success());
        assert!(CommandOutput::ok("").success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellExecutor
            .execute(&request("echo $PIPEWRIGHT_TEST && pwd", dir.path()))
            .await
            .expect("execute failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = ShellExecutor
            .execute(&request("echo oops >&2; exit 3", dir.path()))
            .await
            .expect("execute failed");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.last_error_line(), Some("oops"));
    }

    #[tokio::test]
    async fn missing_working_dir_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellExecutor
            .execute(&request("echo hi", &dir.path().join("missing")))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
    }
}
