use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::command::CommandLine;
use crate::error::{ProvisionError, Result};

/// Substring in a status check's stderr that marks an expected "absent"
/// answer rather than something worth warning about.
pub const BENIGN_MARKER: &str = "not found";

/// Exit code and output of a finished child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes external commands on behalf of the provisioner.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs the command, relaying its output line by line to the console.
    /// The returned outcome carries only the exit code.
    async fn stream(&self, cmd: &CommandLine) -> Result<ExecOutcome>;

    /// Runs the command to completion and hands back what it printed.
    async fn capture(&self, cmd: &CommandLine) -> Result<ExecOutcome>;

    /// Blocks the flow for `duration`.
    async fn pause(&self, duration: Duration);
}

/// Runs a user-facing step. A non-zero exit ends the run.
pub async fn run_step<R: Runner + ?Sized>(runner: &R, cmd: &CommandLine) -> Result<()> {
    let outcome = runner.stream(cmd).await?;
    if !outcome.succeeded() {
        return Err(ProvisionError::StepFailed {
            command: cmd.to_string(),
            exit_code: outcome.exit_code,
        });
    }
    Ok(())
}

/// Runs a status check. A non-zero exit is returned to the caller, never
/// raised.
pub async fn run_check<R: Runner + ?Sized>(runner: &R, cmd: &CommandLine) -> Result<ExecOutcome> {
    let outcome = runner.capture(cmd).await?;
    if let Some(message) = check_warning(&outcome) {
        warn!(command = %cmd, exit_code = outcome.exit_code, "status check failed");
        println!("   {}", message);
    }
    Ok(outcome)
}

/// Warning text for a failed status check, unless the failure just means the
/// queried resource does not exist.
pub fn check_warning(outcome: &ExecOutcome) -> Option<String> {
    if outcome.succeeded() || outcome.stderr.contains(BENIGN_MARKER) {
        return None;
    }
    Some(format!(
        "Warning: Command returned non-zero exit code. Stderr: {}",
        outcome.stderr.trim()
    ))
}

/// Spawns real processes found on `PATH`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

#[async_trait]
impl Runner for SystemRunner {
    async fn stream(&self, cmd: &CommandLine) -> Result<ExecOutcome> {
        println!("🚀 Executing: {}", cmd);

        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(cmd, e))?;

        // Both pipes feed one channel so lines come out in arrival order.
        // An early return drops `child`, which kills it.
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx.clone()));
        }
        drop(tx);

        while let Some(line) = rx.recv().await {
            let line = line.map_err(|e| io_error(cmd, e))?;
            println!("   {}", line);
        }

        let status = child.wait().await.map_err(|e| io_error(cmd, e))?;
        let exit_code = status.code().unwrap_or(1);
        debug!(command = %cmd, exit_code, "streamed command finished");

        Ok(ExecOutcome {
            exit_code,
            ..ExecOutcome::default()
        })
    }

    async fn capture(&self, cmd: &CommandLine) -> Result<ExecOutcome> {
        println!("🚀 Executing: {}", cmd);

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| spawn_error(cmd, e))?;

        let outcome = ExecOutcome {
            exit_code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(command = %cmd, exit_code = outcome.exit_code, "captured command finished");
        trace!(stdout = outcome.stdout.trim(), stderr = outcome.stderr.trim(), "captured output");
        Ok(outcome)
    }

    async fn pause(&self, duration: Duration) {
        debug!(?duration, "pausing");
        tokio::time::sleep(duration).await;
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<io::Result<String>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if tx.send(Ok(line)).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

fn spawn_error(cmd: &CommandLine, err: io::Error) -> ProvisionError {
    if err.kind() == io::ErrorKind::NotFound {
        ProvisionError::ToolMissing {
            tool: cmd.program.clone(),
        }
    } else {
        io_error(cmd, err)
    }
}

fn io_error(cmd: &CommandLine, source: io::Error) -> ProvisionError {
    ProvisionError::Io {
        command: cmd.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRunner;

    fn failed(exit_code: i32, stderr: &str) -> ExecOutcome {
        ExecOutcome {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn not_found_failure_is_silent() {
        let outcome = failed(1, "Error: cluster get redeploy-hub-local: not found");
        assert_eq!(check_warning(&outcome), None);
    }

    #[test]
    fn other_failure_warns_with_trimmed_stderr() {
        let outcome = failed(2, "permission denied\n");
        assert_eq!(
            check_warning(&outcome).as_deref(),
            Some("Warning: Command returned non-zero exit code. Stderr: permission denied")
        );
    }

    #[test]
    fn success_never_warns() {
        assert_eq!(check_warning(&failed(0, "something went wrong")), None);
    }

    #[tokio::test]
    async fn run_check_returns_failures_instead_of_raising() {
        let runner = ScriptedRunner::new();
        runner.push(failed(2, "permission denied"));

        let cmd = CommandLine::new("k3d").args(["cluster", "get", "x"]);
        let outcome = run_check(&runner, &cmd).await.unwrap();

        assert_eq!(outcome.exit_code, 2);
    }

    #[tokio::test]
    async fn run_step_turns_non_zero_exit_into_step_failure() {
        let runner = ScriptedRunner::new();
        runner.push(failed(7, ""));

        let cmd = CommandLine::new("helm").args(["repo", "update"]);
        let err = run_step(&runner, &cmd).await.unwrap_err();

        match err {
            ProvisionError::StepFailed { command, exit_code } => {
                assert_eq!(command, "helm repo update");
                assert_eq!(exit_code, 7);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn system_runner_reports_missing_tool() {
        let cmd = CommandLine::new("definitely-not-an-installed-tool-7f3a");

        let err = SystemRunner.stream(&cmd).await.unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::ToolMissing { ref tool } if tool == "definitely-not-an-installed-tool-7f3a"
        ));

        let err = SystemRunner.capture(&cmd).await.unwrap_err();
        assert!(matches!(err, ProvisionError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn system_runner_streams_and_reports_exit_code() {
        let cmd = CommandLine::new("sh").args(["-c", "echo out; echo err 1>&2; exit 7"]);
        let outcome = SystemRunner.stream(&cmd).await.unwrap();
        assert_eq!(outcome.exit_code, 7);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn system_runner_captures_both_streams() {
        let cmd = CommandLine::new("sh").args(["-c", "echo ready; echo 'not found' 1>&2; exit 1"]);
        let outcome = SystemRunner.capture(&cmd).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.stdout.trim(), "ready");
        assert_eq!(outcome.stderr.trim(), "not found");
        assert_eq!(check_warning(&outcome), None);
    }

    #[tokio::test]
    async fn abandoned_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch '{}'", marker.display());
        let cmd = CommandLine::new("sh").args(["-c", script.as_str()]);

        let capture = tokio::time::timeout(Duration::from_millis(100), SystemRunner.capture(&cmd));
        assert!(capture.await.is_err());
        let stream = tokio::time::timeout(Duration::from_millis(100), SystemRunner.stream(&cmd));
        assert!(stream.await.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
