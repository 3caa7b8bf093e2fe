//! Scripted runner for exercising the provisioner without spawning processes.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::command::CommandLine;
use crate::error::Result;
use crate::runner::{ExecOutcome, Runner};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Stream(CommandLine),
    Capture(CommandLine),
    Pause(Duration),
}

/// Replays queued results in order and records every call. Once the queue
/// is empty each command succeeds with no output.
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<ExecOutcome>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, outcome: ExecOutcome) {
        self.script.lock().unwrap().push_back(Ok(outcome));
    }

    pub fn push_exit(&self, exit_code: i32, stderr: &str) {
        self.push(ExecOutcome {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    pub fn push_stdout(&self, exit_code: i32, stdout: &str) {
        self.push(ExecOutcome {
            exit_code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
    }

    pub fn push_err(&self, err: crate::error::ProvisionError) {
        self.script.lock().unwrap().push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Commands in execution order, ignoring pauses.
    pub fn commands(&self) -> Vec<CommandLine> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Stream(cmd) | Call::Capture(cmd) => Some(cmd),
                Call::Pause(_) => None,
            })
            .collect()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Pause(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn next(&self, call: Call) -> Result<ExecOutcome> {
        self.calls.lock().unwrap().push(call);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ExecOutcome::default()))
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn stream(&self, cmd: &CommandLine) -> Result<ExecOutcome> {
        self.next(Call::Stream(cmd.clone()))
    }

    async fn capture(&self, cmd: &CommandLine) -> Result<ExecOutcome> {
        self.next(Call::Capture(cmd.clone()))
    }

    async fn pause(&self, duration: Duration) {
        self.calls.lock().unwrap().push(Call::Pause(duration));
    }
}
