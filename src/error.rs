use std::time::Duration;
use thiserror::Error;

/// Fatal conditions raised while provisioning. Every variant ends the run.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Command '{tool}' not found. Is it installed and in your PATH?")]
    ToolMissing { tool: String },

    #[error("Error executing command: {command} (exit code {exit_code})")]
    StepFailed { command: String, exit_code: i32 },

    #[error("An unexpected error occurred while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cluster '{cluster}' did not become ready after waiting {waited:?}")]
    NotReady { cluster: String, waited: Duration },
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
