//! Process Executor Adapter
//!
//! Implements the `CommandExecutor` port by spawning the vendor tools as
//! child processes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::domain::ports::{CommandExecutor, CommandOutput};
use crate::error::Result;

/// Runs tool binaries with `tokio::process`.
///
/// There is no timeout; callers that need one wrap the future themselves.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Create a new process executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    #[instrument(skip(self, args), fields(args = %args.join(" ")))]
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(
            program = %program,
            status = ?output.status.code(),
            stdout_len = result.stdout.len(),
            "Command exited"
        );

        Ok(result)
    }

    fn lookup_binary(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}
