//! Command Runner
//!
//! Builds and executes vendor tool invocations on top of the
//! [`CommandExecutor`] port. Guards each tool with a one-time check that is
//! cached for the lifetime of the runner:
//!
//! - the region tool must not be a release on the deny-list
//! - the namespace tool must resolve on `PATH`

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::{PmemConfig, SocketSelector};
use crate::domain::ports::{CommandExecutor, CommandOutput, Tool, ToolCommand};
use crate::error::{Error, Result};
use crate::metrics::PmemMetrics;

/// Cached outcome of the region tool version check.
#[derive(Debug, Clone, PartialEq, Eq)]
enum IpmctlCheck {
    Supported { version: String },
    Incompatible { version: String },
    Unparsable { output: String },
    Failed { command: String, stdout: String, reason: String },
}

impl IpmctlCheck {
    fn to_result(&self) -> Result<()> {
        match self {
            IpmctlCheck::Supported { .. } => Ok(()),
            IpmctlCheck::Incompatible { version } => Err(Error::BadIpmctlVersion {
                version: version.clone(),
            }),
            IpmctlCheck::Unparsable { output } => Err(Error::IpmctlVersionUnparsable {
                output: output.clone(),
            }),
            IpmctlCheck::Failed {
                command,
                stdout,
                reason,
            } => Err(Error::CommandFailed {
                command: command.clone(),
                stdout: stdout.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Runs region and namespace tool commands.
pub struct CommandRunner {
    executor: Arc<dyn CommandExecutor>,
    config: PmemConfig,
    metrics: Arc<PmemMetrics>,
    ipmctl_check: OnceCell<IpmctlCheck>,
    ndctl_present: OnceCell<bool>,
}

impl CommandRunner {
    /// Create a runner. Tool checks run lazily on first use.
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        config: PmemConfig,
        metrics: Arc<PmemMetrics>,
    ) -> Self {
        Self {
            executor,
            config,
            metrics,
            ipmctl_check: OnceCell::new(),
            ndctl_present: OnceCell::new(),
        }
    }

    /// Configuration the runner was built with.
    pub fn config(&self) -> &PmemConfig {
        &self.config
    }

    fn binary(&self, tool: Tool) -> &str {
        match tool {
            Tool::Ipmctl => &self.config.ipmctl_bin,
            Tool::Ndctl => &self.config.ndctl_bin,
        }
    }

    /// Run a command and return its stdout, failing on a non-zero exit.
    pub async fn run(&self, cmd: &ToolCommand) -> Result<String> {
        let out = self.run_output(cmd).await?;
        if !out.success {
            return Err(command_failed(cmd, &out));
        }
        Ok(out.stdout)
    }

    /// Run a command restricted to `selector` and return its stdout.
    pub async fn run_socket_aware(
        &self,
        selector: SocketSelector,
        cmd: &ToolCommand,
    ) -> Result<String> {
        self.run(&socket_command(selector, cmd)).await
    }

    /// Run a command and return its raw output whatever the exit status.
    ///
    /// Only a failure to run the process at all, or a failed tool check, is
    /// returned as an error.
    pub async fn run_output(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        self.ensure_tool(cmd.tool).await?;
        self.execute(cmd).await
    }

    async fn execute(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        debug!(command = %cmd, "Running PMem tool command");

        let result = self.executor.execute(self.binary(cmd.tool), &cmd.args).await;
        let tool = cmd.tool.binary();
        match result {
            Ok(out) => {
                self.metrics.record_command(tool, out.success);
                if !out.success {
                    warn!(command = %cmd, stderr = %out.stderr.trim(), "PMem tool command failed");
                }
                Ok(out)
            }
            Err(e) => {
                self.metrics.record_command(tool, false);
                warn!(command = %cmd, error = %e, "PMem tool command could not be run");
                Err(Error::CommandFailed {
                    command: cmd.to_string(),
                    stdout: String::new(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn ensure_tool(&self, tool: Tool) -> Result<()> {
        match tool {
            Tool::Ipmctl => self.ensure_ipmctl().await,
            Tool::Ndctl => self.ensure_ndctl().await,
        }
    }

    async fn ensure_ipmctl(&self) -> Result<()> {
        self.ipmctl_check
            .get_or_init(|| self.check_ipmctl_version())
            .await
            .to_result()
    }

    async fn check_ipmctl_version(&self) -> IpmctlCheck {
        let cmd = ToolCommand::new(Tool::Ipmctl, &["version"]);
        let out = match self.execute(&cmd).await {
            Ok(out) if out.success => out,
            Ok(out) => {
                let reason = failure_reason(&out);
                return IpmctlCheck::Failed {
                    command: cmd.to_string(),
                    stdout: out.stdout,
                    reason,
                };
            }
            Err(e) => {
                return IpmctlCheck::Failed {
                    command: cmd.to_string(),
                    stdout: String::new(),
                    reason: e.to_string(),
                };
            }
        };

        let Some(version) = extract_version(&out.stdout) else {
            return IpmctlCheck::Unparsable {
                output: out.stdout.trim().to_string(),
            };
        };

        if self.config.bad_ipmctl_versions.iter().any(|bad| *bad == version) {
            warn!(version = %version, "Incompatible ipmctl version");
            return IpmctlCheck::Incompatible { version };
        }

        info!(version = %version, "ipmctl version check passed");
        IpmctlCheck::Supported { version }
    }

    async fn ensure_ndctl(&self) -> Result<()> {
        let bin = &self.config.ndctl_bin;
        let present = *self
            .ndctl_present
            .get_or_init(|| async { self.executor.lookup_binary(bin) })
            .await;

        if present {
            Ok(())
        } else {
            Err(Error::NdctlMissing {
                binary: bin.clone(),
            })
        }
    }
}

impl std::fmt::Debug for CommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRunner")
            .field("config", &self.config)
            .field("ipmctl_check", &self.ipmctl_check.get())
            .field("ndctl_present", &self.ndctl_present.get())
            .finish()
    }
}

/// Restrict a command to one socket.
///
/// Goal commands take the socket flag straight after `-goal`; every other
/// command takes it at the end. `Any` leaves the command untouched.
pub fn socket_command(selector: SocketSelector, cmd: &ToolCommand) -> ToolCommand {
    let SocketSelector::Socket(id) = selector else {
        return cmd.clone();
    };

    let flag = ["-socket".to_string(), id.to_string()];
    let mut args = cmd.args.clone();
    match cmd.goal_position() {
        Some(pos) => {
            args.splice(pos + 1..pos + 1, flag);
        }
        None => args.extend(flag),
    }

    ToolCommand {
        tool: cmd.tool,
        args,
    }
}

/// Pull a four-component version (`NN.NN.NN.NNNN`) out of tool output.
pub fn extract_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|tok| tok.trim_matches(|c: char| !c.is_ascii_digit()))
        .find(|tok| {
            let parts: Vec<&str> = tok.split('.').collect();
            parts.len() == 4
                && parts
                    .iter()
                    .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
        })
        .map(str::to_string)
}

/// Build a transport fault for a command that exited unsuccessfully.
pub(crate) fn command_failed(cmd: &ToolCommand, out: &CommandOutput) -> Error {
    Error::CommandFailed {
        command: cmd.to_string(),
        stdout: out.stdout.trim().to_string(),
        reason: failure_reason(out),
    }
}

fn failure_reason(out: &CommandOutput) -> String {
    let stderr = out.stderr.trim();
    if stderr.is_empty() {
        "non-zero exit status".to_string()
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ScriptedExecutor;
    use assert_matches::assert_matches;

    const VERSION_OUT: &str =
        "Intel(R) Optane(TM) Persistent Memory Command Line Interface Version 02.00.00.3825\n";

    fn runner(exec: Arc<ScriptedExecutor>) -> CommandRunner {
        CommandRunner::new(
            exec,
            PmemConfig::default(),
            Arc::new(PmemMetrics::new().unwrap()),
        )
    }

    #[test]
    fn test_socket_command_appends_flag() {
        let cmd = ToolCommand::new(Tool::Ipmctl, &["show", "-o", "nvmxml", "-region"]);
        let out = socket_command(SocketSelector::Socket(1), &cmd);
        assert_eq!(out.to_string(), "ipmctl show -o nvmxml -region -socket 1");
    }

    #[test]
    fn test_socket_command_after_goal_flag() {
        let cmd = ToolCommand::new(
            Tool::Ipmctl,
            &["create", "-f", "-goal", "PersistentMemoryType=AppDirect"],
        );
        let out = socket_command(SocketSelector::Socket(0), &cmd);
        assert_eq!(
            out.to_string(),
            "ipmctl create -f -goal -socket 0 PersistentMemoryType=AppDirect"
        );
    }

    #[test]
    fn test_socket_command_any_is_noop() {
        let cmd = ToolCommand::new(Tool::Ipmctl, &["delete", "-f", "-goal"]);
        assert_eq!(socket_command(SocketSelector::Any, &cmd), cmd);
    }

    #[test]
    fn test_extract_version() {
        assert_eq!(extract_version(VERSION_OUT), Some("02.00.00.3825".to_string()));
        assert_eq!(
            extract_version("ipmctl version (02.00.00.3809)"),
            Some("02.00.00.3809".to_string())
        );
        assert_eq!(extract_version("version 2.0"), None);
        assert_eq!(extract_version(""), None);
    }

    #[tokio::test]
    async fn test_version_check_runs_once() {
        let exec = Arc::new(ScriptedExecutor::new().on_stdout("ipmctl version", VERSION_OUT));
        let runner = runner(exec.clone());
        let cmd = ToolCommand::new(Tool::Ipmctl, &["show", "-region"]);

        runner.run(&cmd).await.unwrap();
        runner.run(&cmd).await.unwrap();

        assert_eq!(exec.calls_matching("ipmctl version").len(), 1);
        assert_eq!(exec.calls_matching("ipmctl show").len(), 2);
    }

    #[tokio::test]
    async fn test_bad_version_cached_failure() {
        let exec = Arc::new(ScriptedExecutor::new().on_stdout(
            "ipmctl version",
            "Persistent Memory Command Line Interface Version 02.00.00.3816",
        ));
        let runner = runner(exec.clone());
        let cmd = ToolCommand::new(Tool::Ipmctl, &["show", "-region"]);

        assert_matches!(
            runner.run(&cmd).await,
            Err(Error::BadIpmctlVersion { ref version }) if version == "02.00.00.3816"
        );
        assert_matches!(runner.run(&cmd).await, Err(Error::BadIpmctlVersion { .. }));

        assert_eq!(exec.calls(), vec!["ipmctl version"]);
    }

    #[tokio::test]
    async fn test_new_runner_rechecks() {
        let exec = Arc::new(ScriptedExecutor::new().on_stdout("ipmctl version", VERSION_OUT));
        let cmd = ToolCommand::new(Tool::Ipmctl, &["show", "-region"]);

        runner(exec.clone()).run(&cmd).await.unwrap();
        runner(exec.clone()).run(&cmd).await.unwrap();

        assert_eq!(exec.calls_matching("ipmctl version").len(), 2);
    }

    #[tokio::test]
    async fn test_unparsable_version() {
        let exec = Arc::new(ScriptedExecutor::new().on_stdout("ipmctl version", "who knows"));
        let runner = runner(exec);
        let cmd = ToolCommand::new(Tool::Ipmctl, &["show", "-region"]);

        assert_matches!(
            runner.run(&cmd).await,
            Err(Error::IpmctlVersionUnparsable { .. })
        );
    }

    #[tokio::test]
    async fn test_ndctl_missing() {
        let exec = Arc::new(ScriptedExecutor::new().without_binary("ndctl"));
        let runner = runner(exec.clone());
        let cmd = ToolCommand::new(Tool::Ndctl, &["list", "-N"]);

        assert_matches!(runner.run(&cmd).await, Err(Error::NdctlMissing { .. }));
        assert_matches!(runner.run(&cmd).await, Err(Error::NdctlMissing { .. }));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_command_carries_stdout() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on_stdout("ipmctl version", VERSION_OUT)
                .on(
                    "ipmctl delete",
                    CommandOutput::failed("partial output", "goal locked"),
                ),
        );
        let runner = runner(exec);
        let cmd = ToolCommand::new(Tool::Ipmctl, &["delete", "-f", "-goal"]);

        let err = runner
            .run_socket_aware(SocketSelector::Socket(1), &cmd)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::CommandFailed { ref command, ref stdout, ref reason }
                if command == "ipmctl delete -f -goal -socket 1"
                    && stdout == "partial output"
                    && reason == "goal locked"
        );
    }
}
