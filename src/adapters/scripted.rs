//! Scripted Executor Adapter
//!
//! An in-memory `CommandExecutor` that replays canned tool output. Used by
//! tests and dry runs against captured output from real hardware.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::ports::{CommandExecutor, CommandOutput};
use crate::error::Result;

/// Canned replies for commands starting with a prefix.
#[derive(Debug)]
struct Script {
    prefix: String,
    replies: VecDeque<CommandOutput>,
}

/// Executor that answers from a script and records every invocation.
///
/// Replies are matched on the longest registered prefix of the full command
/// line (`program arg1 arg2 ...`). Replies queued for a prefix are consumed
/// in order; the last one is repeated once the queue runs dry. Commands with
/// no matching prefix succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
}

impl ScriptedExecutor {
    /// Create an executor with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for commands starting with `prefix`.
    pub fn on(self, prefix: impl Into<String>, output: CommandOutput) -> Self {
        let prefix = prefix.into();
        {
            let mut scripts = self.scripts.lock();
            match scripts.iter_mut().find(|s| s.prefix == prefix) {
                Some(script) => script.replies.push_back(output),
                None => scripts.push(Script {
                    prefix,
                    replies: VecDeque::from([output]),
                }),
            }
        }
        self
    }

    /// Queue a successful reply with the given stdout.
    pub fn on_stdout(self, prefix: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.on(prefix, CommandOutput::ok(stdout))
    }

    /// Make `program` unresolvable through `lookup_binary`.
    pub fn without_binary(self, program: impl Into<String>) -> Self {
        self.missing.lock().insert(program.into());
        self
    }

    /// Every command line executed so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Executed command lines starting with `prefix`.
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn reply_for(&self, line: &str) -> CommandOutput {
        let mut scripts = self.scripts.lock();
        let script = scripts
            .iter_mut()
            .filter(|s| line.starts_with(&s.prefix))
            .max_by_key(|s| s.prefix.len());

        match script {
            Some(script) if script.replies.len() > 1 => {
                script.replies.pop_front().unwrap_or_default()
            }
            Some(script) => script.replies.front().cloned().unwrap_or_default(),
            None => CommandOutput::ok(""),
        }
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }

        let reply = self.reply_for(&line);
        self.calls.lock().push(line);
        Ok(reply)
    }

    fn lookup_binary(&self, program: &str) -> bool {
        !self.missing.lock().contains(program)
    }
}
