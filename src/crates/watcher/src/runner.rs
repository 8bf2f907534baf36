//! Agent invocation.
//!
//! The watcher never reads an agent's answer from the invocation itself -
//! agents respond by publishing new topic messages, which flow back through
//! the subscription like everything else. An invocation only succeeds or
//! fails.

use crate::error::{WatcherError, WatcherResult};
use async_trait::async_trait;
use knowmarket_protocol::AgentRole;
use log::debug;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn invoke(&self, role: AgentRole, prompt: &str) -> WatcherResult<()>;
}

/// Runs agents as one-shot child processes:
/// `<command> agent --agent <role> --message <prompt>`.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: String,
}

impl ProcessRunner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl AgentRunner for ProcessRunner {
    async fn invoke(&self, role: AgentRole, prompt: &str) -> WatcherResult<()> {
        debug!("spawning agent process: command={}, role={role}", self.command);
        let output = Command::new(&self.command)
            .arg("agent")
            .arg("--agent")
            .arg(role.as_str())
            .arg("--message")
            .arg(prompt)
            .stdin(Stdio::null())
            // The dispatcher drops this future on timeout; the child must
            // not outlive it.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                WatcherError::Invoke(format!("failed to spawn {}: {e}", self.command))
            })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.chars().take(200).collect();
        Err(WatcherError::Invoke(format!(
            "{} exited with {}: {excerpt}",
            self.command, output.status
        )))
    }
}
