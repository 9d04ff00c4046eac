//! Process-backed agent execution.
//!
//! The default agent implementation spawns an external command (an LLM CLI,
//! a script, anything executable), feeds it the task as JSON on stdin, and
//! parses a JSON result object from its stdout. Every failure mode (spawn
//! error, timeout, non-zero exit, unparseable output) is translated into a
//! `success = false` result, honoring the dispatcher contract.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Agent, AgentResult, AgentTask};

/// Default ceiling for one agent invocation.
const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;

/// Spawns `program [args..] <agent-type>` per task.
///
/// stdin: `{"task_id", "agent_type", "objective", "context", "priority"}`
/// stdout: `{"success": bool, "result": <any>, "error_message": <string?>}`
/// (only the last non-empty stdout line is parsed, so agents may log freely
/// above it).
pub struct CommandAgent {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

#[derive(Deserialize)]
struct WireResult {
    success: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error_message: Option<String>,
}

impl CommandAgent {
    pub fn new(program: &str, working_dir: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            working_dir,
            timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, task: &AgentTask) -> anyhow::Result<WireResult> {
        let payload = serde_json::to_string(task)?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(task.agent_type.as_str())
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                anyhow::anyhow!("agent timed out after {}s", self.timeout.as_secs())
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "agent exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("agent produced no output"))?;

        Ok(serde_json::from_str(line.trim())?)
    }
}

#[async_trait]
impl Agent for CommandAgent {
    async fn execute(&self, task: &AgentTask) -> AgentResult {
        match self.run(task).await {
            Ok(wire) if wire.success => AgentResult::ok(task.task_id, wire.result),
            Ok(wire) => AgentResult::failed(
                task.task_id,
                wire.error_message
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ),
            Err(e) => AgentResult::failed(task.task_id, e.to_string()),
        }
    }
}

/// Build one [`CommandAgent`] per registered agent type from a single
/// configured command, the common case for CLI-backed agents.
pub fn command_registry(
    program: &str,
    args: &[String],
    working_dir: &std::path::Path,
    timeout: Duration,
) -> super::AgentRegistry {
    use super::{AgentRegistry, AgentType};
    use std::sync::Arc;

    let mut registry = AgentRegistry::new();
    for agent_type in [
        AgentType::Planner,
        AgentType::BugSweeper,
        AgentType::Reviewer,
        AgentType::StrategySelector,
    ] {
        registry.register(
            agent_type,
            Arc::new(
                CommandAgent::new(program, working_dir.to_path_buf())
                    .with_args(args.to_vec())
                    .with_timeout(timeout),
            ),
        );
    }
    registry
}
