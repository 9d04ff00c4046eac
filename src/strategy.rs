//! Strategy validation and sanity-check tooling.
//!
//! The STRATEGIZE stage picks a strategy key; the VALIDATE_APPLY phase runs
//! the matching validation procedure through [`StrategyValidator`]. After a
//! validated mutation, the controller gates the commit on the sanity tool
//! bound to that strategy (default: the test-suite runner).

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Sentinel strategy key: the selector declares the system not yet capable
/// of acting on the objective, deferring it behind a capacitation objective.
pub const CAPACITATION_REQUIRED: &str = "CAPACITATION_REQUIRED";

/// Sentinel sanity tool: passes trivially and suppresses the commit step.
pub const SKIP_SANITY_TOOL: &str = "skip";

/// Default sanity tool bound to strategies that do not override it.
pub const DEFAULT_SANITY_TOOL: &str = "run_tests";

/// Outcome of one strategy-validation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    pub reason: String,
    pub context: String,
    /// Whether the working tree was actually mutated. A successful
    /// validation with `applied = false` ("validated, nothing to apply")
    /// short-circuits the mutation controller.
    #[serde(default)]
    pub applied: bool,
}

impl ValidationOutcome {
    pub fn applied(reason: &str, context: &str) -> Self {
        Self {
            success: true,
            reason: reason.to_string(),
            context: context.to_string(),
            applied: true,
        }
    }

    pub fn clean(reason: &str, context: &str) -> Self {
        Self {
            success: true,
            reason: reason.to_string(),
            context: context.to_string(),
            applied: false,
        }
    }

    pub fn failed(reason: &str, context: &str) -> Self {
        Self {
            success: false,
            reason: reason.to_string(),
            context: context.to_string(),
            applied: false,
        }
    }
}

/// The validation/application procedure for a chosen strategy. Opaque to the
/// orchestrator beyond this signature.
#[async_trait]
pub trait StrategyValidator: Send + Sync {
    async fn validate(
        &self,
        strategy_key: &str,
        action_plan: &serde_json::Value,
    ) -> ValidationOutcome;

    /// Name of the sanity tool bound to the given strategy.
    fn sanity_tool_for(&self, _strategy_key: &str) -> String {
        DEFAULT_SANITY_TOOL.to_string()
    }
}

/// Result of a sanity-check execution.
#[derive(Debug, Clone)]
pub struct SanityOutcome {
    pub passed: bool,
    pub tool_name: String,
    pub details: String,
}

/// A post-application verification step gating commit vs. rollback.
#[async_trait]
pub trait SanityTool: Send + Sync {
    fn name(&self) -> &str;

    /// Errors are caught by the controller and treated as `passed = false`.
    async fn execute(&self) -> anyhow::Result<SanityOutcome>;
}

#[derive(Default)]
pub struct SanityToolRegistry {
    tools: HashMap<String, Arc<dyn SanityTool>>,
}

impl SanityToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-ins: `run_tests` wrapping the configured test
    /// command, and the `skip` sentinel.
    pub fn with_defaults(working_dir: &std::path::Path, test_command: &str) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CommandSanityTool::new(
            DEFAULT_SANITY_TOOL,
            test_command,
            working_dir.to_path_buf(),
        )));
        registry.register(Arc::new(SkipSanityTool));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn SanityTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SanityTool>> {
        self.tools.get(name).cloned()
    }
}

/// Runs a shell command against the working tree; a non-zero exit fails the
/// sanity check.
pub struct CommandSanityTool {
    name: String,
    command: String,
    working_dir: PathBuf,
    timeout: Duration,
}

impl CommandSanityTool {
    pub fn new(name: &str, command: &str, working_dir: PathBuf) -> Self {
        Self {
            name: name.to_string(),
            command: command.to_string(),
            working_dir,
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Last few lines of combined output, enough for a failure record.
    fn tail(output: &std::process::Output) -> String {
        let combined = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let lines: Vec<&str> = combined.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(10);
        lines[start..].join("\n")
    }
}

#[async_trait]
impl SanityTool for CommandSanityTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> anyhow::Result<SanityOutcome> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("sh")
                .arg("-c")
                .arg(&self.command)
                .current_dir(&self.working_dir)
                .stdin(Stdio::null())
                .output(),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "sanity command '{}' timed out after {}s",
                self.command,
                self.timeout.as_secs()
            )
        })??;

        Ok(SanityOutcome {
            passed: output.status.success(),
            tool_name: self.name.clone(),
            details: Self::tail(&output),
        })
    }
}

/// The explicit skip sentinel: passes without inspecting anything.
pub struct SkipSanityTool;

#[async_trait]
impl SanityTool for SkipSanityTool {
    fn name(&self) -> &str {
        SKIP_SANITY_TOOL
    }

    async fn execute(&self) -> anyhow::Result<SanityOutcome> {
        Ok(SanityOutcome {
            passed: true,
            tool_name: SKIP_SANITY_TOOL.to_string(),
            details: "sanity check skipped".to_string(),
        })
    }
}

/// Process-backed strategy validator: spawns a configured command with
/// `{"strategy_key", "action_plan"}` on stdin and parses a
/// [`ValidationOutcome`] JSON object from the last stdout line.
pub struct CommandStrategyValidator {
    program: String,
    args: Vec<String>,
    working_dir: PathBuf,
    sanity_tools: HashMap<String, String>,
    timeout: Duration,
}

impl CommandStrategyValidator {
    pub fn new(program: &str, working_dir: PathBuf) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            working_dir,
            sanity_tools: HashMap::new(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Bind a strategy key to a sanity tool name.
    pub fn bind_sanity_tool(mut self, strategy_key: &str, tool_name: &str) -> Self {
        self.sanity_tools
            .insert(strategy_key.to_string(), tool_name.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(
        &self,
        strategy_key: &str,
        action_plan: &serde_json::Value,
    ) -> anyhow::Result<ValidationOutcome> {
        let payload = serde_json::json!({
            "strategy_key": strategy_key,
            "action_plan": action_plan,
        })
        .to_string();

        let mut child = Command::new(&self.program)
            .args(&self.args)
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
            .map_err(|_| anyhow::anyhow!("validator timed out after {}s", self.timeout.as_secs()))??;

        if !output.status.success() {
            anyhow::bail!(
                "validator exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("validator produced no output"))?;

        Ok(serde_json::from_str(line.trim())?)
    }
}

#[async_trait]
impl StrategyValidator for CommandStrategyValidator {
    async fn validate(
        &self,
        strategy_key: &str,
        action_plan: &serde_json::Value,
    ) -> ValidationOutcome {
        match self.run(strategy_key, action_plan).await {
            Ok(outcome) => outcome,
            Err(e) => ValidationOutcome::failed("VALIDATOR_EXECUTION_FAILED", &e.to_string()),
        }
    }

    fn sanity_tool_for(&self, strategy_key: &str) -> String {
        self.sanity_tools
            .get(strategy_key)
            .cloned()
            .unwrap_or_else(|| DEFAULT_SANITY_TOOL.to_string())
    }
}
