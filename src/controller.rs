//! Validation & Mutation Controller.
//!
//! Runs only after a validated cycle whose outcome reports a real
//! working-tree mutation, and strictly serialized: the working tree and
//! repository are a single shared resource, so no two cycles ever reach
//! this code concurrently (the runner holds exclusive access).

use std::path::PathBuf;

use anyhow::Result;

use crate::cycle::state::{CycleState, reason};
use crate::errors::CycleError;
use crate::manifest;
use crate::memory::ProjectMemory;
use crate::objective::Objective;
use crate::strategy::{SKIP_SANITY_TOOL, SanityOutcome, SanityToolRegistry, StrategyValidator};
use crate::tracker::GitWorkspace;
use crate::ui::CycleUI;
use std::sync::Arc;

/// Subject line limit for synthesized commit messages.
const COMMIT_SUBJECT_MAX_CHARS: usize = 72;

/// What the controller did with a validated mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationDecision {
    /// Sanity passed; changes staged and committed.
    Committed { commit_sha: String },
    /// Sanity passed but commit was rejected or failed (best-effort; logged).
    CommitFailed { detail: String },
    /// The strategy's sanity tool is the skip sentinel: validated and left
    /// uncommitted by design.
    SanityGateSkipped,
    /// Sanity failed; the working tree was rolled back.
    Regressed { reason: String, context: String },
}

pub struct MutationController {
    workspace: GitWorkspace,
    sanity_tools: SanityToolRegistry,
    project_dir: PathBuf,
    manifest_path: PathBuf,
    ui: Option<Arc<CycleUI>>,
}

impl MutationController {
    pub fn new(
        workspace: GitWorkspace,
        sanity_tools: SanityToolRegistry,
        project_dir: PathBuf,
        manifest_path: PathBuf,
    ) -> Self {
        Self {
            workspace,
            sanity_tools,
            project_dir,
            manifest_path,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<CycleUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn log_step(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    /// Finalize a validated mutation: sanity gate, then commit or rollback,
    /// then record the objective as completed.
    pub async fn finalize(
        &self,
        objective: &Objective,
        state: &CycleState,
        validator: &dyn StrategyValidator,
        memory: &mut ProjectMemory,
    ) -> Result<MutationDecision, CycleError> {
        let strategy_key = state
            .strategy_key
            .as_deref()
            .ok_or(CycleError::MissingState {
                what: "strategy key",
            })?;

        // 1. Sanity check. Tool errors count as failures, never escape.
        let tool_name = validator.sanity_tool_for(strategy_key);
        let sanity = self.run_sanity_tool(&tool_name).await;

        // 2. Regression: discard everything and hand the failure back.
        if !sanity.passed {
            self.log_step(&format!(
                "sanity check '{}' failed; rolling back",
                sanity.tool_name
            ));
            self.workspace.discard_all()?;
            return Ok(MutationDecision::Regressed {
                reason: reason::regression(&sanity.tool_name),
                context: sanity.details,
            });
        }

        // 3. Commit, unless the strategy opted out via the skip sentinel.
        // Commit failures are logged, not rolled back.
        let decision = if tool_name == SKIP_SANITY_TOOL {
            self.log_step("sanity gate skipped; leaving changes uncommitted");
            MutationDecision::SanityGateSkipped
        } else {
            self.commit_changes(objective, state)
        };

        // 4. Record completion regardless of commit outcome.
        let outcome_text = match &decision {
            MutationDecision::Committed { commit_sha } => {
                format!("applied and committed ({commit_sha})")
            }
            MutationDecision::CommitFailed { detail } => {
                format!("applied; commit failed ({detail})")
            }
            MutationDecision::SanityGateSkipped => "applied; commit skipped".to_string(),
            MutationDecision::Regressed { .. } => unreachable!("regression returns early"),
        };
        memory.add_completed_objective(objective, strategy_key, &outcome_text);

        Ok(decision)
    }

    async fn run_sanity_tool(&self, tool_name: &str) -> SanityOutcome {
        match self.sanity_tools.get(tool_name) {
            Some(tool) => match tool.execute().await {
                Ok(outcome) => outcome,
                Err(e) => SanityOutcome {
                    passed: false,
                    tool_name: tool_name.to_string(),
                    details: format!("sanity tool error: {e:#}"),
                },
            },
            None => SanityOutcome {
                passed: false,
                tool_name: tool_name.to_string(),
                details: "sanity tool not registered".to_string(),
            },
        }
    }

    fn commit_changes(&self, objective: &Objective, state: &CycleState) -> MutationDecision {
        // Keep the committed manifest in step with the mutated tree.
        if let Err(e) = manifest::write_manifest(&self.project_dir, &self.manifest_path) {
            self.log_step(&format!("manifest regeneration failed: {e:#}"));
        }

        let message = synthesize_commit_message(objective, state);

        if let Err(e) = self.workspace.add_all() {
            return MutationDecision::CommitFailed {
                detail: e.to_string(),
            };
        }
        match self.workspace.commit(&message) {
            Ok(outcome) if outcome.success => MutationDecision::Committed {
                commit_sha: outcome.output,
            },
            Ok(outcome) => {
                self.log_step(&format!("commit rejected: {}", outcome.output));
                MutationDecision::CommitFailed {
                    detail: outcome.output,
                }
            }
            Err(e) => {
                self.log_step(&format!("commit failed: {e}"));
                MutationDecision::CommitFailed {
                    detail: e.to_string(),
                }
            }
        }
    }
}

/// Commit message from the plan analysis and the objective.
fn synthesize_commit_message(objective: &Objective, state: &CycleState) -> String {
    let mut subject: String = objective.text().chars().take(COMMIT_SUBJECT_MAX_CHARS).collect();
    if objective.text().chars().count() > COMMIT_SUBJECT_MAX_CHARS {
        subject.push_str("...");
    }

    let mut message = format!("[tend] {subject}");
    if let Some(analysis) = state
        .action_plan
        .as_ref()
        .and_then(|plan| plan.get("analysis").or_else(|| plan.get("summary")))
        .and_then(|v| v.as_str())
    {
        message.push_str("\n\n");
        message.push_str(analysis);
    }
    if let Some(strategy_key) = state.strategy_key.as_deref() {
        message.push_str(&format!("\n\nstrategy: {strategy_key}"));
    }
    message
}
