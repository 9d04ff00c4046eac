//! Stage sequencer: PLAN → STRATEGIZE → VALIDATE_APPLY.
//!
//! PLAN and STRATEGIZE each fan out two concurrent agent tasks and present a
//! single join point; VALIDATE_APPLY is strictly serialized. Terminal states
//! feed back into the outer loop, never into PLAN directly. No raw error
//! crosses a stage boundary: everything converts to a `(reason, context)`
//! pair here.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::agent::{AgentRegistry, AgentTask, AgentType};
use crate::cycle::state::{CycleState, reason};
use crate::dispatch::TaskDispatcher;
use crate::memory::ProjectMemory;
use crate::objective::{Objective, ObjectiveSource};
use crate::strategy::{CAPACITATION_REQUIRED, StrategyValidator};
use crate::ui::CycleUI;

/// Critical-path tasks outrank best-effort ones within a submission.
const PRIORITY_CRITICAL: i32 = 10;
const PRIORITY_BEST_EFFORT: i32 = 1;

/// Longest advisory note captured from a best-effort agent.
const ADVISORY_NOTE_MAX_CHARS: usize = 500;

/// Where one cycle's stage machine ended up.
#[derive(Debug)]
pub enum SequenceFlow {
    /// VALIDATE_APPLY succeeded; `state.validation` holds the outcome.
    Validated,
    /// Capacitation deferral: the stack now holds the capacitation objective
    /// above the original. Nothing touched the working tree.
    Deferred { capacitation: Objective },
    Failed { reason: String, context: String },
}

#[derive(Debug)]
pub struct SequenceReport {
    pub flow: SequenceFlow,
    pub state: CycleState,
}

pub struct StageSequencer {
    registry: Arc<AgentRegistry>,
    validator: Arc<dyn StrategyValidator>,
    project_dir: PathBuf,
    /// Attempt ceiling for VALIDATE_APPLY. A failed attempt still ends the
    /// phase; see the retry note in `run_validate_apply`.
    validation_retries: u32,
    ui: Option<Arc<CycleUI>>,
}

impl StageSequencer {
    pub fn new(
        registry: Arc<AgentRegistry>,
        validator: Arc<dyn StrategyValidator>,
        project_dir: PathBuf,
        validation_retries: u32,
    ) -> Self {
        Self {
            registry,
            validator,
            project_dir,
            validation_retries,
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

    /// Run one objective through the full stage machine.
    pub async fn run_cycle(
        &self,
        objective: &Objective,
        source: &mut ObjectiveSource,
        memory: &mut ProjectMemory,
        manifest_text: &str,
    ) -> SequenceReport {
        let mut state = CycleState::new(objective.clone());

        // PLAN
        if let Some(ref ui) = self.ui {
            ui.stage("PLAN");
        }
        match self.run_plan_stage(objective, memory, manifest_text).await {
            Ok(action_plan) => state.action_plan = Some(action_plan),
            Err((reason, context)) => {
                return SequenceReport {
                    flow: SequenceFlow::Failed { reason, context },
                    state,
                };
            }
        }

        // STRATEGIZE
        if let Some(ref ui) = self.ui {
            ui.stage("STRATEGIZE");
        }
        match self.run_strategize_stage(objective, memory, &mut state).await {
            Ok(strategy_key) => state.strategy_key = Some(strategy_key),
            Err((reason, context)) => {
                return SequenceReport {
                    flow: SequenceFlow::Failed { reason, context },
                    state,
                };
            }
        }

        // VALIDATE_APPLY
        if let Some(ref ui) = self.ui {
            ui.stage("VALIDATE_APPLY");
        }
        let flow = self.run_validate_apply(objective, source, &mut state).await;
        SequenceReport { flow, state }
    }

    /// Base context shared by the PLAN fan-out.
    fn build_base_context(
        &self,
        memory: &ProjectMemory,
        manifest_text: &str,
    ) -> Result<HashMap<String, String>, (String, String)> {
        let files = self.gather_file_context().map_err(|e| {
            (
                reason::INFORMATION_GATHERING_FAILED.to_string(),
                e.to_string(),
            )
        })?;

        let mut context = HashMap::new();
        context.insert("manifest".to_string(), manifest_text.to_string());
        context.insert("files".to_string(), files);
        context.insert("memory".to_string(), memory.summary());
        context.insert(
            "project_path".to_string(),
            self.project_dir.display().to_string(),
        );
        Ok(context)
    }

    /// Top-level entries plus the head of the README, when one exists.
    fn gather_file_context(&self) -> std::io::Result<String> {
        let mut lines = Vec::new();
        let mut entries: Vec<_> = fs::read_dir(&self.project_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        entries.sort();
        lines.push(entries.join(" "));

        for candidate in ["README.md", "README"] {
            let path = self.project_dir.join(candidate);
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                lines.push(content.chars().take(2000).collect());
                break;
            }
        }
        Ok(lines.join("\n"))
    }

    async fn run_plan_stage(
        &self,
        objective: &Objective,
        memory: &mut ProjectMemory,
        manifest_text: &str,
    ) -> Result<serde_json::Value, (String, String)> {
        let base_context = self.build_base_context(memory, manifest_text)?;

        let plan_task = AgentTask::new(AgentType::Planner, objective.text())
            .with_priority(PRIORITY_CRITICAL)
            .with_context(base_context.clone());
        let sweep_task = AgentTask::new(AgentType::BugSweeper, objective.text())
            .with_priority(PRIORITY_BEST_EFFORT)
            .with_context(base_context);
        let plan_id = plan_task.task_id;
        let sweep_id = sweep_task.task_id;

        let mut dispatcher = TaskDispatcher::new(self.registry.clone());
        dispatcher
            .submit(vec![plan_task, sweep_task])
            .await
            .map_err(|e| (reason::ASYNC_PIPELINE_ERROR.to_string(), e.to_string()))?;

        // The bug sweep is not on the critical path: its failure is logged,
        // its findings become advisory notes.
        match dispatcher.result_of(sweep_id) {
            Some(sweep) if sweep.success => {
                memory.add_advisory_note("bug_sweep", &summarize_payload(&sweep.result));
            }
            Some(sweep) => self.log_step(&format!(
                "bug sweep failed (non-critical): {}",
                sweep.error_message.as_deref().unwrap_or("unknown")
            )),
            None => {}
        }

        match dispatcher.result_of(plan_id) {
            Some(plan) if plan.success => Ok(plan.result.clone()),
            Some(plan) => Err((
                reason::PLAN_PHASE_FAILED.to_string(),
                plan.error_message
                    .clone()
                    .unwrap_or_else(|| "no result produced".to_string()),
            )),
            None => Err((
                reason::PLAN_PHASE_FAILED.to_string(),
                "no result produced".to_string(),
            )),
        }
    }

    async fn run_strategize_stage(
        &self,
        objective: &Objective,
        memory: &mut ProjectMemory,
        state: &mut CycleState,
    ) -> Result<String, (String, String)> {
        let action_plan = state.action_plan.as_ref().cloned().unwrap_or_default();

        let mut context = HashMap::new();
        context.insert(
            "patches".to_string(),
            action_plan
                .get("patches")
                .map(|p| p.to_string())
                .unwrap_or_default(),
        );
        context.insert("action_plan".to_string(), action_plan.to_string());
        context.insert("memory".to_string(), memory.summary());

        let review_task = AgentTask::new(AgentType::Reviewer, objective.text())
            .with_priority(PRIORITY_BEST_EFFORT)
            .with_context(context.clone());
        let select_task = AgentTask::new(AgentType::StrategySelector, objective.text())
            .with_priority(PRIORITY_CRITICAL)
            .with_context(context);
        let review_id = review_task.task_id;
        let select_id = select_task.task_id;

        let mut dispatcher = TaskDispatcher::new(self.registry.clone());
        dispatcher
            .submit(vec![review_task, select_task])
            .await
            .map_err(|e| (reason::ASYNC_PIPELINE_ERROR.to_string(), e.to_string()))?;

        // Review failures are warnings, never stage failures.
        match dispatcher.result_of(review_id) {
            Some(review) if review.success => {
                memory.add_advisory_note("review", &summarize_payload(&review.result));
            }
            Some(review) => self.log_step(&format!(
                "review failed (warning): {}",
                review.error_message.as_deref().unwrap_or("unknown")
            )),
            None => {}
        }

        match dispatcher.result_of(select_id) {
            Some(selected) if selected.success => {
                extract_strategy_key(&selected.result).ok_or_else(|| {
                    (
                        reason::STRATEGY_PHASE_FAILED.to_string(),
                        "strategy selector returned no strategy key".to_string(),
                    )
                })
            }
            Some(selected) => Err((
                reason::STRATEGY_PHASE_FAILED.to_string(),
                selected
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no result produced".to_string()),
            )),
            None => Err((
                reason::STRATEGY_PHASE_FAILED.to_string(),
                "no result produced".to_string(),
            )),
        }
    }

    /// Serialized validate/apply phase.
    ///
    /// The loop is bounded by `validation_retries`, but a failed attempt
    /// breaks out immediately: re-validating without re-selecting a strategy
    /// would replay the same decision, and extra attempts would multiply the
    /// per-objective failure records the degenerative-loop detector counts.
    async fn run_validate_apply(
        &self,
        objective: &Objective,
        source: &mut ObjectiveSource,
        state: &mut CycleState,
    ) -> SequenceFlow {
        let Some(strategy_key) = state.strategy_key.clone() else {
            return SequenceFlow::Failed {
                reason: reason::STRATEGY_PHASE_FAILED.to_string(),
                context: "no strategy key recorded".to_string(),
            };
        };
        let action_plan = state.action_plan.clone().unwrap_or_default();

        let max_attempts = self.validation_retries.max(1);
        let mut attempt = 0;
        while attempt < max_attempts {
            attempt += 1;

            if strategy_key == CAPACITATION_REQUIRED {
                // Deferral, not failure: the original objective goes back on
                // the stack, the capacitation objective lands on top of it.
                let capacitation = synthesize_capacitation(objective, state.action_plan.as_ref());
                source.push(objective.clone());
                source.push(capacitation.clone());
                self.log_step(&format!(
                    "capacitation required; deferred behind '{}'",
                    capacitation.text()
                ));
                return SequenceFlow::Deferred { capacitation };
            }

            let outcome = self.validator.validate(&strategy_key, &action_plan).await;
            state.validation = Some(outcome.clone());

            if outcome.success {
                return SequenceFlow::Validated;
            }

            self.log_step(&format!(
                "validation attempt {attempt} failed: {} ({})",
                outcome.reason, outcome.context
            ));
            break;
        }

        match &state.validation {
            Some(outcome) => SequenceFlow::Failed {
                reason: outcome.reason.clone(),
                context: outcome.context.clone(),
            },
            None => SequenceFlow::Failed {
                reason: reason::ASYNC_PIPELINE_ERROR.to_string(),
                context: "validation produced no outcome".to_string(),
            },
        }
    }
}

/// Capacitation objective derived from the plan analysis when present.
fn synthesize_capacitation(
    objective: &Objective,
    action_plan: Option<&serde_json::Value>,
) -> Objective {
    let analysis = action_plan
        .and_then(|plan| {
            plan.get("analysis")
                .or_else(|| plan.get("summary"))
                .and_then(|v| v.as_str())
        })
        .unwrap_or_else(|| objective.text());

    Objective::special(
        "capacitation",
        &format!("Acquire missing capability: {analysis}"),
    )
    .with_context_entry("origin", objective.text())
}

fn extract_strategy_key(value: &serde_json::Value) -> Option<String> {
    value
        .as_str()
        .map(str::to_string)
        .or_else(|| {
            value
                .get("strategy_key")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .filter(|key| !key.is_empty())
}

fn summarize_payload(value: &serde_json::Value) -> String {
    let text = match value.as_str() {
        Some(s) => s.to_string(),
        None => value.to_string(),
    };
    if text.chars().count() > ADVISORY_NOTE_MAX_CHARS {
        let truncated: String = text.chars().take(ADVISORY_NOTE_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        text
    }
}
