//! The outer cycle loop.
//!
//! Pulls objectives from the source until it signals exhaustion (or the
//! configured cycle limit is reached), runs each through the stage sequencer
//! and, for validated mutations, the mutation controller, then routes the
//! outcome to the failure classifier or the learning hook. Cycles are
//! strictly sequential: one `CycleState` is live at a time and the working
//! tree is never touched by two cycles at once.
//!
//! Any error escaping a cycle is caught here, converted into a failure with
//! reason `UNHANDLED_CYCLE_EXCEPTION`, and the loop continues: an agent-side
//! defect never crashes the process.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;

use crate::config::Config;
use crate::controller::{MutationController, MutationDecision};
use crate::cycle::log::{CycleLog, CycleRecord};
use crate::cycle::sequencer::{SequenceFlow, StageSequencer};
use crate::cycle::state::{CycleOutcome, reason};
use crate::errors::CycleError;
use crate::failure::FailureClassifier;
use crate::learning::LearningHook;
use crate::manifest;
use crate::memory::ProjectMemory;
use crate::objective::{Objective, ObjectiveSource, SourceKind};
use crate::strategy::StrategyValidator;
use crate::ui::CycleUI;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: u64,
    pub successes: u64,
    pub deferrals: u64,
    pub failures: u64,
}

/// What one cycle produced, for logging and failure routing.
struct CycleReport {
    outcome: CycleOutcome,
    action_plan: Option<serde_json::Value>,
    strategy_key: Option<String>,
    commit_sha: Option<String>,
}

impl CycleReport {
    fn failure(reason: &str, context: String) -> Self {
        Self {
            outcome: CycleOutcome::Failure {
                reason: reason.to_string(),
                context,
            },
            action_plan: None,
            strategy_key: None,
            commit_sha: None,
        }
    }
}

pub struct CycleOrchestrator {
    config: Config,
    sequencer: StageSequencer,
    controller: MutationController,
    classifier: FailureClassifier,
    validator: Arc<dyn StrategyValidator>,
    source: ObjectiveSource,
    memory: ProjectMemory,
    cycle_log: CycleLog,
    learning: Arc<dyn LearningHook>,
    ui: Option<Arc<CycleUI>>,
    cycle_number: u64,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        sequencer: StageSequencer,
        controller: MutationController,
        classifier: FailureClassifier,
        validator: Arc<dyn StrategyValidator>,
        source: ObjectiveSource,
        learning: Arc<dyn LearningHook>,
    ) -> Result<Self> {
        let memory = ProjectMemory::load_or_default(config.memory_file.clone())?;
        let cycle_log = CycleLog::new(config.cycle_log_file.clone());
        // Numbering continues across runs.
        let cycle_number = cycle_log.last_cycle_number().unwrap_or(0);

        Ok(Self {
            config,
            sequencer,
            controller,
            classifier,
            validator,
            source,
            memory,
            cycle_log,
            learning,
            ui: None,
            cycle_number,
        })
    }

    pub fn with_ui(mut self, ui: Arc<CycleUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn memory(&self) -> &ProjectMemory {
        &self.memory
    }

    fn warn(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        } else if self.config.verbose {
            eprintln!("[tend] {msg}");
        }
    }

    /// Drive cycles until the objective source is exhausted or the configured
    /// cycle limit is reached.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            if let Some(max) = self.config.max_cycles
                && summary.cycles >= max
            {
                break;
            }

            let Some((objective, kind)) = self.source.next().await else {
                break;
            };
            if kind == SourceKind::QueueTransfer {
                self.warn("objective transferred from external queue");
            }

            self.cycle_number += 1;
            summary.cycles += 1;
            if let Some(ref ui) = self.ui {
                ui.start_cycle(self.cycle_number, objective.text());
            }

            let start_time = Utc::now();
            let clock = Instant::now();

            // Top-level catch-all: the loop itself never dies on a cycle
            // defect.
            let report = match self.run_one_cycle(&objective).await {
                Ok(report) => report,
                Err(e) => {
                    CycleReport::failure(reason::UNHANDLED_CYCLE_EXCEPTION, format!("{e:#}"))
                }
            };
            let execution_time = clock.elapsed();

            self.settle_cycle(&objective, &report, execution_time, &mut summary);

            let (outcome_reason, outcome_context) = match &report.outcome {
                CycleOutcome::Failure { reason, context } => {
                    (reason.clone(), context.clone())
                }
                _ => (String::new(), String::new()),
            };
            let record = CycleRecord {
                cycle_number: self.cycle_number,
                objective: objective.text().to_string(),
                outcome: report.outcome.label().to_string(),
                duration_seconds: execution_time.as_secs_f64(),
                strategy_key: report.strategy_key.clone().unwrap_or_default(),
                start_time,
                end_time: Utc::now(),
                reason: outcome_reason,
                context: outcome_context,
            };
            if let Err(e) = self.cycle_log.append(&record) {
                self.warn(&format!("failed to append cycle record: {e:#}"));
            }
            if let Err(e) = self.memory.save() {
                self.warn(&format!("failed to persist memory: {e:#}"));
            }

            if self.config.cycle_delay > Duration::ZERO {
                tokio::time::sleep(self.config.cycle_delay).await;
            }
        }

        if let Some(ref ui) = self.ui {
            ui.finish();
        }
        Ok(summary)
    }

    /// Route one finished cycle into UI, learning hook, and, for failures,
    /// the classifier.
    fn settle_cycle(
        &mut self,
        objective: &Objective,
        report: &CycleReport,
        execution_time: Duration,
        summary: &mut RunSummary,
    ) {
        match &report.outcome {
            CycleOutcome::Success { mutated, .. } => {
                summary.successes += 1;
                if let Some(ref ui) = self.ui {
                    match (&report.commit_sha, mutated) {
                        (Some(sha), _) => ui.cycle_committed(objective.text(), sha),
                        (None, true) => {
                            ui.cycle_success_no_commit(objective.text(), "applied, no commit")
                        }
                        (None, false) => {
                            ui.cycle_success_no_commit(objective.text(), "nothing to apply")
                        }
                    }
                }
                self.learning
                    .learn_from_execution(objective.text(), true, None, execution_time);
            }
            CycleOutcome::Deferred {
                capacitation_objective,
            } => {
                summary.deferrals += 1;
                if let Some(ref ui) = self.ui {
                    ui.cycle_deferred(objective.text(), capacitation_objective);
                }
                self.learning
                    .learn_from_execution(objective.text(), true, None, execution_time);
            }
            CycleOutcome::Failure {
                reason: failure_reason,
                context,
            } => {
                summary.failures += 1;
                if let Some(ref ui) = self.ui {
                    ui.cycle_failed(
                        objective.text(),
                        failure_reason,
                        reason::is_regression(failure_reason),
                    );
                }
                // The classifier records the failure and fires the hook.
                self.classifier.classify(
                    objective,
                    failure_reason,
                    context,
                    report.action_plan.as_ref(),
                    &mut self.memory,
                    &mut self.source,
                    self.learning.as_ref(),
                    execution_time,
                );
            }
        }
    }

    async fn run_one_cycle(&mut self, objective: &Objective) -> Result<CycleReport, CycleError> {
        let manifest_text = match manifest::write_manifest(
            &self.config.project_dir,
            &self.config.manifest_file,
        ) {
            Ok(text) => text,
            Err(e) => {
                return Ok(CycleReport::failure(
                    reason::MANIFEST_GENERATION_FAILED,
                    format!("{e:#}"),
                ));
            }
        };

        let sequence = self
            .sequencer
            .run_cycle(objective, &mut self.source, &mut self.memory, &manifest_text)
            .await;
        let action_plan = sequence.state.action_plan.clone();
        let strategy_key = sequence.state.strategy_key.clone();

        match sequence.flow {
            SequenceFlow::Failed { reason, context } => Ok(CycleReport {
                outcome: CycleOutcome::Failure { reason, context },
                action_plan,
                strategy_key,
                commit_sha: None,
            }),
            SequenceFlow::Deferred { capacitation } => Ok(CycleReport {
                outcome: CycleOutcome::Deferred {
                    capacitation_objective: capacitation.text().to_string(),
                },
                action_plan,
                strategy_key,
                commit_sha: None,
            }),
            SequenceFlow::Validated => {
                let validation =
                    sequence
                        .state
                        .validation
                        .as_ref()
                        .ok_or(CycleError::MissingState {
                            what: "validation outcome",
                        })?;

                // "Validated, nothing to apply" short-circuits the controller.
                if !validation.applied {
                    return Ok(CycleReport {
                        outcome: CycleOutcome::Success {
                            strategy_key: strategy_key.clone().unwrap_or_default(),
                            mutated: false,
                        },
                        action_plan,
                        strategy_key,
                        commit_sha: None,
                    });
                }

                let decision = self
                    .controller
                    .finalize(
                        objective,
                        &sequence.state,
                        self.validator.as_ref(),
                        &mut self.memory,
                    )
                    .await?;

                let (outcome, commit_sha) = match decision {
                    MutationDecision::Committed { commit_sha } => (
                        CycleOutcome::Success {
                            strategy_key: strategy_key.clone().unwrap_or_default(),
                            mutated: true,
                        },
                        Some(commit_sha),
                    ),
                    MutationDecision::CommitFailed { detail } => {
                        self.warn(&format!("commit failed (best-effort): {detail}"));
                        (
                            CycleOutcome::Success {
                                strategy_key: strategy_key.clone().unwrap_or_default(),
                                mutated: true,
                            },
                            None,
                        )
                    }
                    MutationDecision::SanityGateSkipped => (
                        CycleOutcome::Success {
                            strategy_key: strategy_key.clone().unwrap_or_default(),
                            mutated: true,
                        },
                        None,
                    ),
                    MutationDecision::Regressed { reason, context } => {
                        (CycleOutcome::Failure { reason, context }, None)
                    }
                };

                Ok(CycleReport {
                    outcome,
                    action_plan,
                    strategy_key,
                    commit_sha,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentRegistry, AgentResult, AgentTask, AgentType};
    use crate::learning::NullLearningHook;
    use crate::objective::ObjectiveQueue;
    use crate::strategy::{SanityToolRegistry, ValidationOutcome};
    use crate::tracker::GitWorkspace;
    use async_trait::async_trait;
    use git2::Repository;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct StubAgent {
        payload: serde_json::Value,
        succeed: bool,
    }

    #[async_trait]
    impl Agent for StubAgent {
        async fn execute(&self, task: &AgentTask) -> AgentResult {
            if self.succeed {
                AgentResult::ok(task.task_id, self.payload.clone())
            } else {
                AgentResult::failed(task.task_id, "stub failure")
            }
        }
    }

    /// Validator that mutates the working tree on validate, so the sanity
    /// gate has something real to keep or roll back.
    struct MutatingValidator {
        dir: std::path::PathBuf,
        succeed: bool,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl StrategyValidator for MutatingValidator {
        async fn validate(&self, _: &str, _: &serde_json::Value) -> ValidationOutcome {
            *self.calls.lock().unwrap() += 1;
            if self.succeed {
                fs::write(self.dir.join("patched.txt"), "patched\n").unwrap();
                ValidationOutcome::applied("APPLIED_AND_VALIDATED", "one patch applied")
            } else {
                ValidationOutcome::failed("PATCH_REJECTED", "hunk mismatch")
            }
        }
    }

    fn init_repo(dir: &Path) -> GitWorkspace {
        let repo = Repository::init(dir).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@test.com").unwrap();
        drop(config);
        let workspace = GitWorkspace::open(dir).unwrap();
        fs::write(dir.join("base.txt"), "base\n").unwrap();
        workspace.add_all().unwrap();
        workspace.commit("init").unwrap();
        workspace
    }

    fn full_registry(plan_ok: bool, strategy: &str) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(
            AgentType::Planner,
            Arc::new(StubAgent {
                payload: serde_json::json!({"analysis": "patch it", "patches": ["p1"]}),
                succeed: plan_ok,
            }),
        );
        registry.register(
            AgentType::BugSweeper,
            Arc::new(StubAgent {
                payload: serde_json::json!("nothing suspicious"),
                succeed: true,
            }),
        );
        registry.register(
            AgentType::Reviewer,
            Arc::new(StubAgent {
                payload: serde_json::json!("fine"),
                succeed: true,
            }),
        );
        registry.register(
            AgentType::StrategySelector,
            Arc::new(StubAgent {
                payload: serde_json::json!(strategy),
                succeed: true,
            }),
        );
        Arc::new(registry)
    }

    fn orchestrator(
        dir: &Path,
        registry: Arc<AgentRegistry>,
        validator: Arc<dyn StrategyValidator>,
        sanity_command: &str,
        objectives: Vec<Objective>,
        max_cycles: Option<u64>,
    ) -> CycleOrchestrator {
        let mut config = Config::new(dir.to_path_buf(), false).unwrap();
        config.max_cycles = max_cycles;
        config.ensure_directories().unwrap();

        let sequencer = StageSequencer::new(
            registry,
            validator.clone(),
            config.project_dir.clone(),
            config.validation_retries,
        );
        let workspace = GitWorkspace::open(&config.project_dir).unwrap();
        let controller = MutationController::new(
            workspace,
            SanityToolRegistry::with_defaults(&config.project_dir, sanity_command),
            config.project_dir.clone(),
            config.manifest_file.clone(),
        );
        let classifier = FailureClassifier::new(
            config.degenerative_threshold,
            config.correctable_reasons.clone(),
        );

        let queue = ObjectiveQueue::new();
        for objective in objectives {
            queue.push(objective);
        }
        let source = ObjectiveSource::new(queue);

        CycleOrchestrator::new(
            config,
            sequencer,
            controller,
            classifier,
            validator,
            source,
            Arc::new(NullLearningHook),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn successful_cycle_commits_and_logs_success_row() {
        let dir = tempdir().unwrap();
        let workspace = init_repo(dir.path());
        let sha_before = workspace.head_sha().unwrap();

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: true,
            calls: Mutex::new(0),
        });
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(true, "apply_patch"),
            validator,
            "true",
            vec![Objective::task("fix bug X")],
            None,
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(
            summary,
            RunSummary {
                cycles: 1,
                successes: 1,
                deferrals: 0,
                failures: 0
            }
        );

        // A commit landed.
        assert_ne!(workspace.head_sha().unwrap(), sha_before);
        // Memory recorded one completed objective.
        assert_eq!(orchestrator.memory().completed().len(), 1);
        // The cycle log has a success row for cycle 1.
        let records = CycleLog::new(dir.path().join(".tend/cycles.log"))
            .records()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cycle_number, 1);
        assert_eq!(records[0].outcome, "success");
        assert_eq!(records[0].strategy_key, "apply_patch");
    }

    #[tokio::test]
    async fn red_sanity_rolls_back_and_records_regression_failure() {
        let dir = tempdir().unwrap();
        let workspace = init_repo(dir.path());
        let sha_before = workspace.head_sha().unwrap();

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: true,
            calls: Mutex::new(0),
        });
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(true, "apply_patch"),
            validator,
            "exit 1",
            vec![Objective::task("fix bug X")],
            None,
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.failures, 1);

        // Rollback: no commit, mutation gone.
        assert_eq!(workspace.head_sha().unwrap(), sha_before);
        assert!(!dir.path().join("patched.txt").exists());
        // Failure record with the regression reason.
        assert!(
            orchestrator
                .memory()
                .failures()
                .iter()
                .any(|r| r.reason == "REGRESSION_DETECTED_BY_RUN_TESTS")
        );
        assert!(orchestrator.memory().completed().is_empty());
    }

    #[tokio::test]
    async fn cycle_counter_increments_for_immediate_plan_failures() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: true,
            calls: Mutex::new(0),
        });
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(false, "apply_patch"),
            validator,
            "true",
            vec![
                Objective::task("first"),
                Objective::task("second"),
                Objective::task("third"),
            ],
            None,
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.cycles, 3);
        assert_eq!(summary.failures, 3);

        let records = CycleLog::new(dir.path().join(".tend/cycles.log"))
            .records()
            .unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(records.iter().all(|r| r.reason == "PLAN_PHASE_FAILED"));
    }

    #[tokio::test]
    async fn capacitation_defers_and_next_cycle_pops_capacitation_first() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: true,
            calls: Mutex::new(0),
        });
        // One cycle only: the deferral must leave the stack populated.
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(true, crate::strategy::CAPACITATION_REQUIRED),
            validator.clone(),
            "true",
            vec![Objective::task("fix bug X")],
            Some(1),
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.deferrals, 1);

        // No sanity run, no commit attempt, no validation call.
        assert_eq!(*validator.calls.lock().unwrap(), 0);
        // Stack top-to-bottom: capacitation above the original.
        let stack = orchestrator.source.stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[1].task_type(), "capacitation");
        assert_eq!(stack[0].text(), "fix bug X");
    }

    #[tokio::test]
    async fn degenerative_loop_suppresses_endless_retries() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: false,
            calls: Mutex::new(0),
        });
        // Same objective requeued by an analyst would loop forever without
        // the loop breaker; here failures simply repeat via the queue.
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(true, "apply_patch"),
            validator,
            "true",
            vec![
                Objective::task("fix bug X"),
                Objective::task("fix bug X"),
                Objective::task("fix bug X"),
                Objective::task("fix bug X"),
            ],
            None,
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.failures, 4);

        // The third identical failure trips the breaker and logs it.
        let detections = orchestrator
            .memory()
            .failures()
            .iter()
            .filter(|r| r.reason == "DEGENERATIVE_LOOP_DETECTED")
            .count();
        assert!(detections >= 1);
        // Nothing was pushed back on the stack (no optimizer configured).
        assert!(orchestrator.source.stack().is_empty());
    }

    #[tokio::test]
    async fn max_cycles_bounds_the_run() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let validator = Arc::new(MutatingValidator {
            dir: dir.path().to_path_buf(),
            succeed: true,
            calls: Mutex::new(0),
        });
        let mut orchestrator = orchestrator(
            dir.path(),
            full_registry(false, "apply_patch"),
            validator,
            "true",
            vec![Objective::task("a"), Objective::task("b"), Objective::task("c")],
            Some(2),
        );

        let summary = orchestrator.run().await.unwrap();
        assert_eq!(summary.cycles, 2);
        // The third objective is still queued for a later run.
        assert_eq!(orchestrator.source.queue().len(), 1);
    }

    #[tokio::test]
    async fn cycle_numbering_resumes_from_previous_runs() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let make = |objectives: Vec<Objective>| {
            let validator = Arc::new(MutatingValidator {
                dir: dir.path().to_path_buf(),
                succeed: false,
                calls: Mutex::new(0),
            });
            orchestrator(
                dir.path(),
                full_registry(false, "apply_patch"),
                validator,
                "true",
                objectives,
                None,
            )
        };

        make(vec![Objective::task("a")]).run().await.unwrap();
        make(vec![Objective::task("b")]).run().await.unwrap();

        let records = CycleLog::new(dir.path().join(".tend/cycles.log"))
            .records()
            .unwrap();
        let numbers: Vec<u64> = records.iter().map(|r| r.cycle_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }
}
