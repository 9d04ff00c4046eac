//! Failure classification and degenerative-loop breaking.
//!
//! Every FAILURE transition lands here: the failure is recorded, the
//! learning hook fires, and the classifier decides between breaking a
//! degenerative loop (prompt optimization), scheduling a corrective
//! follow-up (error analysis), or recording the failure and moving on.
//! The system prefers recording and rerouting over surfacing hard errors;
//! only the degenerative-loop path abandons an objective.

use std::sync::Arc;
use std::time::Duration;

use crate::cycle::state::reason;
use crate::learning::LearningHook;
use crate::memory::ProjectMemory;
use crate::objective::{Objective, ObjectiveSource};
use crate::ui::CycleUI;

/// Rewrites a repeatedly failing objective using its failure context.
pub trait PromptOptimizer: Send + Sync {
    fn rewrite(&self, objective: &Objective, reason: &str, context: &str) -> Option<Objective>;
}

/// Proposes a corrective follow-up objective from a failure.
pub trait ErrorAnalyst: Send + Sync {
    fn propose_correction(
        &self,
        objective: &Objective,
        reason: &str,
        context: &str,
        action_plan: Option<&serde_json::Value>,
    ) -> Option<Objective>;
}

/// Which path the classifier took for one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureRoute {
    /// Degenerative loop detected; `rewritten` says whether the optimizer
    /// produced a replacement objective (otherwise the objective is
    /// abandoned after logging).
    LoopBroken { rewritten: bool },
    /// Correction pushed ahead of the re-queued original.
    CorrectionScheduled,
    /// Reason was correctable but no analyst (or no proposal) was available.
    CorrectionUnavailable,
    /// Not correctable: recorded, nothing else to do.
    Recorded,
}

pub struct FailureClassifier {
    degenerative_threshold: u32,
    correctable_reasons: Vec<String>,
    optimizer: Option<Arc<dyn PromptOptimizer>>,
    analyst: Option<Arc<dyn ErrorAnalyst>>,
    ui: Option<Arc<CycleUI>>,
}

impl FailureClassifier {
    pub fn new(degenerative_threshold: u32, correctable_reasons: Vec<String>) -> Self {
        Self {
            degenerative_threshold,
            correctable_reasons,
            optimizer: None,
            analyst: None,
            ui: None,
        }
    }

    pub fn with_optimizer(mut self, optimizer: Arc<dyn PromptOptimizer>) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    pub fn with_analyst(mut self, analyst: Arc<dyn ErrorAnalyst>) -> Self {
        self.analyst = Some(analyst);
        self
    }

    pub fn with_ui(mut self, ui: Arc<CycleUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn warn(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    /// Handle one cycle failure end-to-end.
    #[allow(clippy::too_many_arguments)]
    pub fn classify(
        &self,
        objective: &Objective,
        failure_reason: &str,
        context: &str,
        action_plan: Option<&serde_json::Value>,
        memory: &mut ProjectMemory,
        source: &mut ObjectiveSource,
        learning: &dyn LearningHook,
        execution_time: Duration,
    ) -> FailureRoute {
        memory.add_failed_objective(objective, failure_reason, context);
        learning.learn_from_execution(
            objective.text(),
            false,
            Some(failure_reason),
            execution_time,
        );

        // Degenerate-loop test: the well-known reasons plus this cycle's own.
        let mut candidates: Vec<&str> = reason::well_known().to_vec();
        if !candidates.contains(&failure_reason) {
            candidates.push(failure_reason);
        }
        for candidate in candidates {
            if memory.has_degenerative_failure_pattern(
                objective.text(),
                candidate,
                self.degenerative_threshold,
            ) {
                return self.break_loop(objective, candidate, context, memory, source);
            }
        }

        // Correctable failures get an error-analysis pass.
        if self.is_correctable(failure_reason) {
            if let Some(ref analyst) = self.analyst {
                if let Some(corrective) =
                    analyst.propose_correction(objective, failure_reason, context, action_plan)
                {
                    // Original retried after the correction runs.
                    source.push(objective.clone());
                    source.push(corrective);
                    return FailureRoute::CorrectionScheduled;
                }
                self.warn(&format!(
                    "error analyst proposed no correction for '{}'",
                    objective.text()
                ));
            } else {
                self.warn("error analyst unavailable; failure recorded only");
            }
            return FailureRoute::CorrectionUnavailable;
        }

        FailureRoute::Recorded
    }

    /// Degenerative-loop path: log the detection, then try to rewrite the
    /// objective. Without an optimizer (or a rewrite) the objective is
    /// abandoned; this is the only path that permanently drops work.
    fn break_loop(
        &self,
        objective: &Objective,
        repeated_reason: &str,
        context: &str,
        memory: &mut ProjectMemory,
        source: &mut ObjectiveSource,
    ) -> FailureRoute {
        memory.add_failed_objective(
            objective,
            reason::DEGENERATIVE_LOOP_DETECTED,
            &format!("repeated reason: {repeated_reason}"),
        );
        self.warn(&format!(
            "degenerative loop on '{}' ({repeated_reason} x{})",
            objective.text(),
            self.degenerative_threshold
        ));

        if let Some(ref optimizer) = self.optimizer {
            if let Some(rewritten) = optimizer.rewrite(objective, repeated_reason, context) {
                source.push(rewritten);
                return FailureRoute::LoopBroken { rewritten: true };
            }
            self.warn("prompt optimizer produced no rewrite; objective abandoned");
        } else {
            self.warn("prompt optimizer unavailable; objective abandoned");
        }
        FailureRoute::LoopBroken { rewritten: false }
    }

    fn is_correctable(&self, failure_reason: &str) -> bool {
        self.correctable_reasons
            .iter()
            .any(|r| r == failure_reason)
            || reason::is_regression(failure_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::NullLearningHook;
    use crate::objective::ObjectiveQueue;
    use tempfile::tempdir;

    struct FixedAnalyst;

    impl ErrorAnalyst for FixedAnalyst {
        fn propose_correction(
            &self,
            objective: &Objective,
            _reason: &str,
            _context: &str,
            _action_plan: Option<&serde_json::Value>,
        ) -> Option<Objective> {
            Some(Objective::special(
                "correction",
                &format!("repair fallout of '{}'", objective.text()),
            ))
        }
    }

    struct FixedOptimizer;

    impl PromptOptimizer for FixedOptimizer {
        fn rewrite(&self, objective: &Objective, _: &str, _: &str) -> Option<Objective> {
            Some(Objective::task(format!("{} (rephrased)", objective.text())))
        }
    }

    fn make_memory() -> (ProjectMemory, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        (
            ProjectMemory::load_or_default(dir.path().join("memory.json")).unwrap(),
            dir,
        )
    }

    fn classify_once(
        classifier: &FailureClassifier,
        objective: &Objective,
        failure_reason: &str,
        memory: &mut ProjectMemory,
        source: &mut ObjectiveSource,
    ) -> FailureRoute {
        classifier.classify(
            objective,
            failure_reason,
            "context",
            None,
            memory,
            source,
            &NullLearningHook,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn uncorrectable_failure_is_only_recorded() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier = FailureClassifier::new(3, vec![]);

        let route = classify_once(
            &classifier,
            &Objective::task("fix bug X"),
            "PLAN_PHASE_FAILED",
            &mut memory,
            &mut source,
        );

        assert_eq!(route, FailureRoute::Recorded);
        assert_eq!(memory.failures().len(), 1);
        assert!(source.stack().is_empty());
    }

    #[test]
    fn correctable_failure_schedules_correction_before_original() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier = FailureClassifier::new(3, vec!["PATCH_REJECTED".to_string()])
            .with_analyst(Arc::new(FixedAnalyst));

        let route = classify_once(
            &classifier,
            &Objective::task("fix bug X"),
            "PATCH_REJECTED",
            &mut memory,
            &mut source,
        );

        assert_eq!(route, FailureRoute::CorrectionScheduled);
        // Correction on top (runs first), original below (retried after).
        let stack = source.stack();
        assert_eq!(stack.len(), 2);
        assert_eq!(stack[1].task_type(), "correction");
        assert_eq!(stack[0].text(), "fix bug X");
    }

    #[test]
    fn regression_reason_is_always_correctable() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier =
            FailureClassifier::new(3, vec![]).with_analyst(Arc::new(FixedAnalyst));

        let route = classify_once(
            &classifier,
            &Objective::task("fix bug X"),
            "REGRESSION_DETECTED_BY_RUN_TESTS",
            &mut memory,
            &mut source,
        );

        assert_eq!(route, FailureRoute::CorrectionScheduled);
    }

    #[test]
    fn correctable_without_analyst_degrades_to_warning_noop() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier = FailureClassifier::new(3, vec!["PATCH_REJECTED".to_string()]);

        let route = classify_once(
            &classifier,
            &Objective::task("fix bug X"),
            "PATCH_REJECTED",
            &mut memory,
            &mut source,
        );

        assert_eq!(route, FailureRoute::CorrectionUnavailable);
        assert!(source.stack().is_empty());
    }

    #[test]
    fn degenerative_loop_beats_correction_routing() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        // Reason is correctable AND degenerative; the loop breaker must win.
        let classifier = FailureClassifier::new(3, vec!["PATCH_REJECTED".to_string()])
            .with_analyst(Arc::new(FixedAnalyst));

        let objective = Objective::task("fix bug X");
        for _ in 0..2 {
            // First two failures route through correction scheduling.
            let route = classify_once(
                &classifier,
                &objective,
                "PATCH_REJECTED",
                &mut memory,
                &mut source,
            );
            assert_eq!(route, FailureRoute::CorrectionScheduled);
        }

        let route = classify_once(
            &classifier,
            &objective,
            "PATCH_REJECTED",
            &mut memory,
            &mut source,
        );
        assert_eq!(route, FailureRoute::LoopBroken { rewritten: false });
        // Nothing new pushed by the loop breaker without an optimizer.
        assert_eq!(source.stack().len(), 4);
        // The detection itself was logged.
        assert!(
            memory
                .failures()
                .iter()
                .any(|r| r.reason == "DEGENERATIVE_LOOP_DETECTED")
        );
    }

    #[test]
    fn loop_breaker_pushes_rewrite_when_optimizer_available() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier = FailureClassifier::new(2, vec![])
            .with_optimizer(Arc::new(FixedOptimizer));

        let objective = Objective::task("fix bug X");
        classify_once(
            &classifier,
            &objective,
            "STRATEGY_PHASE_FAILED",
            &mut memory,
            &mut source,
        );
        let route = classify_once(
            &classifier,
            &objective,
            "STRATEGY_PHASE_FAILED",
            &mut memory,
            &mut source,
        );

        assert_eq!(route, FailureRoute::LoopBroken { rewritten: true });
        let stack = source.stack();
        assert_eq!(stack.len(), 1);
        assert_eq!(stack[0].text(), "fix bug X (rephrased)");
    }

    #[test]
    fn detection_log_resets_the_streak() {
        let (mut memory, _dir) = make_memory();
        let mut source = ObjectiveSource::new(ObjectiveQueue::new());
        let classifier = FailureClassifier::new(2, vec![]);

        let objective = Objective::task("fix bug X");
        for _ in 0..2 {
            classify_once(
                &classifier,
                &objective,
                "PLAN_PHASE_FAILED",
                &mut memory,
                &mut source,
            );
        }
        // Third failure starts a fresh streak below the threshold: the
        // DEGENERATIVE_LOOP_DETECTED record broke the previous one.
        let route = classify_once(
            &classifier,
            &objective,
            "PLAN_PHASE_FAILED",
            &mut memory,
            &mut source,
        );
        assert_eq!(route, FailureRoute::Recorded);
    }
}
