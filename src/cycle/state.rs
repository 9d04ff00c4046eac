//! Per-cycle transient state and the failure-reason taxonomy.

use crate::objective::Objective;
use crate::strategy::ValidationOutcome;

/// Well-known failure reason keys. The taxonomy is string-keyed and open:
/// collaborators may introduce new reasons at any time, these are only the
/// ones the orchestrator itself emits or routes on.
pub mod reason {
    pub const MANIFEST_GENERATION_FAILED: &str = "MANIFEST_GENERATION_FAILED";
    pub const INFORMATION_GATHERING_FAILED: &str = "INFORMATION_GATHERING_FAILED";
    pub const PLAN_PHASE_FAILED: &str = "PLAN_PHASE_FAILED";
    pub const STRATEGY_PHASE_FAILED: &str = "STRATEGY_PHASE_FAILED";
    pub const ASYNC_PIPELINE_ERROR: &str = "ASYNC_PIPELINE_ERROR";
    pub const DEGENERATIVE_LOOP_DETECTED: &str = "DEGENERATIVE_LOOP_DETECTED";
    pub const UNHANDLED_CYCLE_EXCEPTION: &str = "UNHANDLED_CYCLE_EXCEPTION";

    const REGRESSION_PREFIX: &str = "REGRESSION_DETECTED_BY_";

    /// Reason for a sanity-check regression caught by the named tool.
    pub fn regression(tool_name: &str) -> String {
        format!("{}{}", REGRESSION_PREFIX, tool_name.to_uppercase())
    }

    pub fn is_regression(reason: &str) -> bool {
        reason.starts_with(REGRESSION_PREFIX)
    }

    /// The fixed reason set the degenerate-loop test always consults, in
    /// addition to the failing cycle's own reason.
    pub fn well_known() -> [&'static str; 4] {
        [
            PLAN_PHASE_FAILED,
            STRATEGY_PHASE_FAILED,
            ASYNC_PIPELINE_ERROR,
            UNHANDLED_CYCLE_EXCEPTION,
        ]
    }
}

/// How a cycle ended, as recorded in the cycle log.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Validation succeeded; `mutated` distinguishes a committed (or
    /// sanity-skipped) working-tree change from a "validated, nothing to
    /// apply" pass-through.
    Success { strategy_key: String, mutated: bool },
    /// The strategy declared the system incapable; the objective was pushed
    /// back behind a synthesized capacitation objective. Nothing touched
    /// the working tree.
    Deferred { capacitation_objective: String },
    Failure { reason: String, context: String },
}

impl CycleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Deferred { .. } => "deferred",
            Self::Failure { .. } => "failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// Transient record for one cycle attempt. Created at cycle start, discarded
/// at cycle end; never shared across cycles.
#[derive(Debug)]
pub struct CycleState {
    pub objective: Objective,
    pub action_plan: Option<serde_json::Value>,
    pub strategy_key: Option<String>,
    pub validation: Option<ValidationOutcome>,
}

impl CycleState {
    pub fn new(objective: Objective) -> Self {
        Self {
            objective,
            action_plan: None,
            strategy_key: None,
            validation: None,
        }
    }
}
