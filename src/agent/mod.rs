//! Agent interface boundary: typed tasks, results, and the execution registry.
//!
//! Agents are opaque collaborators: given an objective and a context map they
//! return an [`AgentResult`], translating their own failures into
//! `success = false` rather than raising. The orchestrator only sees the
//! closed [`AgentType`] set and dispatches through [`AgentRegistry`].

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub use command::CommandAgent;

/// The closed set of agent roles the orchestrator dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Produces the action plan for an objective (PLAN critical path).
    Planner,
    /// Best-effort bug sweep run alongside the planner.
    BugSweeper,
    /// Best-effort review of the proposed plan (STRATEGIZE).
    Reviewer,
    /// Chooses the validation strategy (STRATEGIZE critical path).
    StrategySelector,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::BugSweeper => "bug_sweeper",
            Self::Reviewer => "reviewer",
            Self::StrategySelector => "strategy_selector",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planner" => Ok(Self::Planner),
            "bug_sweeper" => Ok(Self::BugSweeper),
            "reviewer" => Ok(Self::Reviewer),
            "strategy_selector" => Ok(Self::StrategySelector),
            _ => Err(format!("Invalid agent type: {}", s)),
        }
    }
}

/// One unit of work handed to an agent. Created fresh per stage and never
/// mutated after submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub task_id: Uuid,
    pub agent_type: AgentType,
    pub objective: String,
    pub context: HashMap<String, String>,
    /// Higher values are more urgent; best-effort tasks run at low priority.
    pub priority: i32,
}

impl AgentTask {
    pub fn new(agent_type: AgentType, objective: &str) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            agent_type,
            objective: objective.to_string(),
            context: HashMap::new(),
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context_entry(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = context;
        self
    }
}

/// Exactly one result is produced per submitted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: Uuid,
    pub success: bool,
    pub result: serde_json::Value,
    pub error_message: Option<String>,
}

impl AgentResult {
    pub fn ok(task_id: Uuid, result: serde_json::Value) -> Self {
        Self {
            task_id,
            success: true,
            result,
            error_message: None,
        }
    }

    pub fn failed(task_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            result: serde_json::Value::Null,
            error_message: Some(message.into()),
        }
    }

    /// The result payload as a plain string, if it is one.
    pub fn result_str(&self) -> Option<&str> {
        self.result.as_str()
    }
}

/// Abstraction over agent execution for testability.
/// Real implementation: [`CommandAgent`]. Test doubles live in `#[cfg(test)]`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Execute the task. Implementations catch their own failures and return
    /// `success = false` with `error_message` set; they do not panic or
    /// propagate errors through this boundary.
    async fn execute(&self, task: &AgentTask) -> AgentResult;
}

/// Closed-enum dispatch: one registered executor per [`AgentType`] variant.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<AgentType, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent_type: AgentType, agent: Arc<dyn Agent>) {
        self.agents.insert(agent_type, agent);
    }

    pub fn get(&self, agent_type: AgentType) -> Option<Arc<dyn Agent>> {
        self.agents.get(&agent_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<AgentType> {
        self.agents.keys().copied().collect()
    }
}
