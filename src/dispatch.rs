//! Task dispatcher: concurrent fan-out with a single join barrier.
//!
//! One submission runs every task concurrently and returns only after every
//! task has produced exactly one [`AgentResult`]. Results are then looked up
//! by task id. The dispatcher neither retries nor swallows agent failures;
//! agents translate their own defects into `success = false` results and
//! retry policy lives in the stage sequencer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use crate::agent::{AgentRegistry, AgentResult, AgentTask};
use crate::errors::DispatchError;

pub struct TaskDispatcher {
    registry: Arc<AgentRegistry>,
    results: HashMap<Uuid, AgentResult>,
}

impl TaskDispatcher {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            results: HashMap::new(),
        }
    }

    /// Submit a batch of tasks and wait for all of them to complete.
    ///
    /// Task ids within one submission must be unique. Submitting an empty
    /// list is a no-op. Tasks execute concurrently with no ordering
    /// guarantee; the caller only observes the post-join state via
    /// [`Self::result_of`].
    pub async fn submit(&mut self, mut tasks: Vec<AgentTask>) -> Result<(), DispatchError> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.task_id) {
                return Err(DispatchError::DuplicateTaskId {
                    task_id: task.task_id,
                });
            }
        }

        // Submission order is not a contract; start the urgent work first.
        tasks.sort_by_key(|t| std::cmp::Reverse(t.priority));

        self.results.clear();
        let futures: Vec<_> = tasks.iter().map(|task| self.run_task(task)).collect();
        let results = join_all(futures).await;

        for result in results {
            self.results.insert(result.task_id, result);
        }
        Ok(())
    }

    async fn run_task(&self, task: &AgentTask) -> AgentResult {
        match self.registry.get(task.agent_type) {
            Some(agent) => agent.execute(task).await,
            None => AgentResult::failed(
                task.task_id,
                format!("no agent registered for type '{}'", task.agent_type),
            ),
        }
    }

    /// Result for a task id from the most recent submission, if any.
    pub fn result_of(&self, task_id: Uuid) -> Option<&AgentResult> {
        self.results.get(&task_id)
    }

    pub fn completed_count(&self) -> usize {
        self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Resolves after a configurable delay, recording peak concurrency.
    struct SlowAgent {
        delay_ms: u64,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for SlowAgent {
        async fn execute(&self, task: &AgentTask) -> AgentResult {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            AgentResult::ok(task.task_id, serde_json::json!("done"))
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl Agent for FailingAgent {
        async fn execute(&self, task: &AgentTask) -> AgentResult {
            AgentResult::failed(task.task_id, "deliberate failure")
        }
    }

    fn registry_with(agent_type: AgentType, agent: Arc<dyn Agent>) -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register(agent_type, agent);
        Arc::new(registry)
    }

    #[tokio::test]
    async fn empty_submission_is_a_noop() {
        let mut dispatcher = TaskDispatcher::new(Arc::new(AgentRegistry::new()));
        dispatcher.submit(Vec::new()).await.unwrap();
        assert_eq!(dispatcher.completed_count(), 0);
    }

    #[tokio::test]
    async fn join_completeness_every_submitted_task_has_a_result() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let registry = registry_with(
            AgentType::Planner,
            Arc::new(SlowAgent {
                delay_ms: 20,
                in_flight: in_flight.clone(),
                peak: peak.clone(),
            }),
        );

        let tasks: Vec<_> = (0..4)
            .map(|i| AgentTask::new(AgentType::Planner, &format!("objective {i}")))
            .collect();
        let ids: Vec<_> = tasks.iter().map(|t| t.task_id).collect();

        let mut dispatcher = TaskDispatcher::new(registry);
        dispatcher.submit(tasks).await.unwrap();

        assert_eq!(dispatcher.completed_count(), 4);
        for id in ids {
            assert!(dispatcher.result_of(id).is_some(), "task {id} was dropped");
        }
        // All four ran inside the same join barrier.
        assert!(peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn duplicate_task_ids_are_rejected() {
        let registry = registry_with(AgentType::Planner, Arc::new(FailingAgent));
        let task = AgentTask::new(AgentType::Planner, "objective");
        let twin = task.clone();

        let mut dispatcher = TaskDispatcher::new(registry);
        let err = dispatcher.submit(vec![task, twin]).await.unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTaskId { .. }));
    }

    #[tokio::test]
    async fn unregistered_agent_type_yields_failed_result_not_error() {
        let registry = registry_with(AgentType::Planner, Arc::new(FailingAgent));
        let task = AgentTask::new(AgentType::Reviewer, "objective");
        let id = task.task_id;

        let mut dispatcher = TaskDispatcher::new(registry);
        dispatcher.submit(vec![task]).await.unwrap();

        let result = dispatcher.result_of(id).unwrap();
        assert!(!result.success);
        assert!(result.error_message.as_deref().unwrap().contains("reviewer"));
    }

    #[tokio::test]
    async fn agent_failure_is_reported_not_retried() {
        let registry = registry_with(AgentType::Planner, Arc::new(FailingAgent));
        let task = AgentTask::new(AgentType::Planner, "objective");
        let id = task.task_id;

        let mut dispatcher = TaskDispatcher::new(registry);
        dispatcher.submit(vec![task]).await.unwrap();

        let result = dispatcher.result_of(id).unwrap();
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("deliberate failure"));
        assert_eq!(dispatcher.completed_count(), 1);
    }
}
