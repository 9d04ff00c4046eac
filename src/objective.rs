//! Objective model and sourcing.
//!
//! Objectives flow into the cycle loop from three places, in strict
//! precedence order: the local LIFO stack (sub-objectives pushed by the
//! sequencer and loop breaker), the external FIFO queue (multi-producer),
//! and, in continuous mode only, a blocking generator collaborator run
//! off the async context. `next()` returning `None` is the loop's sole
//! termination signal.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An opaque unit of work. Immutable once created; consumed exactly once per
/// cycle attempt; re-enqueued only by the failure classifier or a
/// capacitation deferral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Objective {
    /// Natural-language objective.
    Task(String),
    /// Structured special task with an explicit type tag.
    Special {
        task_type: String,
        objective: String,
        context: HashMap<String, String>,
    },
}

impl Objective {
    pub fn task(text: impl Into<String>) -> Self {
        Self::Task(text.into())
    }

    pub fn special(task_type: &str, objective: &str) -> Self {
        Self::Special {
            task_type: task_type.to_string(),
            objective: objective.to_string(),
            context: HashMap::new(),
        }
    }

    pub fn with_context_entry(self, key: &str, value: impl Into<String>) -> Self {
        match self {
            Self::Task(text) => {
                let mut context = HashMap::new();
                context.insert(key.to_string(), value.into());
                Self::Special {
                    task_type: "task".to_string(),
                    objective: text,
                    context,
                }
            }
            Self::Special {
                task_type,
                objective,
                mut context,
            } => {
                context.insert(key.to_string(), value.into());
                Self::Special {
                    task_type,
                    objective,
                    context,
                }
            }
        }
    }

    /// The objective text agents and logs see.
    pub fn text(&self) -> &str {
        match self {
            Self::Task(text) => text,
            Self::Special { objective, .. } => objective,
        }
    }

    pub fn task_type(&self) -> &str {
        match self {
            Self::Task(_) => "task",
            Self::Special { task_type, .. } => task_type,
        }
    }
}

impl std::fmt::Display for Objective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Task(text) => f.write_str(text),
            Self::Special {
                task_type,
                objective,
                ..
            } => write!(f, "[{}] {}", task_type, objective),
        }
    }
}

/// External FIFO queue; cloneable multi-producer handle.
#[derive(Clone, Default)]
pub struct ObjectiveQueue {
    inner: Arc<Mutex<VecDeque<Objective>>>,
}

impl ObjectiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, objective: Objective) {
        self.inner
            .lock()
            .expect("objective queue lock poisoned")
            .push_back(objective);
    }

    pub fn pop(&self) -> Option<Objective> {
        self.inner
            .lock()
            .expect("objective queue lock poisoned")
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("objective queue lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blocking objective-generation collaborator used in continuous mode.
/// Invoked via `spawn_blocking`; its own timeout policy is external.
pub trait ObjectiveGenerator: Send + Sync {
    fn generate(&self) -> Option<Objective>;
}

/// How `next()` satisfied a request, surfaced so the runner can log queue
/// transfers and generation waits distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Stack,
    QueueTransfer,
    Generated,
}

pub struct ObjectiveSource {
    stack: Vec<Objective>,
    queue: ObjectiveQueue,
    generator: Option<Arc<dyn ObjectiveGenerator>>,
    continuous: bool,
    generation_delay: Duration,
}

impl ObjectiveSource {
    pub fn new(queue: ObjectiveQueue) -> Self {
        Self {
            stack: Vec::new(),
            queue,
            generator: None,
            continuous: false,
            generation_delay: Duration::from_secs(0),
        }
    }

    pub fn with_generator(
        mut self,
        generator: Arc<dyn ObjectiveGenerator>,
        generation_delay: Duration,
    ) -> Self {
        self.generator = Some(generator);
        self.generation_delay = generation_delay;
        self
    }

    pub fn continuous(mut self, enabled: bool) -> Self {
        self.continuous = enabled;
        self
    }

    /// Push a sub-objective; it will be served before anything else.
    pub fn push(&mut self, objective: Objective) {
        self.stack.push(objective);
    }

    /// Stack contents, bottom-to-top.
    pub fn stack(&self) -> &[Objective] {
        &self.stack
    }

    pub fn queue(&self) -> &ObjectiveQueue {
        &self.queue
    }

    /// The next objective, or `None` to terminate the loop.
    pub async fn next(&mut self) -> Option<(Objective, SourceKind)> {
        if let Some(objective) = self.stack.pop() {
            return Some((objective, SourceKind::Stack));
        }

        if let Some(objective) = self.queue.pop() {
            return Some((objective, SourceKind::QueueTransfer));
        }

        if self.continuous
            && let Some(generator) = self.generator.clone()
        {
            // Generation may block for a long time; keep it off the async
            // context so the process stays responsive.
            let generated = tokio::task::spawn_blocking(move || generator.generate())
                .await
                .ok()
                .flatten();
            tokio::time::sleep(self.generation_delay).await;
            return generated.map(|objective| (objective, SourceKind::Generated));
        }

        None
    }
}
