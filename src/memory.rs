//! Persistent project memory.
//!
//! Stores completed objectives, failure records, and advisory notes from
//! best-effort agents as a JSON snapshot under the tend directory. The loop
//! breaker queries it for degenerative failure patterns.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::objective::Objective;

/// How many recent entries the planning-context summary includes.
const SUMMARY_ENTRIES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedObjective {
    pub objective: String,
    pub strategy_key: String,
    pub outcome: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub objective: String,
    pub reason: String,
    pub context: String,
    pub recorded_at: DateTime<Utc>,
}

/// Observations from best-effort agents (bug sweep, review), kept for
/// operators and future planning context rather than control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryNote {
    pub source: String,
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemorySnapshot {
    #[serde(default)]
    completed: Vec<CompletedObjective>,
    #[serde(default)]
    failures: Vec<FailureRecord>,
    #[serde(default)]
    notes: Vec<AdvisoryNote>,
}

pub struct ProjectMemory {
    path: PathBuf,
    snapshot: MemorySnapshot,
}

impl ProjectMemory {
    /// Load the snapshot from disk, or start empty if none exists yet.
    pub fn load_or_default(path: PathBuf) -> Result<Self> {
        let snapshot = if path.exists() {
            let content = fs::read_to_string(&path).context("Failed to read memory file")?;
            serde_json::from_str(&content).context("Failed to parse memory file")?
        } else {
            MemorySnapshot::default()
        };
        Ok(Self { path, snapshot })
    }

    pub fn add_completed_objective(
        &mut self,
        objective: &Objective,
        strategy_key: &str,
        outcome: &str,
    ) {
        self.snapshot.completed.push(CompletedObjective {
            objective: objective.text().to_string(),
            strategy_key: strategy_key.to_string(),
            outcome: outcome.to_string(),
            completed_at: Utc::now(),
        });
    }

    pub fn add_failed_objective(&mut self, objective: &Objective, reason: &str, context: &str) {
        self.snapshot.failures.push(FailureRecord {
            objective: objective.text().to_string(),
            reason: reason.to_string(),
            context: context.to_string(),
            recorded_at: Utc::now(),
        });
    }

    pub fn add_advisory_note(&mut self, source: &str, note: &str) {
        self.snapshot.notes.push(AdvisoryNote {
            source: source.to_string(),
            note: note.to_string(),
            recorded_at: Utc::now(),
        });
    }

    /// Whether the most recent consecutive failures of `objective` share
    /// `reason` at least `threshold` times.
    ///
    /// Only the uninterrupted run of same-reason failures at the tail of the
    /// objective's failure history counts; any different reason in between
    /// resets the streak.
    pub fn has_degenerative_failure_pattern(
        &self,
        objective: &str,
        reason: &str,
        threshold: u32,
    ) -> bool {
        if threshold == 0 {
            return true;
        }
        let mut streak = 0u32;
        for record in self
            .snapshot
            .failures
            .iter()
            .rev()
            .filter(|r| r.objective == objective)
        {
            if record.reason == reason {
                streak += 1;
                if streak >= threshold {
                    return true;
                }
            } else {
                break;
            }
        }
        false
    }

    /// Compact text summary for the planning context.
    pub fn summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push(format!(
            "{} completed, {} failed, {} notes",
            self.snapshot.completed.len(),
            self.snapshot.failures.len(),
            self.snapshot.notes.len()
        ));
        for entry in self.snapshot.completed.iter().rev().take(SUMMARY_ENTRIES) {
            lines.push(format!("done: {} ({})", entry.objective, entry.strategy_key));
        }
        for record in self.snapshot.failures.iter().rev().take(SUMMARY_ENTRIES) {
            lines.push(format!("failed: {} [{}]", record.objective, record.reason));
        }
        lines.join("\n")
    }

    pub fn completed(&self) -> &[CompletedObjective] {
        &self.snapshot.completed
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.snapshot.failures
    }

    pub fn notes(&self) -> &[AdvisoryNote] {
        &self.snapshot.notes
    }

    /// Failure counts per reason, for `tend status`.
    pub fn failure_reason_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in &self.snapshot.failures {
            *counts.entry(record.reason.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create memory directory")?;
        }
        let content =
            serde_json::to_string_pretty(&self.snapshot).context("Failed to serialize memory")?;
        fs::write(&self.path, content).context("Failed to write memory file")?;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.snapshot = MemorySnapshot::default();
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove memory file")?;
        }
        Ok(())
    }
}
