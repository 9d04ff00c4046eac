//! Execution-outcome learning hook.
//!
//! Cycle outcomes are forwarded to a learning collaborator fire-and-forget:
//! the hook must never fail the cycle, so implementations swallow their own
//! errors. The default implementation aggregates outcome counters and a
//! rolling mean cycle duration into a JSON file under the tend directory.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub trait LearningHook: Send + Sync {
    /// Record one execution outcome. Must not raise; failures inside the
    /// hook are logged and dropped.
    fn learn_from_execution(
        &self,
        objective: &str,
        success: bool,
        failure_reason: Option<&str>,
        execution_time: Duration,
    );
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StatsSnapshot {
    successes: u64,
    failures: u64,
    #[serde(default)]
    failure_reasons: HashMap<String, u64>,
    mean_execution_secs: f64,
    samples: u64,
    #[serde(default)]
    last_objective: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// File-backed outcome statistics.
pub struct OutcomeStats {
    path: PathBuf,
    verbose: bool,
}

impl OutcomeStats {
    pub fn new(path: PathBuf, verbose: bool) -> Self {
        Self { path, verbose }
    }

    fn record(
        &self,
        objective: &str,
        success: bool,
        failure_reason: Option<&str>,
        execution_time: Duration,
    ) -> Result<()> {
        let mut stats: StatsSnapshot = if self.path.exists() {
            let content =
                fs::read_to_string(&self.path).context("Failed to read learning file")?;
            serde_json::from_str(&content).unwrap_or_default()
        } else {
            StatsSnapshot::default()
        };

        if success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
            if let Some(reason) = failure_reason {
                *stats.failure_reasons.entry(reason.to_string()).or_insert(0) += 1;
            }
        }

        let sample = execution_time.as_secs_f64();
        stats.mean_execution_secs +=
            (sample - stats.mean_execution_secs) / (stats.samples + 1) as f64;
        stats.samples += 1;
        stats.last_objective = Some(objective.to_string());
        stats.updated_at = Some(Utc::now());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create learning directory")?;
        }
        let content =
            serde_json::to_string_pretty(&stats).context("Failed to serialize learning stats")?;
        fs::write(&self.path, content).context("Failed to write learning file")?;
        Ok(())
    }
}

impl LearningHook for OutcomeStats {
    fn learn_from_execution(
        &self,
        objective: &str,
        success: bool,
        failure_reason: Option<&str>,
        execution_time: Duration,
    ) {
        if let Err(e) = self.record(objective, success, failure_reason, execution_time)
            && self.verbose
        {
            eprintln!("[learning] failed to record outcome: {e:#}");
        }
    }
}

/// Hook that records nothing; used when learning is disabled.
pub struct NullLearningHook;

impl LearningHook for NullLearningHook {
    fn learn_from_execution(&self, _: &str, _: bool, _: Option<&str>, _: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_stats_accumulate_across_invocations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.json");
        let hook = OutcomeStats::new(path.clone(), false);

        hook.learn_from_execution("fix bug X", true, None, Duration::from_secs(2));
        hook.learn_from_execution(
            "fix bug X",
            false,
            Some("PLAN_PHASE_FAILED"),
            Duration::from_secs(4),
        );

        let stats: StatsSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.failure_reasons.get("PLAN_PHASE_FAILED"), Some(&1));
        assert_eq!(stats.samples, 2);
        assert!((stats.mean_execution_secs - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hook_never_raises_on_unwritable_path() {
        // Parent is a file, so every write must fail; the hook must swallow it.
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "file, not dir").unwrap();
        let hook = OutcomeStats::new(blocker.join("learning.json"), false);
        hook.learn_from_execution("objective", true, None, Duration::from_secs(1));
    }

    #[test]
    fn test_corrupt_stats_file_starts_over() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("learning.json");
        fs::write(&path, "not json").unwrap();

        let hook = OutcomeStats::new(path.clone(), false);
        hook.learn_from_execution("objective", true, None, Duration::from_secs(1));

        let stats: StatsSnapshot =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stats.successes, 1);
    }
}
