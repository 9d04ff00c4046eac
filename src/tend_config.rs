//! `tend.toml`: optional file-backed settings.
//!
//! Everything has a sensible default; the file only exists to override
//! thresholds, commands, and pacing for a particular project.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const TEND_TOML: &str = "tend.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TendToml {
    #[serde(default)]
    pub cycle: CycleSettings,
    #[serde(default)]
    pub sanity: SanitySettings,
    #[serde(default)]
    pub agents: AgentSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleSettings {
    /// Attempt ceiling for VALIDATE_APPLY. A failed attempt still ends the
    /// phase, so values above 1 only matter if a future strategy re-selects
    /// mid-phase.
    pub validation_retries: Option<u32>,
    /// Consecutive same-reason failures before the loop breaker fires.
    pub degenerative_threshold: Option<u32>,
    /// Pause between cycles, in seconds.
    pub cycle_delay_secs: Option<u64>,
    /// Pause after each continuous-mode objective generation, in seconds.
    pub generation_delay_secs: Option<u64>,
    pub continuous: Option<bool>,
    /// Failure reasons the error analyst may propose corrections for.
    /// Regression reasons are always correctable.
    pub correctable_reasons: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SanitySettings {
    /// Shell command behind the `run_tests` sanity tool.
    pub command: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Command spawned per agent task; receives the agent type as its final
    /// argument and the task JSON on stdin.
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub timeout_secs: Option<u64>,
    /// Command spawned for strategy validation.
    pub validator_command: Option<String>,
    pub validator_args: Option<Vec<String>>,
    /// Command spawned (blocking) to generate objectives in continuous mode.
    pub generator_command: Option<String>,
}

impl TendToml {
    /// Load `<project>/tend.toml`, or defaults when the file is absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = project_dir.join(TEND_TOML);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).context("Failed to read tend.toml")?;
        toml::from_str(&content).context("Failed to parse tend.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let toml = TendToml::load_or_default(dir.path()).unwrap();
        assert!(toml.cycle.validation_retries.is_none());
        assert!(toml.sanity.command.is_none());
    }

    #[test]
    fn test_partial_file_parses() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(TEND_TOML),
            r#"
[cycle]
degenerative_threshold = 5
correctable_reasons = ["PATCH_REJECTED"]

[sanity]
command = "cargo test --quiet"
"#,
        )
        .unwrap();

        let toml = TendToml::load_or_default(dir.path()).unwrap();
        assert_eq!(toml.cycle.degenerative_threshold, Some(5));
        assert_eq!(
            toml.cycle.correctable_reasons.as_deref(),
            Some(&["PATCH_REJECTED".to_string()][..])
        );
        assert_eq!(toml.sanity.command.as_deref(), Some("cargo test --quiet"));
        assert!(toml.cycle.continuous.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(TEND_TOML), "not [valid").unwrap();
        assert!(TendToml::load_or_default(dir.path()).is_err());
    }
}
