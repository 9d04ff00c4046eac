use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::tend_config::TendToml;

pub const TEND_DIR: &str = ".tend";

const DEFAULT_VALIDATION_RETRIES: u32 = 1;
const DEFAULT_DEGENERATIVE_THRESHOLD: u32 = 3;
const DEFAULT_GENERATION_DELAY_SECS: u64 = 5;
const DEFAULT_SANITY_COMMAND: &str = "cargo test --quiet";

/// Runtime configuration for tend.
///
/// Bridges `tend.toml` with the runtime needs of the orchestrator: resolved
/// paths under `.tend/`, thresholds, and pacing.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub tend_dir: PathBuf,
    pub memory_file: PathBuf,
    pub cycle_log_file: PathBuf,
    pub learning_file: PathBuf,
    pub manifest_file: PathBuf,
    pub verbose: bool,
    pub continuous: bool,
    pub max_cycles: Option<u64>,
    pub validation_retries: u32,
    pub degenerative_threshold: u32,
    pub cycle_delay: Duration,
    pub generation_delay: Duration,
    pub sanity_command: String,
    pub correctable_reasons: Vec<String>,
    /// The underlying file-backed settings.
    toml: TendToml,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let toml = TendToml::load_or_default(&project_dir)?;

        let tend_dir = project_dir.join(TEND_DIR);
        let memory_file = tend_dir.join("memory.json");
        let cycle_log_file = tend_dir.join("cycles.log");
        let learning_file = tend_dir.join("learning.json");
        let manifest_file = tend_dir.join("manifest.txt");

        Ok(Self {
            project_dir,
            tend_dir,
            memory_file,
            cycle_log_file,
            learning_file,
            manifest_file,
            verbose,
            continuous: toml.cycle.continuous.unwrap_or(false),
            max_cycles: None,
            validation_retries: toml
                .cycle
                .validation_retries
                .unwrap_or(DEFAULT_VALIDATION_RETRIES),
            degenerative_threshold: toml
                .cycle
                .degenerative_threshold
                .unwrap_or(DEFAULT_DEGENERATIVE_THRESHOLD),
            cycle_delay: Duration::from_secs(toml.cycle.cycle_delay_secs.unwrap_or(0)),
            generation_delay: Duration::from_secs(
                toml.cycle
                    .generation_delay_secs
                    .unwrap_or(DEFAULT_GENERATION_DELAY_SECS),
            ),
            sanity_command: toml
                .sanity
                .command
                .clone()
                .unwrap_or_else(|| DEFAULT_SANITY_COMMAND.to_string()),
            correctable_reasons: toml.cycle.correctable_reasons.clone().unwrap_or_default(),
            toml,
        })
    }

    pub fn toml(&self) -> &TendToml {
        &self.toml
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.tend_dir).context("Failed to create tend directory")?;
        // Keep orchestrator state out of the commits it creates.
        let gitignore = self.tend_dir.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, "*\n").context("Failed to write tend gitignore")?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.tend_dir.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_without_toml() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.validation_retries, 1);
        assert_eq!(config.degenerative_threshold, 3);
        assert!(!config.continuous);
        assert_eq!(config.sanity_command, "cargo test --quiet");
        assert!(config.correctable_reasons.is_empty());
        assert!(config.memory_file.ends_with(".tend/memory.json"));
    }

    #[test]
    fn test_toml_overrides_apply() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("tend.toml"),
            r#"
[cycle]
validation_retries = 2
degenerative_threshold = 4
cycle_delay_secs = 1
continuous = true
"#,
        )
        .unwrap();

        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        assert_eq!(config.validation_retries, 2);
        assert_eq!(config.degenerative_threshold, 4);
        assert_eq!(config.cycle_delay, Duration::from_secs(1));
        assert!(config.continuous);
    }

    #[test]
    fn test_ensure_directories_writes_gitignore() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert!(!config.is_initialized());
        config.ensure_directories().unwrap();
        assert!(config.is_initialized());
        assert_eq!(
            fs::read_to_string(config.tend_dir.join(".gitignore")).unwrap(),
            "*\n"
        );
    }
}
