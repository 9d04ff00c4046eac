//! Append-only cycle log, one pipe-delimited row per cycle.
//!
//! Format: `cycle|objective|outcome|duration|strategy|start|end|reason|context`

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub objective: String,
    pub outcome: String,
    pub duration_seconds: f64,
    pub strategy_key: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub reason: String,
    pub context: String,
}

pub struct CycleLog {
    log_file: PathBuf,
}

/// Free-text fields must not break the row format.
fn sanitize(field: &str) -> String {
    field.replace(['|', '\n', '\r'], " ")
}

impl CycleLog {
    pub fn new(log_file: PathBuf) -> Self {
        Self { log_file }
    }

    pub fn append(&self, record: &CycleRecord) -> Result<()> {
        let row = format!(
            "{}|{}|{}|{:.3}|{}|{}|{}|{}|{}\n",
            record.cycle_number,
            sanitize(&record.objective),
            sanitize(&record.outcome),
            record.duration_seconds,
            sanitize(&record.strategy_key),
            record.start_time.to_rfc3339(),
            record.end_time.to_rfc3339(),
            sanitize(&record.reason),
            sanitize(&record.context),
        );

        if let Some(parent) = self.log_file.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file)
            .context("Failed to open cycle log")?
            .write_all(row.as_bytes())
            .context("Failed to write cycle record")?;

        Ok(())
    }

    /// All parseable records in file order; malformed rows are skipped.
    pub fn records(&self) -> Result<Vec<CycleRecord>> {
        if !self.log_file.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.log_file).context("Failed to read cycle log")?;
        let records = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split('|').collect();
                if parts.len() != 9 {
                    return None;
                }
                Some(CycleRecord {
                    cycle_number: parts[0].parse().ok()?,
                    objective: parts[1].to_string(),
                    outcome: parts[2].to_string(),
                    duration_seconds: parts[3].parse().ok()?,
                    strategy_key: parts[4].to_string(),
                    start_time: DateTime::parse_from_rfc3339(parts[5])
                        .ok()?
                        .with_timezone(&Utc),
                    end_time: DateTime::parse_from_rfc3339(parts[6])
                        .ok()?
                        .with_timezone(&Utc),
                    reason: parts[7].to_string(),
                    context: parts[8].to_string(),
                })
            })
            .collect();

        Ok(records)
    }

    pub fn last_cycle_number(&self) -> Option<u64> {
        self.records()
            .ok()?
            .last()
            .map(|record| record.cycle_number)
    }

    pub fn reset(&self) -> Result<()> {
        if self.log_file.exists() {
            fs::remove_file(&self.log_file).context("Failed to remove cycle log")?;
        }
        Ok(())
    }
}
