//! Project initialization, status, log, and reset commands.

use std::path::Path;

use anyhow::Result;

pub fn cmd_init(project_dir: &Path, verbose: bool) -> Result<()> {
    use tend::config::Config;
    use tend::tracker::GitWorkspace;

    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    let already = config.is_initialized();
    config.ensure_directories()?;

    if already {
        println!("tend project already initialized at {}", config.tend_dir.display());
    } else {
        println!("Initialized tend project at {}", config.tend_dir.display());
    }

    if GitWorkspace::open(&config.project_dir).is_err() {
        println!("Warning: not a git repository; 'tend run' needs one to commit and roll back.");
    }
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use tend::config::Config;
    use tend::cycle::CycleLog;
    use tend::memory::ProjectMemory;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    if !config.is_initialized() {
        println!("Not initialized. Run 'tend init' first.");
        return Ok(());
    }
    println!("Initialized at {}", config.tend_dir.display());

    let memory = ProjectMemory::load_or_default(config.memory_file.clone())?;
    println!();
    println!(
        "Memory: {} completed, {} failed, {} advisory note(s)",
        memory.completed().len(),
        memory.failures().len(),
        memory.notes().len()
    );

    let reason_counts = memory.failure_reason_counts();
    if !reason_counts.is_empty() {
        let mut reasons: Vec<_> = reason_counts.into_iter().collect();
        reasons.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        println!();
        println!("{:<40} Count", "Failure reason");
        println!("{:<40} -----", "----------------------------------------");
        for (reason, count) in reasons {
            println!("{:<40} {}", reason, count);
        }
    }

    let log = CycleLog::new(config.cycle_log_file.clone());
    let records = log.records()?;
    println!();
    match records.last() {
        Some(last) => println!(
            "Cycles logged: {} (last: #{} '{}' -> {})",
            records.len(),
            last.cycle_number,
            last.objective,
            last.outcome
        ),
        None => println!("Cycles logged: 0"),
    }
    Ok(())
}

pub fn cmd_log(project_dir: &Path, count: usize) -> Result<()> {
    use tend::config::Config;
    use tend::cycle::CycleLog;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    if !config.is_initialized() {
        println!("Not initialized. Run 'tend init' first.");
        return Ok(());
    }

    let records = CycleLog::new(config.cycle_log_file.clone()).records()?;
    if records.is_empty() {
        println!("No cycles logged yet.");
        return Ok(());
    }

    println!(
        "{:<7} {:<30} {:<9} {:<9} {:<20} Reason",
        "Cycle", "Objective", "Outcome", "Secs", "Strategy"
    );
    let start = records.len().saturating_sub(count);
    for record in &records[start..] {
        let mut objective = record.objective.clone();
        if objective.chars().count() > 28 {
            objective = objective.chars().take(28).collect();
            objective.push('…');
        }
        println!(
            "{:<7} {:<30} {:<9} {:<9.1} {:<20} {}",
            record.cycle_number,
            objective,
            record.outcome,
            record.duration_seconds,
            record.strategy_key,
            record.reason
        );
    }
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use tend::config::Config;
    use tend::cycle::CycleLog;
    use tend::memory::ProjectMemory;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    if !config.is_initialized() {
        println!("Not initialized; nothing to reset.");
        return Ok(());
    }
    if !force {
        println!("This clears the cycle log, memory, and learning stats.");
        println!("Re-run with --force to confirm.");
        return Ok(());
    }

    let mut memory = ProjectMemory::load_or_default(config.memory_file.clone())?;
    memory.reset()?;
    CycleLog::new(config.cycle_log_file.clone()).reset()?;
    if config.learning_file.exists() {
        std::fs::remove_file(&config.learning_file)?;
    }
    println!("Reset tend state.");
    Ok(())
}
