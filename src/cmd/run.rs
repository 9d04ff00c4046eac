//! Cycle-loop orchestration, `tend run`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use super::super::Cli;

const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;

/// Blocking generator that spawns a configured command and reads one
/// objective per invocation from its stdout. Exhausted (non-zero exit or
/// empty output) means no more work.
struct CommandObjectiveGenerator {
    command: String,
    working_dir: PathBuf,
}

impl tend::objective::ObjectiveGenerator for CommandObjectiveGenerator {
    fn generate(&self) -> Option<tend::objective::Objective> {
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let text = stdout.trim();
        if text.is_empty() {
            None
        } else {
            Some(tend::objective::Objective::task(text))
        }
    }
}

pub async fn run_cycles(
    cli: &Cli,
    project_dir: PathBuf,
    objectives: Vec<String>,
    max_cycles: Option<u64>,
    continuous: bool,
) -> Result<()> {
    use tend::agent::command::command_registry;
    use tend::config::Config;
    use tend::controller::MutationController;
    use tend::cycle::{CycleOrchestrator, StageSequencer};
    use tend::failure::FailureClassifier;
    use tend::learning::{LearningHook, OutcomeStats};
    use tend::objective::{Objective, ObjectiveQueue, ObjectiveSource};
    use tend::strategy::{CommandStrategyValidator, SanityToolRegistry, StrategyValidator};
    use tend::tracker::GitWorkspace;
    use tend::ui::CycleUI;

    let mut config = Config::new(project_dir, cli.verbose)?;
    config.max_cycles = max_cycles;
    if continuous {
        config.continuous = true;
    }
    config.ensure_directories()?;

    let agents = config.toml().agents.clone();
    let agent_command = agents.command.clone().context(
        "No agent command configured. Set [agents] command in tend.toml.",
    )?;
    let validator_command = agents.validator_command.clone().context(
        "No validator command configured. Set [agents] validator_command in tend.toml.",
    )?;
    let agent_timeout =
        Duration::from_secs(agents.timeout_secs.unwrap_or(DEFAULT_AGENT_TIMEOUT_SECS));

    let registry = Arc::new(command_registry(
        &agent_command,
        &agents.args.clone().unwrap_or_default(),
        &config.project_dir,
        agent_timeout,
    ));
    let validator: Arc<dyn StrategyValidator> = Arc::new(
        CommandStrategyValidator::new(&validator_command, config.project_dir.clone())
            .with_args(agents.validator_args.clone().unwrap_or_default()),
    );

    let queue = ObjectiveQueue::new();
    for text in objectives {
        queue.push(Objective::task(text));
    }
    let mut source = ObjectiveSource::new(queue).continuous(config.continuous);
    if let Some(generator_command) = agents.generator_command.clone() {
        source = source.with_generator(
            Arc::new(CommandObjectiveGenerator {
                command: generator_command,
                working_dir: config.project_dir.clone(),
            }),
            config.generation_delay,
        );
    } else if config.continuous {
        anyhow::bail!(
            "Continuous mode needs [agents] generator_command in tend.toml."
        );
    }

    let ui = Arc::new(CycleUI::new(config.max_cycles, cli.verbose));

    let sequencer = StageSequencer::new(
        registry,
        validator.clone(),
        config.project_dir.clone(),
        config.validation_retries,
    )
    .with_ui(ui.clone());

    let workspace = GitWorkspace::open(&config.project_dir)
        .context("tend needs a git repository to commit and roll back changes")?;
    let sanity_tools = SanityToolRegistry::with_defaults(&config.project_dir, &config.sanity_command);
    let controller = MutationController::new(
        workspace,
        sanity_tools,
        config.project_dir.clone(),
        config.manifest_file.clone(),
    )
    .with_ui(ui.clone());

    let classifier = FailureClassifier::new(
        config.degenerative_threshold,
        config.correctable_reasons.clone(),
    )
    .with_ui(ui.clone());

    let learning: Arc<dyn LearningHook> =
        Arc::new(OutcomeStats::new(config.learning_file.clone(), cli.verbose));

    let mut orchestrator = CycleOrchestrator::new(
        config,
        sequencer,
        controller,
        classifier,
        validator,
        source,
        learning,
    )?
    .with_ui(ui);

    let summary = orchestrator.run().await?;

    println!(
        "Completed {} cycle(s): {} ok, {} deferred, {} failed",
        summary.cycles, summary.successes, summary.deferrals, summary.failures
    );
    Ok(())
}
