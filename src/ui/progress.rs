use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::ui::icons::{CHECK, COMMIT, CROSS, DEFER, LOOP, ROLLBACK};

/// Terminal UI for the tend cycle loop, rendered via `indicatif` progress bars.
///
/// Three bars are stacked vertically:
/// - Cycle bar — tracks how many cycles have completed (spinner when unbounded)
/// - Stage bar — spinner with the current stage and live status
/// - Tally bar — running success/deferral/failure counts since the run began
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally.
pub struct CycleUI {
    multi: MultiProgress,
    cycle_bar: ProgressBar,
    stage_bar: ProgressBar,
    tally_bar: ProgressBar,
    verbose: bool,
    current_cycle: AtomicU64,
    successes: AtomicU64,
    deferrals: AtomicU64,
    failures: AtomicU64,
}

impl CycleUI {
    /// Create the UI and add all three bars to the multiplex renderer.
    /// Call once at startup, before the first `start_cycle`.
    pub fn new(max_cycles: Option<u64>, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let cycle_bar = match max_cycles {
            Some(max) => {
                let bar = multi.add(ProgressBar::new(max));
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .expect("progress bar template is a valid static string")
                        .progress_chars("█▓▒░"),
                );
                bar
            }
            None => {
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{prefix:.bold.dim} {spinner} {msg}")
                        .expect("progress bar template is a valid static string"),
                );
                bar
            }
        };
        cycle_bar.set_prefix("Cycles");

        let stage_bar = multi.add(ProgressBar::new_spinner());
        stage_bar.set_style(
            ProgressStyle::default_spinner()
                .template("{prefix:.bold.dim} {spinner} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        stage_bar.set_prefix(" Stage");

        let tally_bar = multi.add(ProgressBar::new(0));
        tally_bar.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:.bold.dim} {msg}")
                .expect("progress bar template is a valid static string"),
        );
        tally_bar.set_prefix("  Tally");

        Self {
            multi,
            cycle_bar,
            stage_bar,
            tally_bar,
            verbose,
            current_cycle: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            deferrals: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails, so critical messages are never silently lost.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start_cycle(&self, cycle_number: u64, objective: &str) {
        self.current_cycle.store(cycle_number, Ordering::SeqCst);
        self.cycle_bar.set_message(format!(
            "{} {}",
            LOOP,
            style(objective).yellow()
        ));
        self.stage_bar
            .set_message(format!("cycle {} (starting...)", style(cycle_number).cyan()));
        self.stage_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Update the stage spinner to the stage about to execute.
    pub fn stage(&self, name: &str) {
        let cycle = self.current_cycle.load(Ordering::SeqCst);
        self.stage_bar.set_message(format!(
            "cycle {} {}",
            style(cycle).cyan(),
            style(name).magenta()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(name).dim()));
        }
    }

    /// Update the stage spinner with a short status string; in verbose mode
    /// the message is also printed as a dim indented line.
    pub fn log_step(&self, msg: &str) {
        let cycle = self.current_cycle.load(Ordering::SeqCst);
        self.stage_bar.set_message(format!(
            "cycle {} {}",
            style(cycle).cyan(),
            style(format!("({})", msg)).dim()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    /// A cycle ended with a commit.
    pub fn cycle_committed(&self, objective: &str, commit_sha: &str) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        let short_sha: String = commit_sha.chars().take(8).collect();
        self.print_line(format!(
            "{}{} {} {}",
            COMMIT,
            CHECK,
            style(objective).green(),
            style(format!("({})", short_sha)).dim()
        ));
        self.finish_cycle();
    }

    /// A cycle succeeded without touching the tree (validated clean, or the
    /// strategy opted out of committing).
    pub fn cycle_success_no_commit(&self, objective: &str, detail: &str) {
        self.successes.fetch_add(1, Ordering::SeqCst);
        self.print_line(format!(
            "{} {} {}",
            CHECK,
            style(objective).green(),
            style(format!("({})", detail)).dim()
        ));
        self.finish_cycle();
    }

    /// A cycle deferred behind a capacitation objective.
    pub fn cycle_deferred(&self, objective: &str, capacitation: &str) {
        self.deferrals.fetch_add(1, Ordering::SeqCst);
        self.print_line(format!(
            "{} {} {}",
            DEFER,
            style(objective).yellow(),
            style(format!("deferred behind: {}", capacitation)).dim()
        ));
        self.finish_cycle();
    }

    /// A cycle failed; regressions are shown with the rollback icon.
    pub fn cycle_failed(&self, objective: &str, reason: &str, rolled_back: bool) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let icon = if rolled_back { ROLLBACK } else { CROSS };
        self.print_line(format!(
            "{} {} {}",
            icon,
            style(objective).red(),
            style(format!("[{}]", reason)).red().dim()
        ));
        self.finish_cycle();
    }

    fn finish_cycle(&self) {
        self.cycle_bar.inc(1);
        self.stage_bar.disable_steady_tick();
        self.tally_bar.set_message(format!(
            "{} ok / {} deferred / {} failed",
            style(self.successes.load(Ordering::SeqCst)).green(),
            style(self.deferrals.load(Ordering::SeqCst)).yellow(),
            style(self.failures.load(Ordering::SeqCst)).red(),
        ));
    }

    /// Tear down the bars and print the final tally line.
    pub fn finish(&self) {
        self.stage_bar.finish_and_clear();
        self.cycle_bar.finish_and_clear();
        self.tally_bar.finish_and_clear();
        self.print_line(format!(
            "{} cycles: {} ok, {} deferred, {} failed",
            style("done.").bold(),
            style(self.successes.load(Ordering::SeqCst)).green(),
            style(self.deferrals.load(Ordering::SeqCst)).yellow(),
            style(self.failures.load(Ordering::SeqCst)).red(),
        ));
    }
}
