//! The cycle engine: per-cycle state, the stage sequencer, the outer loop,
//! and the append-only cycle log.

pub mod log;
pub mod runner;
pub mod sequencer;
pub mod state;

pub use log::{CycleLog, CycleRecord};
pub use runner::{CycleOrchestrator, RunSummary};
pub use sequencer::{SequenceFlow, SequenceReport, StageSequencer};
pub use state::{CycleOutcome, CycleState, reason};
