//! CLI command implementations.
//!
//! | Module    | Commands handled                  |
//! |-----------|-----------------------------------|
//! | `run`     | `Run`                             |
//! | `project` | `Init`, `Status`, `Log`, `Reset`  |

pub mod project;
pub mod run;

pub use project::{cmd_init, cmd_log, cmd_reset, cmd_status};
pub use run::run_cycles;
