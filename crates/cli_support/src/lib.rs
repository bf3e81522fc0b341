//! Shared CLI plumbing for the cube builder and the trainer.

pub mod common;
pub mod logging;

pub use common::{build_log_path, run_timestamp, DataDirArgs, LogDirArgs, RunDirOpts};
pub use logging::init_logging;
