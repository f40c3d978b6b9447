pub mod backend;
pub mod comparator;
pub mod compiler;
pub mod error;
pub mod language;
pub mod process;
pub mod runner;
pub mod status;
pub mod workspace;

pub use backend::{ExecutionBackend, ProcessBackend};
pub use compiler::{CompileFailure, CompileFailureReason, CompileOutcome, Compiler};
pub use error::{Result, RuntimeError};
pub use language::{CommandTemplate, LanguageProfile, LanguageRegistry};
pub use process::{capabilities, Capabilities};
pub use runner::{RunExit, RunLimits, RunOutcome, Runner};
pub use status::Status;
pub use workspace::Workspace;

use std::time::Duration;

/// Default per-stream capture limit for child output.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub workspace_root: std::path::PathBuf,
    pub compile_timeout: Duration,
    pub run_grace: Duration,
    pub max_output_bytes: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::current_dir()
                .unwrap_or_default()
                .join("temp_eval_workspace"),
            compile_timeout: compiler::DEFAULT_COMPILE_TIMEOUT,
            run_grace: runner::DEFAULT_RUN_GRACE,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}
