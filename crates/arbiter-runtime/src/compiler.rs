use crate::language::LanguageProfile;
use crate::process::{run_process, ProcessSpec, Termination};
use crate::workspace::Workspace;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    Ok,
    Failed(CompileFailure),
}

impl CompileOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CompileOutcome::Ok)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileFailure {
    pub stdout: String,
    pub stderr: String,
    pub reason: CompileFailureReason,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileFailureReason {
    NonZeroExit,
    Timeout(Duration),
    ToolchainNotFound(String),
    LaunchFault(String),
}

impl fmt::Display for CompileFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileFailureReason::NonZeroExit => write!(f, "Compilation failed."),
            CompileFailureReason::Timeout(limit) => {
                write!(f, "Compilation timed out after {}s.", limit.as_secs())
            }
            CompileFailureReason::ToolchainNotFound(detail) => {
                write!(f, "Compiler not found ({}). Ensure it's in PATH.", detail)
            }
            CompileFailureReason::LaunchFault(detail) => {
                write!(f, "Unexpected compilation error: {}", detail)
            }
        }
    }
}

/// Runs a profile's compile step inside a workspace.
#[derive(Debug, Clone)]
pub struct Compiler {
    timeout: Duration,
    max_output_bytes: usize,
}

impl Compiler {
    pub fn new(timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            timeout,
            max_output_bytes,
        }
    }

    /// Profiles without a compile template succeed without doing anything.
    pub async fn compile(&self, workspace: &Workspace, profile: &LanguageProfile) -> CompileOutcome {
        let Some(template) = profile.compile() else {
            debug!("No compile step for {}", profile.id());
            return CompileOutcome::Ok;
        };

        let argv = template.expand(&workspace.template_vars(profile));
        info!("Compiling {} submission in {}", profile.id(), workspace.dir().display());

        let result = run_process(ProcessSpec {
            argv,
            cwd: workspace.dir(),
            stdin: None,
            timeout: self.timeout,
            limits: None,
            max_output_bytes: self.max_output_bytes,
        })
        .await;

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_missing_program() => {
                return CompileOutcome::Failed(CompileFailure {
                    stdout: String::new(),
                    stderr: String::new(),
                    reason: CompileFailureReason::ToolchainNotFound(e.to_string()),
                });
            }
            Err(e) => {
                return CompileOutcome::Failed(CompileFailure {
                    stdout: String::new(),
                    stderr: String::new(),
                    reason: CompileFailureReason::LaunchFault(e.to_string()),
                });
            }
        };

        match output.termination {
            Termination::Exited(0) => {
                debug!("Compilation finished in {:?}", output.elapsed);
                CompileOutcome::Ok
            }
            Termination::TimedOut => CompileOutcome::Failed(CompileFailure {
                stdout: String::new(),
                stderr: String::new(),
                reason: CompileFailureReason::Timeout(self.timeout),
            }),
            Termination::Exited(_) | Termination::Signaled(_) => {
                CompileOutcome::Failed(CompileFailure {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    reason: CompileFailureReason::NonZeroExit,
                })
            }
        }
    }
}
