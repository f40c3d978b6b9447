use crate::comparator;
use crate::error::Result;
use crate::language::LanguageProfile;
use crate::process::{run_process, ProcessSpec, ResourceLimits, Termination};
use crate::status::Status;
use crate::workspace::Workspace;
use std::time::Duration;
use tracing::debug;

/// Slack added to the time limit for the wall-clock deadline.
pub const DEFAULT_RUN_GRACE: Duration = Duration::from_millis(500);

/// Stderr fragments that indicate the program ran out of memory.
pub const OUT_OF_MEMORY_MARKERS: [&str; 3] =
    ["MemoryError", "std::bad_alloc", "java.lang.OutOfMemoryError"];

#[cfg(unix)]
const SIGKILL: i32 = nix::sys::signal::Signal::SIGKILL as i32;
#[cfg(unix)]
const SIGXCPU: i32 = nix::sys::signal::Signal::SIGXCPU as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub time_limit: Duration,
    pub memory_limit_bytes: u64,
}

impl RunLimits {
    fn cpu_seconds(&self) -> u64 {
        (self.time_limit.as_secs_f64().ceil() as u64).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Exited(i32),
    Signaled(i32),
    /// Wall-clock deadline expired and the process tree was killed.
    TimedOut,
    /// Killed by the kernel for exceeding the CPU-time ceiling.
    CpuTimeExceeded,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit: RunExit,
    pub stdout: String,
    pub stderr: String,
    /// Measured wall time, or exactly the time limit for time-limit kills.
    pub elapsed: Duration,
    /// Peak resident memory; `None` where the platform cannot measure it.
    pub memory_used_bytes: Option<u64>,
}

impl RunOutcome {
    /// Post-hoc out-of-memory evidence: a known error in stderr, or a kill
    /// signal the runner did not send itself.
    pub fn out_of_memory_evidence(&self) -> bool {
        if OUT_OF_MEMORY_MARKERS
            .iter()
            .any(|marker| self.stderr.contains(marker))
        {
            return true;
        }

        #[cfg(unix)]
        {
            if self.exit == RunExit::Signaled(SIGKILL) {
                return true;
            }
        }

        false
    }

    /// Maps the run to a status, consulting the comparator on a clean exit.
    pub fn classify(&self, expected: &str) -> Status {
        match self.exit {
            RunExit::TimedOut | RunExit::CpuTimeExceeded => Status::TimeLimitExceeded,
            RunExit::Exited(0) => {
                if comparator::matches(&self.stdout, expected) {
                    Status::Accepted
                } else {
                    Status::WrongAnswer
                }
            }
            RunExit::Exited(_) | RunExit::Signaled(_) => {
                if self.out_of_memory_evidence() {
                    Status::MemoryLimitExceeded
                } else {
                    Status::RuntimeError
                }
            }
        }
    }
}

/// Executes a profile's run command once per test case.
#[derive(Debug, Clone)]
pub struct Runner {
    grace: Duration,
    max_output_bytes: usize,
}

impl Runner {
    pub fn new(grace: Duration, max_output_bytes: usize) -> Self {
        Self {
            grace,
            max_output_bytes,
        }
    }

    pub async fn run(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        input: &str,
        limits: RunLimits,
    ) -> Result<RunOutcome> {
        let argv = profile.run().expand(&workspace.template_vars(profile));
        let resource_limits = ResourceLimits {
            cpu_seconds: limits.cpu_seconds(),
            address_space_bytes: profile
                .limits_address_space()
                .then_some(limits.memory_limit_bytes),
        };

        let output = run_process(ProcessSpec {
            argv,
            cwd: workspace.dir(),
            stdin: Some(input.as_bytes().to_vec()),
            timeout: limits.time_limit + self.grace,
            limits: Some(resource_limits),
            max_output_bytes: self.max_output_bytes,
        })
        .await?;

        let exit = match output.termination {
            Termination::TimedOut => RunExit::TimedOut,
            Termination::Exited(code) => RunExit::Exited(code),
            Termination::Signaled(signal) => classify_signal(signal, output.elapsed, limits),
        };

        let elapsed = match exit {
            RunExit::TimedOut | RunExit::CpuTimeExceeded => limits.time_limit,
            _ => output.elapsed,
        };

        debug!("Run finished: {:?} in {:?}", exit, output.elapsed);

        Ok(RunOutcome {
            exit,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
            memory_used_bytes: output.peak_memory_bytes,
        })
    }
}

#[cfg(unix)]
fn classify_signal(signal: i32, elapsed: Duration, limits: RunLimits) -> RunExit {
    // SIGXCPU at the soft limit; SIGKILL at the hard limit if it was ignored
    let hard_cpu_limit = Duration::from_secs(limits.cpu_seconds() + 1);
    if signal == SIGXCPU || (signal == SIGKILL && elapsed >= hard_cpu_limit) {
        RunExit::CpuTimeExceeded
    } else {
        RunExit::Signaled(signal)
    }
}

#[cfg(not(unix))]
fn classify_signal(signal: i32, _elapsed: Duration, _limits: RunLimits) -> RunExit {
    RunExit::Signaled(signal)
}
