//! Child process execution with a wall-clock deadline, bounded output
//! capture and process-group teardown.
//!
//! Every child is placed in its own process group (unix), so the whole tree
//! it spawns can be killed at once. Teardown happens on timeout and after a
//! normal exit, which also unblocks the output readers if a grandchild kept
//! a pipe open.

use crate::error::{Result, RuntimeError};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long to wait for output pipes to close after the child is gone.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Interval between peak-memory samples.
#[cfg(target_os = "linux")]
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(5);

/// Per-process ceilings applied in the child before it execs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Soft CPU-time limit in whole seconds; the hard limit is one second more.
    pub cpu_seconds: u64,
    pub address_space_bytes: Option<u64>,
}

/// Which enforcement mechanisms this build can apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub cpu_time_limit: bool,
    pub address_space_limit: bool,
    pub memory_measurement: bool,
    pub process_group_kill: bool,
}

pub fn capabilities() -> Capabilities {
    Capabilities {
        cpu_time_limit: cfg!(unix),
        address_space_limit: cfg!(target_os = "linux"),
        memory_measurement: cfg!(target_os = "linux"),
        process_group_kill: cfg!(unix),
    }
}

#[derive(Debug)]
pub struct ProcessSpec<'a> {
    pub argv: Vec<String>,
    pub cwd: &'a Path,
    pub stdin: Option<Vec<u8>>,
    pub timeout: Duration,
    pub limits: Option<ResourceLimits>,
    pub max_output_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

impl Termination {
    pub fn success(&self) -> bool {
        matches!(self, Termination::Exited(0))
    }

    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return Termination::Signaled(signal);
            }
        }
        Termination::Exited(status.code().unwrap_or(-1))
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    /// `None` only where memory measurement is unsupported. A process that
    /// exits before the first sample reports `Some(0)`.
    pub peak_memory_bytes: Option<u64>,
}

pub async fn run_process(spec: ProcessSpec<'_>) -> Result<ProcessOutput> {
    let command_line = spec.argv.join(" ");
    let (program, args) = spec.argv.split_first().ok_or_else(|| RuntimeError::LaunchFailed {
        command: command_line.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(spec.cwd)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    unix::configure(&mut cmd, spec.limits);

    debug!("Spawning: {}", command_line);
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| RuntimeError::LaunchFailed {
        command: command_line.clone(),
        source,
    })?;
    let pid = child.id();

    let stdin_task = match (child.stdin.take(), spec.stdin) {
        (Some(mut pipe), Some(input)) => Some(tokio::spawn(async move {
            if let Err(e) = pipe.write_all(&input).await {
                // the child may exit without consuming its input
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    debug!("Failed to write child stdin: {}", e);
                }
            }
        })),
        _ => None,
    };

    let stdout_capture = child
        .stdout
        .take()
        .map(|pipe| OutputCapture::spawn(pipe, spec.max_output_bytes));
    let stderr_capture = child
        .stderr
        .take()
        .map(|pipe| OutputCapture::spawn(pipe, spec.max_output_bytes));

    let peak_memory = Arc::new(AtomicU64::new(0));
    let sampler = spawn_memory_sampler(pid, peak_memory.clone());

    let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
    let elapsed = start.elapsed();

    let outcome = match waited {
        Ok(Ok(status)) => {
            kill_process_group(pid);
            Ok(Termination::from_status(status))
        }
        Ok(Err(e)) => {
            kill_process_group(pid);
            if let Err(kill_err) = child.kill().await {
                debug!("Failed to kill child after wait error: {}", kill_err);
            }
            Err(RuntimeError::Io(e))
        }
        Err(_) => {
            debug!("Deadline of {:?} expired for: {}", spec.timeout, command_line);
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                warn!("Failed to kill timed out child {:?}: {}", pid, e);
            }
            Ok(Termination::TimedOut)
        }
    };

    if let Some(sampler) = sampler {
        sampler.abort();
    }
    if let Some(task) = stdin_task {
        task.abort();
    }
    let stdout = OutputCapture::finish(stdout_capture).await;
    let stderr = OutputCapture::finish(stderr_capture).await;

    let termination = outcome?;
    let peak = peak_memory.load(Ordering::Relaxed);

    Ok(ProcessOutput {
        termination,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed,
        peak_memory_bytes: capabilities().memory_measurement.then_some(peak),
    })
}

/// A pipe reader task filling a buffer that stays readable if the task has
/// to be abandoned.
struct OutputCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl OutputCapture {
    fn spawn<R>(reader: R, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(read_capped(reader, cap, buffer.clone()));
        Self { buffer, task }
    }

    /// Waits for the pipe to close. A pipe held open by a detached
    /// grandchild yields whatever was captured before the drain timeout.
    async fn finish(capture: Option<Self>) -> Vec<u8> {
        let Some(mut capture) = capture else {
            return Vec::new();
        };

        match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, &mut capture.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!("Failed to read child output: {}", e),
            Ok(Err(e)) => warn!("Output reader task failed: {}", e),
            Err(_) => {
                capture.task.abort();
                warn!(
                    "Output pipe still open after child exit, keeping {} captured bytes",
                    lock(&capture.buffer).len()
                );
            }
        }

        let mut captured = lock(&capture.buffer);
        std::mem::take(&mut *captured)
    }
}

fn lock(buffer: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buffer.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_capped<R>(
    mut reader: R,
    cap: usize,
    buffer: Arc<Mutex<Vec<u8>>>,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut captured = 0usize;
    let mut discarded = 0u64;

    // keep draining past the cap so the child never blocks on a full pipe
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let keep = read.min(cap - captured);
        if keep > 0 {
            lock(&buffer).extend_from_slice(&chunk[..keep]);
            captured += keep;
        }
        discarded += (read - keep) as u64;
    }

    if discarded > 0 {
        debug!("Discarded {} output bytes beyond the {} byte cap", discarded, cap);
    }
    Ok(())
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    unix::kill_process_group(pid)
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(target_os = "linux")]
fn spawn_memory_sampler(pid: Option<u32>, peak: Arc<AtomicU64>) -> Option<JoinHandle<()>> {
    let pid = pid?;
    Some(tokio::spawn(async move {
        let status_path = format!("/proc/{}/status", pid);
        loop {
            let Ok(status) = tokio::fs::read_to_string(&status_path).await else {
                break;
            };
            // zombies carry no memory lines
            let Some(hwm) = parse_vm_hwm(&status) else {
                break;
            };
            peak.fetch_max(hwm, Ordering::Relaxed);
            tokio::time::sleep(MEMORY_SAMPLE_INTERVAL).await;
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn spawn_memory_sampler(_pid: Option<u32>, _peak: Arc<AtomicU64>) -> Option<JoinHandle<()>> {
    None
}

/// Extracts the peak resident set size (`VmHWM`) in bytes.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_vm_hwm(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmHWM:"))
        .and_then(|rest| rest.trim().trim_end_matches("kB").trim().parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

#[cfg(unix)]
mod unix {
    use super::ResourceLimits;
    use nix::sys::resource::{setrlimit, Resource};
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::{setpgid, Pid};
    use tokio::process::Command;
    use tracing::debug;

    pub(super) fn configure(cmd: &mut Command, limits: Option<ResourceLimits>) {
        // SAFETY: the closure only issues async-signal-safe syscalls
        // (setpgid, setrlimit) and does not allocate.
        unsafe {
            cmd.pre_exec(move || {
                setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                if let Some(limits) = limits {
                    apply_limits(limits)?;
                }
                Ok(())
            });
        }
    }

    fn apply_limits(limits: ResourceLimits) -> nix::Result<()> {
        setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
        setrlimit(
            Resource::RLIMIT_CPU,
            limits.cpu_seconds,
            limits.cpu_seconds.saturating_add(1),
        )?;

        #[cfg(target_os = "linux")]
        {
            if let Some(bytes) = limits.address_space_bytes {
                setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
            }
        }

        Ok(())
    }

    pub(super) fn kill_process_group(pid: Option<u32>) {
        let Some(pid) = pid else {
            return;
        };
        match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => debug!("killpg({}) failed: {}", pid, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vm_hwm() {
        let status = "Name:\tcat\nVmPeak:\t  8000 kB\nVmHWM:\t    1024 kB\nVmRSS:\t 900 kB\n";
        assert_eq!(parse_vm_hwm(status), Some(1024 * 1024));
        assert_eq!(parse_vm_hwm("Name:\tzombie\nState:\tZ (zombie)\n"), None);
    }

    #[tokio::test]
    async fn test_empty_command_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_process(ProcessSpec {
            argv: Vec::new(),
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(1),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RuntimeError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_process(ProcessSpec {
            argv: vec!["definitely-not-a-real-binary-4821".into()],
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(1),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap_err();
        assert!(err.is_missing_program());
        assert!(err.to_string().contains("definitely-not-a-real-binary-4821"));
    }

    #[cfg(unix)]
    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_stdin_roundtrip_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_process(ProcessSpec {
            argv: sh("cat; echo oops >&2; exit 3"),
            cwd: dir.path(),
            stdin: Some(b"hello\n".to_vec()),
            timeout: Duration::from_secs(5),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap();

        assert_eq!(output.termination, Termination::Exited(3));
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_whole_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("(sleep 1; touch {}) & sleep 30", marker.display());

        let start = Instant::now();
        let output = run_process(ProcessSpec {
            argv: sh(&script),
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_millis(300),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap();

        assert_eq!(output.termination, Termination::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "background child outlived the timeout");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_process(ProcessSpec {
            argv: sh("i=0; while [ $i -lt 200 ]; do echo 0123456789; i=$((i+1)); done"),
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(5),
            limits: None,
            max_output_bytes: 64,
        })
        .await
        .unwrap();

        assert!(output.termination.success());
        assert_eq!(output.stdout.len(), 64);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_detached_writer_keeps_captured_output() {
        let setsid_available = std::process::Command::new("setsid")
            .arg("true")
            .status()
            .map(|status| status.success())
            .unwrap_or(false);
        if !setsid_available {
            eprintln!("setsid not found, skipping");
            return;
        }

        // the detached sleeper leaves the process group but inherits stdout
        let dir = tempfile::tempdir().unwrap();
        let output = run_process(ProcessSpec {
            argv: sh("echo hello; setsid sleep 4 2>/dev/null &"),
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(5),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap();

        assert_eq!(output.termination, Termination::Exited(0));
        assert_eq!(output.stdout, "hello\n");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_short_lived_process_still_reports_memory() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_process(ProcessSpec {
            argv: vec!["true".into()],
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(5),
            limits: None,
            max_output_bytes: 1024,
        })
        .await
        .unwrap();

        assert!(output.termination.success());
        assert!(output.peak_memory_bytes.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cpu_limit_terminates_busy_loop() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_process(ProcessSpec {
            argv: sh("while :; do :; done"),
            cwd: dir.path(),
            stdin: None,
            timeout: Duration::from_secs(10),
            limits: Some(ResourceLimits {
                cpu_seconds: 1,
                address_space_bytes: None,
            }),
            max_output_bytes: 1024,
        })
        .await
        .unwrap();

        assert!(matches!(output.termination, Termination::Signaled(_)));
    }
}
