use crate::report::{pass_rate_percent, CaseResult, CompileDiagnostics, EvaluationReport, Summary};
use crate::submission::Submission;
use arbiter_runtime::{
    CompileOutcome, ExecutionBackend, LanguageProfile, LanguageRegistry, Status, Workspace,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const LOGGED_SOURCE_CHARS: usize = 1000;

/// Running tally over the ordered test cases of one submission.
///
/// Accepted and WrongAnswer keep the loop going; the first critical status
/// stops it and fills the remaining slots with skip markers.
#[derive(Debug)]
pub struct Aggregator {
    total: usize,
    results: Vec<CaseResult>,
    first_critical: Option<Status>,
}

impl Aggregator {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            results: Vec::with_capacity(total),
            first_critical: None,
        }
    }

    /// Appends a result. Returns the status that should stop the loop, if
    /// this result is critical.
    pub fn record(&mut self, result: CaseResult) -> Option<Status> {
        let status = result.status;
        self.results.push(result);

        if status.is_critical() {
            self.first_critical.get_or_insert(status);
            Some(status)
        } else {
            None
        }
    }

    /// Fills every slot not yet recorded with its own skipped result.
    pub fn skip_remaining(&mut self, status: Status) {
        let remaining = self.total.saturating_sub(self.results.len());
        self.results
            .extend((0..remaining).map(|_| CaseResult::skipped(status)));
    }

    pub fn finish(self) -> EvaluationReport {
        let passed = self
            .results
            .iter()
            .filter(|r| r.status == Status::Accepted)
            .count();

        let overall_status = if passed == self.total {
            Status::Accepted
        } else if let Some(status) = self.first_critical {
            status
        } else if self.total > 0 {
            Status::WrongAnswer
        } else {
            Status::InternalError
        };

        EvaluationReport {
            case_results: self.results,
            summary: Summary {
                total_cases: self.total,
                passed_cases: passed,
                pass_rate_percent: pass_rate_percent(passed, self.total),
                overall_status,
                compilation_output: None,
            },
        }
    }
}

/// The evaluation pipeline: workspace, compile, per-case run loop, report.
pub struct Evaluator {
    registry: Arc<LanguageRegistry>,
    backend: Arc<dyn ExecutionBackend>,
    workspace_root: PathBuf,
}

impl Evaluator {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        backend: Arc<dyn ExecutionBackend>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            registry,
            backend,
            workspace_root,
        }
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    pub fn workspace_root(&self) -> &PathBuf {
        &self.workspace_root
    }

    /// Grades a submission. Every failure is folded into the report, which
    /// always holds one result per test case.
    pub async fn evaluate(&self, submission: &Submission) -> EvaluationReport {
        let span = tracing::info_span!(
            "evaluation",
            id = %Uuid::new_v4().simple(),
            language = %submission.language,
        );
        self.evaluate_inner(submission).instrument(span).await
    }

    async fn evaluate_inner(&self, submission: &Submission) -> EvaluationReport {
        let total = submission.test_cases.len();
        info!(
            "Received {} submission: {} test cases, {} bytes of source",
            submission.language,
            total,
            submission.source_code.len()
        );
        debug!(
            "Source code:\n{}",
            submission
                .source_code
                .chars()
                .take(LOGGED_SOURCE_CHARS)
                .collect::<String>()
        );

        let profile = match self.registry.resolve(&submission.language) {
            Ok(profile) => profile,
            Err(e) => {
                warn!("{}", e);
                let message = e.to_string();
                return EvaluationReport::uniform(total, Status::InternalError, || {
                    CaseResult::internal_error(message.clone())
                });
            }
        };

        let workspace =
            match Workspace::acquire(&self.workspace_root, &profile, &submission.source_code).await
            {
                Ok(workspace) => workspace,
                Err(e) => {
                    error!("Could not prepare workspace: {}", e);
                    let message = e.to_string();
                    return EvaluationReport::uniform(total, Status::InternalError, || {
                        CaseResult::internal_error(message.clone())
                    });
                }
            };

        // a panic below still removes the directory through Workspace's Drop
        let report = self.evaluate_in(&workspace, &profile, submission).await;
        workspace.release().await;

        info!(
            "Evaluation finished: {} ({}/{} passed, {}%)",
            report.summary.overall_status,
            report.summary.passed_cases,
            report.summary.total_cases,
            report.summary.pass_rate_percent
        );
        report
    }

    async fn evaluate_in(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
        submission: &Submission,
    ) -> EvaluationReport {
        let total = submission.test_cases.len();

        if let CompileOutcome::Failed(failure) = self.backend.compile(workspace, profile).await {
            info!("Compilation failed: {}", failure.reason);
            return EvaluationReport::uniform(total, Status::CompileError, || {
                CaseResult::compile_error(&failure)
            })
            .with_compilation_output(CompileDiagnostics::from(&failure));
        }

        let limits = submission.limits();
        let mut aggregator = Aggregator::new(total);

        for (index, case) in submission.test_cases.iter().enumerate() {
            let result = match self
                .backend
                .run(workspace, profile, &case.input, limits)
                .await
            {
                Ok(outcome) => {
                    let status = outcome.classify(&case.expected_output);
                    CaseResult::executed(status, outcome, &case.expected_output)
                }
                Err(e) if e.is_missing_program() => {
                    warn!("Test case {}: {}", index + 1, e);
                    CaseResult::launch_failure(format!("Executable or script not found: {}", e))
                }
                Err(e) => {
                    error!("Test case {}: unexpected execution failure: {}", index + 1, e);
                    CaseResult {
                        stderr: Some(e.to_string()),
                        ..CaseResult::internal_error("Unexpected failure while running the program.")
                    }
                }
            };

            debug!("Test case {}/{}: {}", index + 1, total, result.status);

            if let Some(status) = aggregator.record(result) {
                if index + 1 < total {
                    info!(
                        "Stopping after test case {} ({}), skipping {} remaining",
                        index + 1,
                        status,
                        total - index - 1
                    );
                }
                aggregator.skip_remaining(status);
                break;
            }
        }

        aggregator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::TestCase;
    use arbiter_runtime::{
        CompileFailure, CompileFailureReason, RunExit, RunLimits, RunOutcome, RuntimeError,
    };
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Backend that echoes its input as output and never spawns anything.
    /// Inputs `TLE`, `RE`, `MLE` and `MISSING` trigger the matching failure.
    struct ScriptedBackend {
        compile_error: bool,
        compiles: AtomicUsize,
        runs: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(compile_error: bool) -> Arc<Self> {
            Arc::new(Self {
                compile_error,
                compiles: AtomicUsize::new(0),
                runs: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn compile(&self, _workspace: &Workspace, _profile: &LanguageProfile) -> CompileOutcome {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            if self.compile_error {
                CompileOutcome::Failed(CompileFailure {
                    stdout: String::new(),
                    stderr: "main.cpp:1: error".into(),
                    reason: CompileFailureReason::NonZeroExit,
                })
            } else {
                CompileOutcome::Ok
            }
        }

        async fn run(
            &self,
            workspace: &Workspace,
            _profile: &LanguageProfile,
            input: &str,
            limits: RunLimits,
        ) -> arbiter_runtime::Result<RunOutcome> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            assert!(workspace.dir().exists());

            let (exit, stderr, elapsed) = match input {
                "TLE" => (RunExit::TimedOut, "", limits.time_limit),
                "RE" => (RunExit::Exited(1), "boom", Duration::from_millis(3)),
                "MLE" => (RunExit::Exited(1), "MemoryError", Duration::from_millis(3)),
                "MISSING" => {
                    return Err(RuntimeError::LaunchFailed {
                        command: "python3 source.py".into(),
                        source: std::io::Error::from(std::io::ErrorKind::NotFound),
                    })
                }
                "FAULT" => {
                    return Err(RuntimeError::Io(std::io::Error::other("fork failed")))
                }
                _ => (RunExit::Exited(0), "", Duration::from_millis(3)),
            };

            Ok(RunOutcome {
                exit,
                stdout: input.to_string(),
                stderr: stderr.to_string(),
                elapsed,
                memory_used_bytes: Some(1024),
            })
        }
    }

    fn evaluator(backend: Arc<ScriptedBackend>, root: &tempfile::TempDir) -> Evaluator {
        Evaluator::new(
            Arc::new(LanguageRegistry::with_defaults()),
            backend,
            root.path().to_path_buf(),
        )
    }

    fn cases(pairs: &[(&str, &str)]) -> Vec<TestCase> {
        pairs.iter().map(|(i, o)| TestCase::new(*i, *o)).collect()
    }

    fn workspace_count(root: &tempfile::TempDir) -> usize {
        std::fs::read_dir(root.path()).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_all_accepted() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new("cpp", "int main(){}", cases(&[("1", "1"), ("2", "2\n")]));

        let report = evaluator(backend.clone(), &root).evaluate(&submission).await;

        assert_eq!(report.case_results.len(), 2);
        assert_eq!(report.summary.overall_status, Status::Accepted);
        assert_eq!(report.summary.pass_rate_percent, 100.0);
        assert_eq!(backend.runs.load(Ordering::SeqCst), 2);
        assert_eq!(workspace_count(&root), 0);
    }

    #[tokio::test]
    async fn test_wrong_answer_does_not_stop_evaluation() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new(
            "python",
            "",
            cases(&[("1", "x"), ("2", "2"), ("3", "y")]),
        );

        let report = evaluator(backend.clone(), &root).evaluate(&submission).await;

        assert_eq!(backend.runs.load(Ordering::SeqCst), 3);
        assert_eq!(report.summary.passed_cases, 1);
        assert_eq!(report.summary.pass_rate_percent, 33.33);
        assert_eq!(report.summary.overall_status, Status::WrongAnswer);
        assert_eq!(report.case_results[0].expected_output.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_compile_error_short_circuits() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(true);
        let submission = Submission::new(
            "cpp",
            "int main(",
            cases(&[("1", "1"), ("2", "2"), ("3", "3"), ("4", "4"), ("5", "5")]),
        );

        let report = evaluator(backend.clone(), &root).evaluate(&submission).await;

        assert_eq!(backend.runs.load(Ordering::SeqCst), 0);
        assert_eq!(report.case_results.len(), 5);
        assert!(report
            .case_results
            .iter()
            .all(|r| r.status == Status::CompileError
                && r.stderr.as_deref() == Some("main.cpp:1: error")));
        assert_eq!(report.summary.passed_cases, 0);
        assert_eq!(report.summary.pass_rate_percent, 0.0);
        assert_eq!(report.summary.overall_status, Status::CompileError);
        assert!(report.summary.compilation_output.is_some());
        assert_eq!(workspace_count(&root), 0);
    }

    #[tokio::test]
    async fn test_timeout_skips_remaining_cases() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new(
            "python",
            "",
            cases(&[("1", "1"), ("TLE", ""), ("3", "3"), ("4", "4")]),
        )
        .with_time_limit(Duration::from_secs(3));

        let report = evaluator(backend.clone(), &root).evaluate(&submission).await;

        assert_eq!(backend.runs.load(Ordering::SeqCst), 2);
        assert_eq!(report.case_results.len(), 4);
        assert_eq!(report.case_results[0].status, Status::Accepted);
        assert_eq!(report.case_results[1].status, Status::TimeLimitExceeded);
        assert_eq!(report.case_results[1].time_taken, Some(3.0));
        for skipped in &report.case_results[2..] {
            assert_eq!(skipped.status, Status::TimeLimitExceeded);
            assert!(skipped.skipped);
        }
        assert_eq!(report.summary.overall_status, Status::TimeLimitExceeded);
        assert_eq!(report.summary.pass_rate_percent, 25.0);
    }

    #[tokio::test]
    async fn test_first_critical_status_wins_over_earlier_wrong_answer() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new("python", "", cases(&[("1", "2"), ("MLE", ""), ("3", "3")]));

        let report = evaluator(backend, &root).evaluate(&submission).await;

        assert_eq!(report.case_results[0].status, Status::WrongAnswer);
        assert_eq!(report.case_results[1].status, Status::MemoryLimitExceeded);
        assert_eq!(report.summary.overall_status, Status::MemoryLimitExceeded);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_runtime_error() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new("python", "", cases(&[("MISSING", ""), ("2", "2")]));

        let report = evaluator(backend, &root).evaluate(&submission).await;

        assert_eq!(report.case_results[0].status, Status::RuntimeError);
        assert!(report.case_results[0]
            .stderr
            .as_deref()
            .unwrap()
            .contains("python3 source.py"));
        assert!(report.case_results[1].skipped);
        assert_eq!(report.summary.overall_status, Status::RuntimeError);
    }

    #[tokio::test]
    async fn test_unexpected_launch_fault_is_internal_error() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new("python", "", cases(&[("FAULT", "")]));

        let report = evaluator(backend, &root).evaluate(&submission).await;

        assert_eq!(report.case_results[0].status, Status::InternalError);
        assert_eq!(report.summary.overall_status, Status::InternalError);
    }

    #[tokio::test]
    async fn test_unsupported_language_keeps_case_count() {
        let root = tempfile::tempdir().unwrap();
        let backend = ScriptedBackend::new(false);
        let submission = Submission::new("cobol", "", cases(&[("1", "1"), ("2", "2")]));

        let report = evaluator(backend.clone(), &root).evaluate(&submission).await;

        assert_eq!(backend.compiles.load(Ordering::SeqCst), 0);
        assert_eq!(report.case_results.len(), 2);
        assert_eq!(report.summary.overall_status, Status::InternalError);
        assert!(report.case_results[0]
            .details
            .as_deref()
            .unwrap()
            .contains("cobol"));
    }

    #[tokio::test]
    async fn test_workspace_failure_is_internal_error() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();

        let evaluator = Evaluator::new(
            Arc::new(LanguageRegistry::with_defaults()),
            ScriptedBackend::new(false),
            blocker,
        );
        let submission = Submission::new("python", "", cases(&[("1", "1")]));

        let report = evaluator.evaluate(&submission).await;
        assert_eq!(report.case_results.len(), 1);
        assert_eq!(report.summary.overall_status, Status::InternalError);
    }

    #[tokio::test]
    async fn test_no_test_cases() {
        let root = tempfile::tempdir().unwrap();
        let submission = Submission::new("python", "", Vec::new());

        let report = evaluator(ScriptedBackend::new(false), &root)
            .evaluate(&submission)
            .await;

        assert!(report.case_results.is_empty());
        assert_eq!(report.summary.pass_rate_percent, 0.0);
        assert_eq!(report.summary.overall_status, Status::Accepted);
    }

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop_oneof![
            4 => Just(Status::Accepted),
            3 => Just(Status::WrongAnswer),
            1 => Just(Status::TimeLimitExceeded),
            1 => Just(Status::MemoryLimitExceeded),
            1 => Just(Status::RuntimeError),
            1 => Just(Status::InternalError),
        ]
    }

    proptest! {
        #[test]
        fn prop_aggregation_invariants(statuses in prop::collection::vec(status_strategy(), 0..12)) {
            let total = statuses.len();
            let mut aggregator = Aggregator::new(total);
            for status in &statuses {
                if let Some(critical) = aggregator.record(CaseResult::internal_error("x").with_status(*status)) {
                    aggregator.skip_remaining(critical);
                    break;
                }
            }
            let report = aggregator.finish();

            prop_assert_eq!(report.case_results.len(), total);
            let passed = report.case_results.iter().filter(|r| r.status == Status::Accepted).count();
            prop_assert_eq!(report.summary.passed_cases, passed);
            prop_assert_eq!(report.summary.pass_rate_percent, pass_rate_percent(passed, total));
            prop_assert_eq!(report.summary.overall_status == Status::Accepted, passed == total);

            if let Some(first) = statuses.iter().find(|s| s.is_critical()) {
                prop_assert_eq!(report.summary.overall_status, *first);
            }
        }
    }

    impl CaseResult {
        fn with_status(mut self, status: Status) -> Self {
            self.status = status;
            self
        }
    }
}
