use arbiter_runtime::{CompileFailure, RunOutcome, Status};
use serde::{Serialize, Serializer};

pub const SKIPPED_DETAILS: &str = "Skipped due to previous critical error.";

/// Peak memory of a run, or a marker for platforms that cannot measure it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    Bytes(u64),
    Unsupported,
}

impl From<Option<u64>> for MemoryUsage {
    fn from(bytes: Option<u64>) -> Self {
        bytes.map_or(MemoryUsage::Unsupported, MemoryUsage::Bytes)
    }
}

impl Serialize for MemoryUsage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MemoryUsage::Bytes(bytes) => serializer.serialize_u64(*bytes),
            MemoryUsage::Unsupported => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseResult {
    pub status: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Seconds, rounded to milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_taken: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_used_bytes: Option<MemoryUsage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
}

impl CaseResult {
    fn bare(status: Status) -> Self {
        Self {
            status,
            stdout: None,
            stderr: None,
            time_taken: None,
            memory_used_bytes: None,
            expected_output: None,
            details: None,
            skipped: false,
        }
    }

    /// Result of a case that actually ran. The expected output is kept only
    /// for wrong answers.
    pub fn executed(status: Status, outcome: RunOutcome, expected_output: &str) -> Self {
        Self {
            stdout: Some(outcome.stdout),
            stderr: Some(outcome.stderr),
            time_taken: Some(round_to(outcome.elapsed.as_secs_f64(), 3)),
            memory_used_bytes: Some(outcome.memory_used_bytes.into()),
            expected_output: (status == Status::WrongAnswer).then(|| expected_output.to_string()),
            ..Self::bare(status)
        }
    }

    /// Placeholder for a case never run because an earlier case failed
    /// critically.
    pub fn skipped(status: Status) -> Self {
        Self {
            details: Some(SKIPPED_DETAILS.to_string()),
            skipped: true,
            ..Self::bare(status)
        }
    }

    pub fn compile_error(failure: &CompileFailure) -> Self {
        Self {
            stdout: Some(failure.stdout.clone()),
            stderr: Some(failure.stderr.clone()),
            details: Some(failure.reason.to_string()),
            ..Self::bare(Status::CompileError)
        }
    }

    /// The program could not be started, e.g. a missing interpreter.
    pub fn launch_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: Some(String::new()),
            stderr: Some(message.into()),
            time_taken: Some(0.0),
            ..Self::bare(Status::RuntimeError)
        }
    }

    pub fn internal_error(details: impl Into<String>) -> Self {
        Self {
            details: Some(details.into()),
            ..Self::bare(Status::InternalError)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompileDiagnostics {
    pub stdout: String,
    pub stderr: String,
    pub details: String,
}

impl From<&CompileFailure> for CompileDiagnostics {
    fn from(failure: &CompileFailure) -> Self {
        Self {
            stdout: failure.stdout.clone(),
            stderr: failure.stderr.clone(),
            details: failure.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_cases: usize,
    pub passed_cases: usize,
    pub pass_rate_percent: f64,
    pub overall_status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compilation_output: Option<CompileDiagnostics>,
}

impl Summary {
    /// Summary for a request that failed before any case could be graded.
    pub fn failed(total_cases: usize, overall_status: Status) -> Self {
        Self {
            total_cases,
            passed_cases: 0,
            pass_rate_percent: 0.0,
            overall_status,
            compilation_output: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub case_results: Vec<CaseResult>,
    pub summary: Summary,
}

impl EvaluationReport {
    /// A report where every case carries the same failure, each entry built
    /// separately by `make`.
    pub fn uniform<F>(total_cases: usize, overall_status: Status, make: F) -> Self
    where
        F: Fn() -> CaseResult,
    {
        Self {
            case_results: (0..total_cases).map(|_| make()).collect(),
            summary: Summary::failed(total_cases, overall_status),
        }
    }

    pub fn with_compilation_output(mut self, diagnostics: CompileDiagnostics) -> Self {
        self.summary.compilation_output = Some(diagnostics);
        self
    }
}

/// `100 * passed / total`, rounded to two decimals with ties to even;
/// 0.0 for no cases.
pub fn pass_rate_percent(passed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(100.0 * passed as f64 / total as f64, 2)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_runtime::{CompileFailureReason, RunExit};
    use std::time::Duration;

    #[test]
    fn test_pass_rate_rounding() {
        assert_eq!(pass_rate_percent(0, 0), 0.0);
        assert_eq!(pass_rate_percent(1, 3), 33.33);
        assert_eq!(pass_rate_percent(2, 3), 66.67);
        assert_eq!(pass_rate_percent(4, 4), 100.0);
        // 3.125 is an exact tie
        assert_eq!(pass_rate_percent(1, 32), 3.12);
        assert_eq!(pass_rate_percent(3, 32), 9.38);
    }

    #[test]
    fn test_executed_result_serialization() {
        let outcome = RunOutcome {
            exit: RunExit::Exited(0),
            stdout: "1\n".into(),
            stderr: String::new(),
            elapsed: Duration::from_micros(123_456),
            memory_used_bytes: None,
        };
        let result = CaseResult::executed(Status::WrongAnswer, outcome, "2\n");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["status"], "Wrong Answer");
        assert_eq!(json["stdout"], "1\n");
        assert_eq!(json["time_taken"], 0.123);
        assert_eq!(json["memory_used_bytes"], "N/A");
        assert_eq!(json["expected_output"], "2\n");
        assert!(json.get("skipped").is_none());
    }

    #[test]
    fn test_accepted_result_omits_expected_output() {
        let outcome = RunOutcome {
            exit: RunExit::Exited(0),
            stdout: "2\n".into(),
            stderr: String::new(),
            elapsed: Duration::from_millis(5),
            memory_used_bytes: Some(4096),
        };
        let json = serde_json::to_value(CaseResult::executed(Status::Accepted, outcome, "2")).unwrap();
        assert!(json.get("expected_output").is_none());
        assert_eq!(json["memory_used_bytes"], 4096);
    }

    #[test]
    fn test_skipped_result() {
        let json = serde_json::to_value(CaseResult::skipped(Status::TimeLimitExceeded)).unwrap();
        assert_eq!(json["status"], "Time Limit Exceeded");
        assert_eq!(json["skipped"], true);
        assert_eq!(json["details"], SKIPPED_DETAILS);
        assert!(json.get("stdout").is_none());
    }

    #[test]
    fn test_uniform_report_entries_are_independent() {
        let failure = CompileFailure {
            stdout: String::new(),
            stderr: "error: expected ';'".into(),
            reason: CompileFailureReason::NonZeroExit,
        };
        let mut report =
            EvaluationReport::uniform(3, Status::CompileError, || CaseResult::compile_error(&failure))
                .with_compilation_output(CompileDiagnostics::from(&failure));

        assert_eq!(report.case_results.len(), 3);
        assert_eq!(report.summary.pass_rate_percent, 0.0);
        assert_eq!(report.summary.overall_status, Status::CompileError);

        report.case_results[0].details = Some("changed".into());
        assert_eq!(
            report.case_results[1].details.as_deref(),
            Some("Compilation failed.")
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["summary"]["overall_status"], "Compilation Error");
        assert_eq!(
            json["summary"]["compilation_output"]["stderr"],
            "error: expected ';'"
        );
    }
}
