use arbiter_runtime::RunLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(2);
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

impl TestCase {
    pub fn new(input: impl Into<String>, expected_output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            expected_output: expected_output.into(),
        }
    }
}

/// One request to grade `source_code` against `test_cases`.
#[derive(Debug, Clone)]
pub struct Submission {
    pub language: String,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
    pub time_limit: Duration,
    pub memory_limit_bytes: u64,
}

impl Submission {
    pub fn new(
        language: impl Into<String>,
        source_code: impl Into<String>,
        test_cases: Vec<TestCase>,
    ) -> Self {
        Self {
            language: language.into(),
            source_code: source_code.into(),
            test_cases,
            time_limit: DEFAULT_TIME_LIMIT,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    pub fn limits(&self) -> RunLimits {
        RunLimits {
            time_limit: self.time_limit,
            memory_limit_bytes: self.memory_limit_bytes,
        }
    }
}
