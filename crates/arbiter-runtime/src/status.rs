use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-case and overall evaluation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "Accepted")]
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Compilation Error")]
    CompileError,
    #[serde(rename = "Internal Error")]
    InternalError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Accepted => "Accepted",
            Status::WrongAnswer => "Wrong Answer",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::MemoryLimitExceeded => "Memory Limit Exceeded",
            Status::RuntimeError => "Runtime Error",
            Status::CompileError => "Compilation Error",
            Status::InternalError => "Internal Error",
        }
    }

    /// Anything other than Accepted or WrongAnswer stops the test-case loop.
    pub fn is_critical(&self) -> bool {
        !matches!(self, Status::Accepted | Status::WrongAnswer)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
