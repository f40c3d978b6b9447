pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod report;
pub mod router;
pub mod submission;

pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use evaluator::{Aggregator, Evaluator};
pub use report::{CaseResult, EvaluationReport, MemoryUsage, Summary};
pub use submission::{Submission, TestCase};
