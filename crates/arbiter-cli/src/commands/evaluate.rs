use anyhow::{Context, Result};
use arbiter_engine::api::parse_submission;
use arbiter_engine::Engine;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::info;

use super::load_config;

pub struct EvaluateArgs {
    pub language: String,
    pub source: PathBuf,
    pub cases: PathBuf,
    pub time_limit: Option<f64>,
    pub memory_limit_mb: Option<u64>,
    pub config: Option<PathBuf>,
}

pub async fn execute(args: EvaluateArgs) -> Result<()> {
    let config = load_config(args.config.clone())?;
    let payload = build_payload(&args)?;

    // same validation as the HTTP endpoint
    let submission = parse_submission(&payload, &config.judge)?;
    info!(
        "Evaluating {} against {} test cases",
        args.source.display(),
        submission.test_cases.len()
    );

    let engine = Engine::new(config)?;
    let report = engine.evaluator().evaluate(&submission).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn build_payload(args: &EvaluateArgs) -> Result<Value> {
    let source_code = std::fs::read_to_string(&args.source)
        .with_context(|| format!("Failed to read source file {}", args.source.display()))?;

    let cases_text = std::fs::read_to_string(&args.cases)
        .with_context(|| format!("Failed to read test cases {}", args.cases.display()))?;
    let test_cases: Value = serde_json::from_str(&cases_text)
        .with_context(|| format!("Test cases file {} is not valid JSON", args.cases.display()))?;

    let mut payload = json!({
        "language": args.language,
        "source_code": source_code,
        "test_cases": test_cases,
    });

    if let Some(time_limit) = args.time_limit {
        payload["time_limit"] = json!(time_limit);
    }
    if let Some(memory_limit_mb) = args.memory_limit_mb {
        payload["memory_limit_mb"] = json!(memory_limit_mb);
    }

    Ok(payload)
}
