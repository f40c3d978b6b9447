use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use arbiter_runtime::Status;
use serde_json::{json, Map, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::JudgeConfig;
use crate::evaluator::Evaluator;
use crate::report::{CaseResult, EvaluationReport, Summary};
use crate::submission::{Submission, TestCase};
use crate::EngineConfig;

const REQUIRED_FIELDS: [&str; 3] = ["language", "source_code", "test_cases"];

#[derive(Clone)]
pub struct ApiState {
    pub evaluator: Arc<Evaluator>,
    pub limiter: Arc<Semaphore>,
    pub config: Arc<EngineConfig>,
}

pub fn build_router(evaluator: Arc<Evaluator>, config: Arc<EngineConfig>) -> Router {
    let state = ApiState {
        evaluator,
        limiter: Arc::new(Semaphore::new(config.judge.max_concurrent_evaluations.max(1))),
        config,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/evaluate", post(evaluate_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn evaluate_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EvaluationReport>, ApiError> {
    if !is_json_request(&headers) {
        return Err(ApiError::BadRequest("Request must be JSON".into()));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|_| ApiError::BadRequest("Request must be JSON".into()))?;
    let submission = parse_submission(&payload, &state.config.judge)?;
    let total_cases = submission.test_cases.len();

    let permit = state.limiter.clone().acquire_owned().await.map_err(|e| {
        error!("Evaluation limiter closed: {}", e);
        ApiError::Internal { total_cases }
    })?;

    debug!(
        "Evaluation permit acquired ({} left)",
        state.limiter.available_permits()
    );

    let evaluator = state.evaluator.clone();
    let task = tokio::spawn(async move {
        let _permit = permit;
        evaluator.evaluate(&submission).await
    });

    match task.await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            error!("Critical error during evaluation: {}", e);
            Err(ApiError::Internal { total_cases })
        }
    }
}

/// Accepts `application/json` and `application/*+json` content types.
fn is_json_request(headers: &HeaderMap) -> bool {
    let Some(content_type) = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

/// Validates a request body field by field so every rejection names the
/// offending field or test-case index.
pub fn parse_submission(payload: &Value, judge: &JudgeConfig) -> Result<Submission, ApiError> {
    let body = payload
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("Request body must be a JSON object".into()))?;

    if let Some(field) = REQUIRED_FIELDS.iter().find(|f| !body.contains_key(**f)) {
        return Err(ApiError::BadRequest(format!("Missing field: {}", field)));
    }

    let language = require_string(body, "language")?;
    let source_code = require_string(body, "source_code")?;

    let raw_cases = body
        .get("test_cases")
        .and_then(Value::as_array)
        .ok_or_else(|| ApiError::BadRequest("'test_cases' must be a list".into()))?;

    let test_cases = raw_cases
        .iter()
        .enumerate()
        .map(|(index, case)| parse_test_case(index, case))
        .collect::<Result<Vec<_>, _>>()?;

    let mut submission = Submission::new(language, source_code, test_cases)
        .with_time_limit(judge.default_time_limit())
        .with_memory_limit_bytes(judge.default_memory_limit_bytes());

    if let Some(seconds) = optional_positive_number(body, "time_limit")? {
        if seconds > judge.max_time_limit_secs {
            return Err(ApiError::BadRequest(format!(
                "'time_limit' must not exceed {} seconds",
                judge.max_time_limit_secs
            )));
        }
        submission = submission.with_time_limit(Duration::from_secs_f64(seconds));
    }

    if let Some(megabytes) = optional_positive_number(body, "memory_limit_mb")? {
        let bytes = megabytes * 1024.0 * 1024.0;
        if bytes >= u64::MAX as f64 {
            return Err(ApiError::BadRequest("'memory_limit_mb' is too large".into()));
        }
        submission = submission.with_memory_limit_bytes(bytes as u64);
    }

    Ok(submission)
}

fn require_string(body: &Map<String, Value>, field: &str) -> Result<String, ApiError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::BadRequest(format!("'{}' must be a string", field)))
}

fn parse_test_case(index: usize, case: &Value) -> Result<TestCase, ApiError> {
    let invalid = || {
        ApiError::BadRequest(format!(
            "Test case at index {} must be an object with 'input' and 'expected_output'",
            index
        ))
    };

    let case = case.as_object().ok_or_else(invalid)?;
    let input = case.get("input").and_then(text_value).ok_or_else(invalid)?;
    let expected_output = case
        .get("expected_output")
        .and_then(text_value)
        .ok_or_else(invalid)?;

    Ok(TestCase::new(input, expected_output))
}

/// Strings pass through; numbers are accepted in their JSON text form.
fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn optional_positive_number(
    body: &Map<String, Value>,
    field: &str,
) -> Result<Option<f64>, ApiError> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => match value.as_f64() {
            Some(n) if n.is_finite() && n > 0.0 => Ok(Some(n)),
            _ => Err(ApiError::BadRequest(format!(
                "'{}' must be a positive number",
                field
            ))),
        },
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    /// The evaluation task failed; carries the requested case count.
    #[error("Evaluation of {total_cases} test cases failed")]
    Internal { total_cases: usize },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Internal { total_cases } => {
                let body = json!({
                    "error": "An internal server error occurred while processing the evaluation.",
                    "details": "Please contact support or check server logs.",
                    "summary": Summary::failed(total_cases, Status::InternalError),
                    "case_results": [
                        CaseResult::internal_error("Judge system failed to process request.")
                    ],
                });

                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}
