//! Chained calculations.
//!
//! Every step runs in its own child span under the `calculator.chain`
//! span. The first failing step stops the chain: its span and the chain
//! span both record the error and are marked failed, one error log is
//! written and the rest of the steps never run. A step whose result
//! overflows to infinity fails like any other step.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use opentelemetry::trace::Status;
use opentelemetry::KeyValue;

use super::handlers::{parse_body, reject};
use super::ops::Operator;
use super::types::{ChainRequest, ChainResponse, ChainResult, ChainStep};
use super::{CalcError, CalculatorState};
use crate::http::response::{write_failure_response, write_json};
use crate::observability::logging::logger_for;
use crate::observability::scope::RequestScope;

const OPERATION: &str = "chain";

/// Progress of one chain request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainExecutionState {
    /// Index of the next step to run.
    pub index: usize,
    pub accumulator: f64,
    pub results: Vec<ChainResult>,
    pub failure: Option<StepFailure>,
}

/// The step that stopped a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub step: usize,
    pub op: String,
    pub error: CalcError,
}

impl ChainExecutionState {
    pub fn new(initial: f64) -> Self {
        Self {
            index: 0,
            accumulator: initial,
            results: Vec::new(),
            failure: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Apply `step` to the accumulator. Leaves the state untouched on
    /// failure.
    fn apply(&self, step: &ChainStep) -> Result<f64, CalcError> {
        let op: Operator = step.op.parse().map_err(|_| CalcError::UnknownOperation {
            op: step.op.clone(),
            step: self.index,
        })?;
        let result = op
            .apply(self.accumulator, step.value)
            .ok_or(CalcError::DivisionByZeroAtStep { step: self.index })?;
        if !result.is_finite() {
            return Err(CalcError::OutOfRangeAtStep { step: self.index });
        }
        Ok(result)
    }
}

/// Run `steps` against `initial` under the chain scope `chain`.
pub fn execute(
    state: &CalculatorState,
    chain: &RequestScope,
    initial: f64,
    steps: &[ChainStep],
) -> ChainExecutionState {
    let mut exec = ChainExecutionState::new(initial);

    for step in steps {
        let i = exec.index;
        let input = exec.accumulator;
        let scope = state.spans.start_child_span(
            chain,
            format!("calculator.chain.step.{i}.{}", step.op),
            vec![
                KeyValue::new("chain.step.index", i as i64),
                KeyValue::new("chain.step.operation", step.op.clone()),
                KeyValue::new("chain.step.input", input),
                KeyValue::new("chain.step.value", step.value),
            ],
        );
        let span = scope.span();
        let start = Instant::now();

        match exec.apply(step) {
            Ok(result) => {
                let elapsed = start.elapsed();
                state.metrics.record_success(&step.op, elapsed);

                span.set_attribute(KeyValue::new("chain.step.result", result));
                span.add_event(
                    "step.complete",
                    vec![
                        KeyValue::new("input", input),
                        KeyValue::new("result", result),
                    ],
                );
                span.set_status(Status::Ok);

                crate::log_info!(
                    logger_for(&scope),
                    step = i,
                    operation = %step.op,
                    input,
                    value = step.value,
                    result,
                    duration_ms = elapsed.as_secs_f64() * 1000.0,
                    request_id = %scope.request_id(),
                    "chain step completed"
                );
                span.end();

                exec.results.push(ChainResult {
                    op: step.op.clone(),
                    value: step.value,
                    result,
                });
                exec.accumulator = result;
                exec.index += 1;
            }
            Err(error) => {
                let message = error.to_string();
                span.record_error(&error);
                span.set_status(Status::error(message.clone()));
                let parent = chain.span();
                parent.record_error(&error);
                parent.set_status(Status::error(format!("failed at step {i}")));
                state
                    .metrics
                    .errors()
                    .add(1, &[KeyValue::new("operation", step.op.clone())]);

                crate::log_error!(
                    logger_for(&scope),
                    step = i,
                    operation = %step.op,
                    error = %message,
                    request_id = %scope.request_id(),
                    "chain step failed"
                );
                span.end();

                exec.failure = Some(StepFailure {
                    step: i,
                    op: step.op.clone(),
                    error,
                });
                break;
            }
        }
    }

    exec
}

pub async fn chain(
    State(state): State<CalculatorState>,
    parent: RequestScope,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let scope = state.spans.start_child_span(
        &parent,
        "calculator.chain",
        vec![
            KeyValue::new("calculator.operation", OPERATION),
            KeyValue::new("request.id", parent.request_id().to_string()),
        ],
    );
    let response = run(&state, &scope, body);
    scope.span().end();
    response
}

fn run(state: &CalculatorState, scope: &RequestScope, body: Result<Bytes, BytesRejection>) -> Response {
    let req: ChainRequest = match parse_body(body) {
        Ok(req) => req,
        Err(e) => return reject(state, scope, OPERATION, &CalcError::InvalidBody, &e),
    };
    if req.steps.is_empty() {
        let error = CalcError::EmptyChain;
        return reject(state, scope, OPERATION, &error, &error);
    }

    let span = scope.span();
    span.set_attribute(KeyValue::new("chain.initial", req.initial));
    span.set_attribute(KeyValue::new("chain.steps_count", req.steps.len() as i64));

    let logger = logger_for(scope);
    crate::log_info!(
        logger,
        initial = req.initial,
        steps = req.steps.len(),
        request_id = %scope.request_id(),
        "starting chained calculation"
    );

    let exec = execute(state, scope, req.initial, &req.steps);

    if let Some(failure) = &exec.failure {
        return write_failure_response(
            StatusCode::BAD_REQUEST,
            &failure.error.to_string(),
            scope.request_id(),
        );
    }

    let result = exec.accumulator;
    state.metrics.record_result(OPERATION, result);

    span.set_attribute(KeyValue::new("chain.result", result));
    span.add_event(
        "chain.complete",
        vec![
            KeyValue::new("final_result", result),
            KeyValue::new("total_steps", exec.results.len() as i64),
        ],
    );
    span.set_status(Status::Ok);

    crate::log_info!(
        logger,
        initial = req.initial,
        result,
        steps = exec.results.len(),
        request_id = %scope.request_id(),
        "chained calculation completed"
    );

    write_json(ChainResponse {
        initial: req.initial,
        steps: exec.results,
        result,
        request_id: scope.request_id().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::metrics::CalculatorMetrics;
    use crate::http::request::RequestId;
    use crate::observability::testing::{InMemoryTracing, LogCapture};
    use axum::http::{HeaderMap, Method};
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    fn state(tracing: &InMemoryTracing) -> CalculatorState {
        CalculatorState {
            spans: tracing.span_manager(),
            metrics: CalculatorMetrics::register(&SdkMeterProvider::default()).unwrap(),
        }
    }

    fn chain_scope(state: &CalculatorState) -> RequestScope {
        let root = state.spans.start_root_span(
            &RequestScope::new(RequestId::from("req-1")),
            &Method::POST,
            "/calculator/chain",
            &HeaderMap::new(),
        );
        state.spans.start_child_span(&root, "calculator.chain", vec![])
    }

    fn steps(raw: &[(&str, f64)]) -> Vec<ChainStep> {
        raw.iter()
            .map(|(op, value)| ChainStep {
                op: (*op).to_owned(),
                value: *value,
            })
            .collect()
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_chain_applies_steps_in_order() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let exec = execute(
            &state,
            &scope,
            10.0,
            &steps(&[("add", 5.0), ("multiply", 2.0), ("subtract", 4.0)]),
        );

        assert!(!exec.is_failed());
        assert_eq!(exec.accumulator, 26.0);
        assert_eq!(exec.index, 3);
        let results: Vec<f64> = exec.results.iter().map(|r| r.result).collect();
        assert_eq!(results, vec![15.0, 30.0, 26.0]);

        let finished = tracing.finished_spans();
        let chain_id = scope.span_context().unwrap().span_id();
        for name in [
            "calculator.chain.step.0.add",
            "calculator.chain.step.1.multiply",
            "calculator.chain.step.2.subtract",
        ] {
            let span = finished.iter().find(|s| s.name == name).unwrap();
            assert_eq!(span.parent_span_id, chain_id);
            assert_eq!(span.status, Status::Ok);
            assert!(span.events.events.iter().any(|e| e.name == "step.complete"));
        }
    }

    #[test]
    fn test_unknown_operator_at_step_zero() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let exec = execute(&state, &scope, 10.0, &steps(&[("pow", 2.0), ("add", 1.0)]));

        assert!(exec.results.is_empty());
        assert_eq!(exec.accumulator, 10.0);
        let failure = exec.failure.unwrap();
        assert_eq!(failure.step, 0);
        assert_eq!(failure.error.to_string(), r#"unknown operation "pow" at step 0"#);

        let finished = tracing.finished_spans();
        assert!(finished.iter().any(|s| s.name == "calculator.chain.step.0.pow"));
        assert!(!finished.iter().any(|s| s.name.starts_with("calculator.chain.step.1")));
    }

    #[test]
    fn test_mid_chain_failure_marks_both_spans_and_stops() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let capture = LogCapture::default();
        let exec = {
            let _guard = capture.set_default();
            execute(
                &state,
                &scope,
                10.0,
                &steps(&[("add", 5.0), ("divide", 0.0), ("multiply", 3.0)]),
            )
        };
        scope.span().end();

        assert_eq!(exec.results.len(), 1);
        assert_eq!(exec.accumulator, 15.0);
        assert_eq!(
            exec.failure.as_ref().map(|f| f.error.clone()),
            Some(CalcError::DivisionByZeroAtStep { step: 1 })
        );

        let finished = tracing.finished_spans();
        let step = finished
            .iter()
            .find(|s| s.name == "calculator.chain.step.1.divide")
            .unwrap();
        assert_eq!(step.status, Status::error("division by zero at step 1"));
        let parent = finished.iter().find(|s| s.name == "calculator.chain").unwrap();
        assert_eq!(parent.status, Status::error("failed at step 1"));
        let exception = parent
            .events
            .events
            .iter()
            .find(|e| e.name == "exception")
            .expect("chain span records the step error");
        assert!(exception.attributes.iter().any(|kv| {
            kv.key.as_str() == "exception.message"
                && kv.value.as_str() == "division by zero at step 1"
        }));
        assert!(!finished.iter().any(|s| s.name.starts_with("calculator.chain.step.2")));

        let completed = capture
            .lines()
            .into_iter()
            .find(|l| l["message"] == "chain step completed")
            .unwrap();
        assert_eq!(completed["step"], 0);
        assert!(completed["duration_ms"].as_f64().is_some());

        let errors: Vec<_> = capture
            .lines()
            .into_iter()
            .filter(|l| l["level"] == "ERROR")
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["message"], "chain step failed");
        assert_eq!(errors[0]["step"], 1);
        assert_eq!(errors[0]["span_id"], step.span_context.span_id().to_string());
    }

    #[tokio::test]
    async fn test_chain_handler_success_body() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let body = r#"{"initial":10,"steps":[{"op":"add","value":5},{"op":"multiply","value":2},{"op":"subtract","value":4}]}"#;
        let response = run(&state, &scope, Ok(Bytes::from(body)));
        scope.span().end();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["result"], 26.0);
        assert_eq!(body["initial"], 10.0);
        assert_eq!(body["steps"].as_array().unwrap().len(), 3);
        assert_eq!(body["steps"][1]["result"], 30.0);
        assert_eq!(body["request_id"], "req-1");

        let finished = tracing.finished_spans();
        let parent = finished.iter().find(|s| s.name == "calculator.chain").unwrap();
        assert_eq!(parent.status, Status::Ok);
        assert!(parent.events.events.iter().any(|e| e.name == "chain.complete"));
    }

    #[test]
    fn test_overflowing_step_fails_at_its_index() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let exec = execute(
            &state,
            &scope,
            1e308,
            &steps(&[("add", 1.0), ("multiply", 10.0), ("subtract", 1.0)]),
        );
        scope.span().end();

        assert_eq!(exec.results.len(), 1);
        assert_eq!(
            exec.failure.as_ref().map(|f| f.error.to_string()),
            Some("result out of range at step 1".to_owned())
        );

        let finished = tracing.finished_spans();
        let step = finished
            .iter()
            .find(|s| s.name == "calculator.chain.step.1.multiply")
            .unwrap();
        assert_eq!(step.status, Status::error("result out of range at step 1"));
        assert!(!step.attributes.iter().any(|kv| kv.key.as_str() == "chain.step.result"));
        assert!(!finished.iter().any(|s| s.name.starts_with("calculator.chain.step.2")));
    }

    #[tokio::test]
    async fn test_step_without_value_applies_zero() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let body = r#"{"initial":10,"steps":[{"op":"add"},{"op":"multiply","value":3}]}"#;
        let response = run(&state, &scope, Ok(Bytes::from(body)));

        assert_eq!(response.status(), StatusCode::OK);
        let body = json(response).await;
        assert_eq!(body["steps"][0]["value"], 0.0);
        assert_eq!(body["steps"][0]["result"], 10.0);
        assert_eq!(body["result"], 30.0);
    }

    #[tokio::test]
    async fn test_chain_handler_failure_body() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let body = r#"{"initial":10,"steps":[{"op":"pow","value":2}]}"#;
        let response = run(&state, &scope, Ok(Bytes::from(body)));

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json(response).await;
        assert_eq!(body.as_object().unwrap().len(), 2);
        assert_eq!(body["error"], r#"unknown operation "pow" at step 0"#);
        assert_eq!(body["request_id"], "req-1");
    }

    #[tokio::test]
    async fn test_empty_steps_opens_no_step_spans() {
        let tracing = InMemoryTracing::new();
        let state = state(&tracing);
        let scope = chain_scope(&state);

        let response = run(&state, &scope, Ok(Bytes::from(r#"{"initial":1,"steps":[]}"#)));
        scope.span().end();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json(response).await["error"], "no steps provided");

        let finished = tracing.finished_spans();
        assert!(!finished.iter().any(|s| s.name.starts_with("calculator.chain.step")));
        let parent = finished.iter().find(|s| s.name == "calculator.chain").unwrap();
        assert_eq!(parent.status, Status::error("no steps provided"));
    }
}
