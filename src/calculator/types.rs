//! Request and response bodies.

use serde::{Deserialize, Serialize};

/// Operands of a single operation. A missing operand reads as zero.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CalcRequest {
    #[serde(default)]
    pub a: f64,
    #[serde(default)]
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcResponse {
    pub operation: String,
    pub a: f64,
    pub b: f64,
    pub result: f64,
    pub request_id: String,
}

/// One chain step as sent by the client. The operator stays text until
/// the step runs, so an unknown operator fails at its own index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainStep {
    pub op: String,
    #[serde(default)]
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChainRequest {
    #[serde(default)]
    pub initial: f64,
    #[serde(default)]
    pub steps: Vec<ChainStep>,
}

/// Outcome of one applied step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResult {
    pub op: String,
    pub value: f64,
    pub result: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub initial: f64,
    pub steps: Vec<ChainResult>,
    pub result: f64,
    pub request_id: String,
}
