//! Operation responses

use crate::keys;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Final outcome of an operation or of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The step completed and its effects were kept
    Success,
    /// The step failed
    Failed,
    /// The controller honoured a cancellation request
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Process state reported in the top-level `process-state` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessStateHeader {
    /// Configuration changes wait for a reload
    ReloadRequired,
    /// Configuration changes wait for a restart
    RestartRequired,
}

/// `response-headers` of a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ResponseHeaders {
    /// Step put the process in reload-required
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub operation_requires_reload: bool,
    /// Step put the process in restart-required
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub operation_requires_restart: bool,
    /// Step did not apply its change to the running process
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub runtime_update_skipped: bool,
    /// Process state, present only when the operation changed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_state: Option<ProcessStateHeader>,
}

impl ResponseHeaders {
    /// Whether no header is set
    pub fn is_empty(&self) -> bool {
        !self.operation_requires_reload
            && !self.operation_requires_restart
            && !self.runtime_update_skipped
            && self.process_state.is_none()
    }
}

/// Response to an operation (or, nested in a composite result, to a step)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OperationResponse {
    /// Outcome
    pub outcome: Outcome,
    /// Operation-specific payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    /// Present iff the step failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_description: Option<Value>,
    /// Present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back: Option<bool>,
    /// Response headers
    #[serde(default, skip_serializing_if = "ResponseHeaders::is_empty")]
    pub response_headers: ResponseHeaders,
}

impl OperationResponse {
    /// A successful response carrying `result`
    pub fn success(result: Value) -> Self {
        Self {
            outcome: Outcome::Success,
            result,
            failure_description: None,
            rolled_back: None,
            response_headers: ResponseHeaders::default(),
        }
    }

    /// A failed response
    pub fn failed(description: impl Into<Value>, rolled_back: bool) -> Self {
        Self {
            outcome: Outcome::Failed,
            result: Value::Null,
            failure_description: Some(description.into()),
            rolled_back: Some(rolled_back),
            response_headers: ResponseHeaders::default(),
        }
    }

    /// Whether the outcome is success
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    /// Failure description as text, if it is a plain string
    pub fn failure_message(&self) -> Option<&str> {
        self.failure_description.as_ref().and_then(Value::as_str)
    }

    /// Nested response of composite step `n` (1-indexed)
    pub fn step(&self, n: usize) -> Option<OperationResponse> {
        let step = self.result.get(format!("step-{}", n))?;
        serde_json::from_value(step.clone()).ok()
    }

    /// Wire form
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(keys::OUTCOME.into(), Value::String(self.outcome.to_string()));
        if !self.result.is_null() {
            map.insert(keys::RESULT.into(), self.result.clone());
        }
        if let Some(fd) = &self.failure_description {
            map.insert(keys::FAILURE_DESCRIPTION.into(), fd.clone());
        }
        if let Some(rolled_back) = self.rolled_back {
            map.insert(keys::ROLLED_BACK.into(), Value::Bool(rolled_back));
        }
        if !self.response_headers.is_empty() {
            let headers = serde_json::to_value(&self.response_headers).unwrap_or(Value::Null);
            map.insert(keys::RESPONSE_HEADERS.into(), headers);
        }
        Value::Object(map)
    }
}
