//! Operation requests
//!
//! On the wire an operation is a single object: `operation` holds the name,
//! `address` the target, `operation-headers` the optional headers, and every
//! other key is a named parameter.

use crate::address::PathAddress;
use crate::error::{ModelError, Result};
use crate::keys;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-operation headers
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHeaders {
    /// Roll back when a runtime step reports a handled failure
    pub rollback_on_runtime_failure: bool,
    /// Overrides the controller's blocking timeout, in seconds
    pub blocking_timeout: Option<u64>,
    /// Headers this crate does not interpret
    pub other: Map<String, Value>,
}

impl Default for OperationHeaders {
    fn default() -> Self {
        Self {
            rollback_on_runtime_failure: true,
            blocking_timeout: None,
            other: Map::new(),
        }
    }
}

impl OperationHeaders {
    fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(ModelError::invalid_operation(format!(
                    "operation-headers must be an object, got {}",
                    other
                )));
            }
        };
        let mut headers = Self::default();
        for (key, value) in map {
            match key.as_str() {
                keys::ROLLBACK_ON_RUNTIME_FAILURE => {
                    headers.rollback_on_runtime_failure = as_bool(key, value)?;
                }
                keys::BLOCKING_TIMEOUT => {
                    headers.blocking_timeout = Some(as_u64(key, value)?);
                }
                _ => {
                    headers.other.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(headers)
    }

    fn to_value(&self) -> Option<Value> {
        let mut map = self.other.clone();
        if !self.rollback_on_runtime_failure {
            map.insert(keys::ROLLBACK_ON_RUNTIME_FAILURE.into(), Value::Bool(false));
        }
        if let Some(timeout) = self.blocking_timeout {
            map.insert(keys::BLOCKING_TIMEOUT.into(), Value::from(timeout));
        }
        (!map.is_empty()).then_some(Value::Object(map))
    }
}

/// An operation request. Handlers only ever see it by shared reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Operation {
    name: String,
    address: PathAddress,
    parameters: Map<String, Value>,
    headers: OperationHeaders,
}

impl Operation {
    /// Create an operation with no parameters
    pub fn new(name: impl Into<String>, address: PathAddress) -> Self {
        Self {
            name: name.into(),
            address,
            parameters: Map::new(),
            headers: OperationHeaders::default(),
        }
    }

    /// Create a `composite` operation at the root from ordered steps
    pub fn composite(steps: impl IntoIterator<Item = Operation>) -> Self {
        let steps = steps.into_iter().map(Value::from).collect();
        Self::new(keys::COMPOSITE, PathAddress::root()).param(keys::STEPS, Value::Array(steps))
    }

    /// Add a parameter
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    /// Set the rollback-on-runtime-failure header
    pub fn rollback_on_runtime_failure(mut self, rollback: bool) -> Self {
        self.headers.rollback_on_runtime_failure = rollback;
        self
    }

    /// Set the blocking-timeout header, in seconds
    pub fn blocking_timeout(mut self, seconds: u64) -> Self {
        self.headers.blocking_timeout = Some(seconds);
        self
    }

    /// Operation name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target address
    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    /// Headers
    pub fn headers(&self) -> &OperationHeaders {
        &self.headers
    }

    /// All named parameters
    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// One parameter; `null` counts as absent
    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters.get(name).filter(|v| !v.is_null())
    }

    /// A parameter that must be present
    pub fn require(&self, name: &str) -> Result<&Value> {
        self.parameter(name)
            .ok_or_else(|| ModelError::MissingParameter(name.to_string()))
    }

    /// A required string parameter
    pub fn require_str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| ModelError::invalid_parameter(name, "expected a string"))
    }

    /// A required integer parameter
    pub fn require_i64(&self, name: &str) -> Result<i64> {
        as_i64(name, self.require(name)?)
    }

    /// An optional boolean parameter with a default
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.parameter(name) {
            Some(value) => as_bool(name, value),
            None => Ok(default),
        }
    }

    /// Parse the wire form
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| ModelError::invalid_operation("operation must be an object"))?;
        let name = map
            .get(keys::OP)
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ModelError::invalid_operation("missing operation name"))?
            .to_string();
        let address = PathAddress::from_value(map.get(keys::OP_ADDR).unwrap_or(&Value::Null))?;
        let headers =
            OperationHeaders::from_value(map.get(keys::OPERATION_HEADERS).unwrap_or(&Value::Null))?;
        let parameters = map
            .iter()
            .filter(|(k, _)| {
                !matches!(k.as_str(), keys::OP | keys::OP_ADDR | keys::OPERATION_HEADERS)
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self {
            name,
            address,
            parameters,
            headers,
        })
    }

    /// Wire form
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert(keys::OP.into(), Value::String(self.name.clone()));
        map.insert(keys::OP_ADDR.into(), self.address.to_value());
        for (k, v) in &self.parameters {
            map.insert(k.clone(), v.clone());
        }
        if let Some(headers) = self.headers.to_value() {
            map.insert(keys::OPERATION_HEADERS.into(), headers);
        }
        Value::Object(map)
    }
}

impl TryFrom<Value> for Operation {
    type Error = ModelError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(&value)
    }
}

impl From<Operation> for Value {
    fn from(operation: Operation) -> Self {
        operation.to_value()
    }
}

fn as_bool(name: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(ModelError::invalid_parameter(name, "expected a boolean")),
    }
}

fn as_i64(name: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| ModelError::invalid_parameter(name, "expected an integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| ModelError::invalid_parameter(name, "expected an integer")),
        _ => Err(ModelError::invalid_parameter(name, "expected an integer")),
    }
}

fn as_u64(name: &str, value: &Value) -> Result<u64> {
    let n = as_i64(name, value)?;
    u64::try_from(n).map_err(|_| ModelError::invalid_parameter(name, "must not be negative"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wire_form() {
        let op = Operation::from_value(&json!({
            "operation": "write-attribute",
            "address": [{"child": "one"}],
            "name": "attr1",
            "value": 5,
            "operation-headers": {"rollback-on-runtime-failure": false, "blocking-timeout": "3"}
        }))
        .unwrap();

        assert_eq!(op.name(), "write-attribute");
        assert_eq!(op.address(), &PathAddress::of("child", "one"));
        assert_eq!(op.require_str("name").unwrap(), "attr1");
        assert_eq!(op.require_i64("value").unwrap(), 5);
        assert!(!op.headers().rollback_on_runtime_failure);
        assert_eq!(op.headers().blocking_timeout, Some(3));
        assert_eq!(op.parameters().len(), 2);
    }

    #[test]
    fn test_missing_name_rejected() {
        let result = Operation::from_value(&json!({"address": []}));
        assert!(matches!(result, Err(ModelError::InvalidOperation(_))));
    }

    #[test]
    fn test_parameter_accessors() {
        let op = Operation::new("good", PathAddress::root())
            .param("attr1", "7")
            .param("flag", "true")
            .param("gone", Value::Null);
        assert_eq!(op.require_i64("attr1").unwrap(), 7);
        assert!(op.bool_or("flag", false).unwrap());
        assert!(op.bool_or("other", true).unwrap());
        assert!(matches!(op.require("gone"), Err(ModelError::MissingParameter(_))));
        assert!(op.require_str("attr1").is_ok());
        assert!(op.require_str("missing").is_err());
    }

    #[test]
    fn test_composite_builder() {
        let op = Operation::composite([
            Operation::new("good", PathAddress::root()).param("attr1", 2),
            Operation::new("bad", PathAddress::root()).rollback_on_runtime_failure(false),
        ]);
        let value = op.to_value();
        assert_eq!(value["operation"], "composite");
        assert_eq!(value["address"], json!([]));
        assert_eq!(value["steps"][0]["attr1"], 2);
        assert_eq!(
            value["steps"][1]["operation-headers"]["rollback-on-runtime-failure"],
            false
        );
        assert_eq!(Operation::from_value(&value).unwrap(), op);
    }
}
