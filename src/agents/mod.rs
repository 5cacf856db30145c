//! Completion-backed agents.
//!
//! - `research`: one-time category guidelines per run
//! - `generator`: drafts a problem with declared formula parameters
//! - `solver`: independent algebraic (A) and logical (B) solvers
//! - `prompts`: prompt text shared by all three
//!
//! Each agent issues exactly one completion call per invocation and parses
//! the reply into a typed value or an [`AgentError`].

mod generator;
pub mod prompts;
mod research;
mod solver;

pub use generator::*;
pub use research::*;
pub use solver::*;

use crate::models::QuantvalError;
use serde_json::Value;
use thiserror::Error;

/// Why an agent call produced no usable output.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("completion failed: {0}")]
    Backend(#[from] QuantvalError),

    #[error("endpoint reported error: {0}")]
    Reported(String),

    #[error("reply is missing '{0}'")]
    MissingField(&'static str),

    #[error("reply field '{field}' is invalid: {detail}")]
    InvalidField { field: &'static str, detail: String },
}

/// Reject replies carrying an `{"error": ...}` marker.
fn check_error_marker(reply: &Value) -> Result<(), AgentError> {
    match reply.get("error") {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(reason)) => Err(AgentError::Reported(reason.clone())),
        Some(other) => Err(AgentError::Reported(other.to_string())),
    }
}

/// Number from a JSON number or a numeric-looking string ("4.8 days").
fn numeric_field(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => crate::validation::extract_numeric_value(s),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// String form of a scalar JSON field.
fn text_field(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_marker() {
        assert!(check_error_marker(&json!({"question": "q"})).is_ok());
        assert!(check_error_marker(&json!({"error": null})).is_ok());
        assert!(matches!(
            check_error_marker(&json!({"error": "model overloaded"})),
            Err(AgentError::Reported(r)) if r == "model overloaded"
        ));
    }

    #[test]
    fn test_numeric_field() {
        assert_eq!(numeric_field(&json!(4.8)), Some(4.8));
        assert_eq!(numeric_field(&json!("4.8 days")), Some(4.8));
        assert_eq!(numeric_field(&json!("n/a")), None);
        assert_eq!(numeric_field(&json!([1])), None);
    }
}
