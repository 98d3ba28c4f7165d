//! Deterministic evaluator families.
//!
//! Every matcher takes [`MatcherArgs`] and returns a
//! [`GradingResult`](crate::types::GradingResult), or an
//! [`AssertError`](crate::error::AssertError) when the assertion
//! definition itself is broken. Content mismatches are never errors.

use serde_json::Value;

use crate::error::AssertError;
use crate::types::Assertion;

pub mod json;
pub mod metrics;
pub mod sql;
pub mod text;

/// Common inputs for deterministic matchers.
#[derive(Debug, Clone, Copy)]
pub struct MatcherArgs<'a> {
    /// The raw model output.
    pub output: &'a Value,
    /// The output coerced to a string (JSON-serialized when structured).
    pub output_text: &'a str,
    /// The resolved comparison value, if any.
    pub rendered: Option<&'a Value>,
    /// Whether the assertion carried the `not-` prefix.
    pub inverse: bool,
    /// The assertion under evaluation.
    pub assertion: &'a Assertion,
}

/// Coerce a model output to a string: strings pass through, structured
/// outputs are JSON-serialized.
pub fn coerce_string(output: &Value) -> String {
    match output {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a comparison value as a plain string, accepting strings and
/// numbers.
pub(crate) fn value_as_text(
    rendered: Option<&Value>,
    assertion_type: &str,
) -> Result<String, AssertError> {
    match rendered {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(AssertError::Malformed(format!(
            "\"{assertion_type}\" assertion type must have a string or number value"
        ))),
    }
}

/// Interpret a comparison value as a list of strings.
///
/// A plain string is comma-split and trimmed; an array is taken
/// element-wise. `contains-all("a,b")` is equivalent to
/// `contains-all(["a","b"])`.
pub(crate) fn value_as_list(
    rendered: Option<&Value>,
    assertion_type: &str,
) -> Result<Vec<String>, AssertError> {
    match rendered {
        Some(Value::String(s)) => Ok(s.split(',').map(|v| v.trim().to_string()).collect()),
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect()),
        _ => Err(AssertError::Malformed(format!(
            "\"{assertion_type}\" assertion type must have an array value"
        ))),
    }
}
