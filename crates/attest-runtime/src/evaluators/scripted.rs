//! `javascript` / `python` assertions: user code graded by return shape.
//!
//! Accepted return shapes are a boolean, a number compared against the
//! assertion threshold (default: pass iff > 0), or a full
//! `{pass, score, reason}` object. Python additionally coerces the string
//! forms an interpreter bridge tends to hand back.
//!
//! Inline code failures grade as local failing results; only the
//! file-module JavaScript path, resolved before dispatch, aborts the
//! assertion path.

use serde_json::Value;

use attest_core::{Assertion, AssertError, EvaluationContext, GradingResult};

use crate::bridges::{PythonBridge, ScriptBridge};
use crate::EngineError;

const RETURN_SHAPE_ERROR: &str =
    "Custom function must return a boolean, number, or {pass, score, reason} object";

/// Interpret a script's return value as a grade.
pub fn grade_script_value(
    value: &Value,
    assertion: &Assertion,
    inverse: bool,
) -> Result<GradingResult, AssertError> {
    match value {
        Value::Bool(b) => {
            let pass = *b != inverse;
            Ok(GradingResult::from_bool(
                pass,
                format!("Custom function returned {b}"),
                assertion,
            ))
        }
        Value::Number(n) => {
            let score = n.as_f64().unwrap_or(0.0);
            let pass = match assertion.threshold {
                Some(threshold) => score >= threshold,
                None => score > 0.0,
            };
            Ok(GradingResult {
                pass,
                score,
                reason: if pass {
                    "Assertion passed".to_string()
                } else {
                    format!(
                        "Custom function returned score {score}, below the required {}",
                        assertion.threshold.unwrap_or(0.0)
                    )
                },
                assertion: Some(assertion.clone()),
                component_results: None,
                named_scores: None,
            })
        }
        Value::Object(_) => {
            let mut result = GradingResult::from_value(value)
                .ok_or_else(|| AssertError::Malformed(RETURN_SHAPE_ERROR.to_string()))?;
            if result.assertion.is_none() {
                result.assertion = Some(assertion.clone());
            }
            Ok(result)
        }
        _ => Err(AssertError::Malformed(RETURN_SHAPE_ERROR.to_string())),
    }
}

/// Python bridges tend to stringify: `"true"`/`"false"`, numeric strings,
/// and JSON-looking strings are coerced before grading.
pub fn grade_python_value(
    value: &Value,
    assertion: &Assertion,
    inverse: bool,
) -> Result<GradingResult, AssertError> {
    if let Value::String(s) = value {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("true") {
            return grade_script_value(&Value::Bool(true), assertion, inverse);
        }
        if trimmed.eq_ignore_ascii_case("false") {
            return grade_script_value(&Value::Bool(false), assertion, inverse);
        }
        if let Ok(n) = trimmed.parse::<f64>() {
            if let Some(number) = serde_json::Number::from_f64(n) {
                return grade_script_value(&Value::Number(number), assertion, inverse);
            }
        }
        if trimmed.starts_with('{') {
            let parsed: Value = serde_json::from_str(trimmed)
                .map_err(|_| AssertError::Malformed(RETURN_SHAPE_ERROR.to_string()))?;
            return grade_python_value(&parsed, assertion, inverse);
        }
        return Err(AssertError::Malformed(RETURN_SHAPE_ERROR.to_string()));
    }
    let result = grade_script_value(value, assertion, inverse)?;
    if value.is_object() {
        return Ok(enforce_python_threshold(result, assertion));
    }
    Ok(result)
}

// Object returns carry their own pass verdict; a declared threshold
// still overrides it.
fn enforce_python_threshold(mut result: GradingResult, assertion: &Assertion) -> GradingResult {
    if let Some(threshold) = assertion.threshold {
        if result.score < threshold {
            result.pass = false;
            result.reason =
                format!("Python score {} is less than threshold {threshold}", result.score);
        }
    }
    result
}

/// Evaluate inline JavaScript. Bridge errors grade as a local failure.
pub async fn javascript_inline(
    bridge: &dyn ScriptBridge,
    code: &str,
    output: &Value,
    context: &EvaluationContext,
    assertion: &Assertion,
    inverse: bool,
) -> Result<GradingResult, EngineError> {
    let value = match bridge.evaluate_inline(code, output, context).await {
        Ok(value) => value,
        Err(err) => {
            return Ok(GradingResult::failing(
                format!("Custom function threw error: {err}"),
                assertion,
            ))
        }
    };
    grade_script_value(&value, assertion, inverse).map_err(EngineError::from)
}

/// Evaluate inline Python. Bridge errors and bad return shapes grade as
/// a local failure.
pub async fn python_inline(
    bridge: &dyn PythonBridge,
    code: &str,
    output: &Value,
    context: &EvaluationContext,
    assertion: &Assertion,
    inverse: bool,
) -> Result<GradingResult, EngineError> {
    let failure = match bridge.run_inline(code, output, context).await {
        Ok(value) => match grade_python_value(&value, assertion, inverse) {
            Ok(result) => return Ok(result),
            Err(AssertError::Malformed(message)) => message,
            Err(err) => err.to_string(),
        },
        Err(err) => err.to_string(),
    };
    Ok(GradingResult::failing(
        format!("Python code execution failed: {failure}"),
        assertion,
    ))
}
