//! JSON validity matchers.
//!
//! `is-json` parses the whole output; `contains-json` extracts embedded
//! JSON objects. Both optionally validate against a JSON Schema supplied
//! inline, as an object, or loaded through the Value Resolver's script
//! side-channel.

use jsonschema::Validator;
use serde_json::Value;

use crate::error::AssertError;
use crate::matchers::MatcherArgs;
use crate::types::GradingResult;

fn compile_schema(
    rendered: &Value,
    from_script: Option<&Value>,
    assertion_type: &str,
) -> Result<Validator, AssertError> {
    let schema_value: Value = match rendered {
        Value::String(s) if s.starts_with("file://") => from_script
            .cloned()
            .ok_or_else(|| {
                AssertError::Malformed(format!(
                    "{assertion_type} references a file that does not export a JSON schema"
                ))
            })?,
        // Inline schema strings are YAML-parsed; YAML is a JSON superset.
        Value::String(s) => serde_yaml::from_str(s).map_err(|err| {
            AssertError::Malformed(format!("{assertion_type} schema is not parseable: {err}"))
        })?,
        Value::Object(_) => rendered.clone(),
        _ => {
            return Err(AssertError::Malformed(format!(
                "{assertion_type} assertion must have a string or object value"
            )))
        }
    };
    jsonschema::options()
        .build(&schema_value)
        .map_err(|err| AssertError::Malformed(format!("{assertion_type} schema is invalid: {err}")))
}

fn schema_errors(validator: &Validator, instance: &Value) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        None
    } else {
        Some(errors.join("; "))
    }
}

/// Pass when the output parses as JSON, optionally validating against a
/// supplied JSON Schema.
pub fn is_json(args: &MatcherArgs, from_script: Option<&Value>) -> Result<GradingResult, AssertError> {
    let parsed: Option<Value> = serde_json::from_str(args.output_text).ok();
    let mut pass = if parsed.is_some() {
        !args.inverse
    } else {
        args.inverse
    };

    if pass {
        if let (Some(rendered), Some(parsed)) = (args.rendered, &parsed) {
            let validator = compile_schema(rendered, from_script, "is-json")?;
            if let Some(errors) = schema_errors(&validator, parsed) {
                return Ok(GradingResult::failing(
                    format!("JSON does not conform to the provided schema. Errors: {errors}"),
                    args.assertion,
                ));
            }
            pass = true;
        }
    }

    Ok(GradingResult::from_bool(
        pass,
        "Expected output to be valid JSON".to_string(),
        args.assertion,
    ))
}

/// Pass when the output contains at least one embedded JSON object; with
/// a schema, pass when *any* extracted object validates.
pub fn contains_json(
    args: &MatcherArgs,
    from_script: Option<&Value>,
) -> Result<GradingResult, AssertError> {
    let objects = extract_json_objects(args.output_text);
    let mut pass = if args.inverse {
        objects.is_empty()
    } else {
        !objects.is_empty()
    };
    let mut error_message = "Expected output to contain valid JSON".to_string();

    if let Some(rendered) = args.rendered {
        let validator = compile_schema(rendered, from_script, "contains-json")?;
        for object in &objects {
            match schema_errors(&validator, object) {
                None => {
                    pass = true;
                    break;
                }
                Some(errors) => {
                    pass = false;
                    error_message = format!(
                        "JSON does not conform to the provided schema. Errors: {errors}"
                    );
                }
            }
        }
    }

    Ok(GradingResult::from_bool(pass, error_message, args.assertion))
}

/// Scan text for balanced `{...}` spans that parse as JSON objects.
pub fn extract_json_objects(text: &str) -> Vec<Value> {
    let bytes = text.as_bytes();
    let mut objects = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        if let Some(end) = matching_brace(text, i) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[i..=end]) {
                if value.is_object() {
                    objects.push(value);
                    i = end + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    objects
}

/// Index of the brace closing the one at `start`, tracking strings and
/// escapes.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Assertion;
    use serde_json::json;

    fn run(
        output_text: &str,
        rendered: Option<Value>,
        inverse: bool,
        matcher: fn(&MatcherArgs, Option<&Value>) -> Result<GradingResult, AssertError>,
    ) -> Result<GradingResult, AssertError> {
        let assertion = Assertion::of_type("is-json");
        let output = Value::String(output_text.to_string());
        matcher(
            &MatcherArgs {
                output: &output,
                output_text,
                rendered: rendered.as_ref(),
                inverse,
                assertion: &assertion,
            },
            None,
        )
    }

    #[test]
    fn test_is_json_valid_object() {
        let result = run(r#"{"a": 1}"#, None, false, is_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_is_json_invalid_output() {
        let result = run("definitely not json", None, false, is_json).unwrap();
        assert!(!result.pass);
        assert_eq!(result.reason, "Expected output to be valid JSON");
    }

    #[test]
    fn test_is_json_inverse() {
        let result = run("definitely not json", None, true, is_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_is_json_schema_pass() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "required": ["a"]
        });
        let result = run(r#"{"a": 1}"#, Some(schema), false, is_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_is_json_schema_failure_reports_errors() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "integer"}},
            "required": ["a"]
        });
        let result = run(r#"{"b": 2}"#, Some(schema), false, is_json).unwrap();
        assert!(!result.pass);
        assert!(result
            .reason
            .starts_with("JSON does not conform to the provided schema."));
    }

    #[test]
    fn test_is_json_inline_schema_string() {
        let schema = json!("type: object\nrequired: [a]\n");
        let result = run(r#"{"a": 1}"#, Some(schema), false, is_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_is_json_rejects_numeric_schema_value() {
        let result = run(r#"{"a": 1}"#, Some(json!(5)), false, is_json);
        assert!(matches!(result, Err(AssertError::Malformed(_))));
    }

    #[test]
    fn test_contains_json_finds_embedded_object() {
        let output = r#"Sure, here you go: {"a": 1} — anything else?"#;
        let result = run(output, None, false, contains_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_contains_json_any_object_may_validate() {
        let schema = json!({
            "type": "object",
            "required": ["winner"]
        });
        let output = r#"first {"loser": 1} then {"winner": 2}"#;
        let result = run(output, Some(schema), false, contains_json).unwrap();
        assert!(result.pass);
    }

    #[test]
    fn test_contains_json_no_object() {
        let result = run("plain text", None, false, contains_json).unwrap();
        assert!(!result.pass);
    }

    #[test]
    fn test_extract_json_objects_handles_nesting_and_strings() {
        let text = r#"a {"x": {"y": "br{ace}"}} b {"z": 1}"#;
        let objects = extract_json_objects(text);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["x"]["y"], "br{ace}");
        assert_eq!(objects[1]["z"], 1);
    }

    #[test]
    fn test_extract_json_objects_skips_unbalanced() {
        assert!(extract_json_objects("{ not json {").is_empty());
    }
}
