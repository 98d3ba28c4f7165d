//! Function-call / tool-call shape validation.
//!
//! The output must look like a provider function call, and each call's
//! arguments must validate against the JSON Schema the provider declared
//! for that function. Every violation is reported in `reason`; nothing
//! here aborts the run.

use serde_json::Value;

use attest_core::{Assertion, GradingResult, VarMap};

use crate::provider::{FunctionSpec, ProviderSpec};
use crate::template::TemplateEngine;

/// `is-valid-openai-function-call`: a single `{name, arguments}` object
/// with string fields.
pub fn is_valid_function_call(
    output: &Value,
    provider: Option<&ProviderSpec>,
    template: &dyn TemplateEngine,
    vars: &VarMap,
    assertion: &Assertion,
    inverse: bool,
) -> GradingResult {
    let verdict = check_function_call(output, provider, template, vars, false);
    finish(verdict, assertion, inverse)
}

/// `is-valid-openai-tools-call`: a non-empty array of
/// `{type: "function", function: {name, arguments}}` entries.
pub fn is_valid_tools_call(
    output: &Value,
    provider: Option<&ProviderSpec>,
    template: &dyn TemplateEngine,
    vars: &VarMap,
    assertion: &Assertion,
    inverse: bool,
) -> GradingResult {
    let verdict = check_tools_call(output, provider, template, vars);
    finish(verdict, assertion, inverse)
}

fn finish(verdict: Result<(), String>, assertion: &Assertion, inverse: bool) -> GradingResult {
    match verdict {
        Ok(()) if !inverse => GradingResult::passing(assertion),
        Ok(()) => GradingResult::failing(
            "Expected output not to be a valid provider call".to_string(),
            assertion,
        ),
        Err(_) if inverse => GradingResult::passing(assertion),
        Err(reason) => GradingResult::failing(reason, assertion),
    }
}

fn check_tools_call(
    output: &Value,
    provider: Option<&ProviderSpec>,
    template: &dyn TemplateEngine,
    vars: &VarMap,
) -> Result<(), String> {
    let calls = output.as_array().filter(|c| !c.is_empty()).ok_or_else(|| {
        format!(
            "Provider did not return a non-empty array of tool calls: {output}"
        )
    })?;
    for call in calls {
        let is_function = call.get("type").and_then(Value::as_str) == Some("function");
        let function = call.get("function");
        let (Some(function), true) = (function, is_function) else {
            return Err(format!(
                "Tool call is not a {{type: \"function\", function: ...}} object: {call}"
            ));
        };
        check_function_call(function, provider, template, vars, true)?;
    }
    Ok(())
}

fn check_function_call(
    output: &Value,
    provider: Option<&ProviderSpec>,
    template: &dyn TemplateEngine,
    vars: &VarMap,
    from_tool: bool,
) -> Result<(), String> {
    // String outputs may carry the call as serialized JSON.
    let parsed;
    let call = match output {
        Value::String(s) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|_| format!("Provider did not return a valid function call: {s}"))?;
            &parsed
        }
        other => other,
    };

    let name = call.get("name").and_then(Value::as_str);
    let arguments = call.get("arguments").and_then(Value::as_str);
    let (Some(name), Some(arguments)) = (name, arguments) else {
        return Err(format!(
            "Provider did not return a {{name, arguments}} function call: {call}"
        ));
    };

    let Some(provider) = provider else {
        return Err("Provider does not declare any functions or tools".to_string());
    };
    let spec = if from_tool {
        provider.tool_function_named(name)
    } else {
        provider.function_named(name)
    };
    let Some(spec) = spec else {
        return Err(format!(
            "Called function \"{name}\", but there is no function with that name"
        ));
    };

    validate_arguments(spec, arguments, template, vars)
}

fn validate_arguments(
    spec: &FunctionSpec,
    arguments: &str,
    template: &dyn TemplateEngine,
    vars: &VarMap,
) -> Result<(), String> {
    // Schemas may interpolate test vars; render before compiling.
    let schema_text = serde_json::to_string(&spec.parameters)
        .map_err(|err| format!("Function \"{}\" schema is not serializable: {err}", spec.name))?;
    let schema: Value = serde_json::from_str(&template.render(&schema_text, vars))
        .map_err(|err| format!("Function \"{}\" schema is not valid JSON after rendering: {err}", spec.name))?;
    let validator = jsonschema::options()
        .build(&schema)
        .map_err(|err| format!("Function \"{}\" schema is invalid: {err}", spec.name))?;

    let parsed: Value = serde_json::from_str(arguments)
        .map_err(|_| format!("Function \"{}\" arguments are not valid JSON: {arguments}", spec.name))?;
    let errors: Vec<String> = validator.iter_errors(&parsed).map(|e| e.to_string()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "Call to \"{}\" does not match its schema: {}",
            spec.name,
            errors.join("; ")
        ))
    }
}
