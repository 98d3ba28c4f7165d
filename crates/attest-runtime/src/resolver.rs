//! Value resolution: turns a declared assertion value into the concrete
//! comparison value an evaluator sees.
//!
//! Resolution handles three concerns, in order: `file://` references
//! (documents, text, or scripts run through a code bridge), template
//! rendering against test vars, and element-wise rendering of arrays.
//! Each assertion touches the filesystem or a bridge at most once per
//! evaluation.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use attest_core::{Assertion, AssertError, EvaluationContext, GradingResult};

use crate::bridges::{BridgeError, PythonBridge, ScriptBridge};
use crate::template::TemplateEngine;
use crate::EngineError;

/// A resolved comparison value.
#[derive(Debug, Clone, Default)]
pub struct ResolvedValue {
    /// The value evaluators compare against, if the assertion had one.
    pub rendered: Option<Value>,

    /// Set when the value came from executing a script file. Schema-style
    /// evaluators use this instead of re-reading the reference string.
    pub from_script: Option<Value>,
}

/// Outcome of resolving one assertion's value.
#[derive(Debug, Clone)]
pub enum Resolution {
    Ready(ResolvedValue),
    /// Resolution itself produced the grade (a python bridge failure
    /// converts locally instead of aborting the run).
    Failed(GradingResult),
}

pub struct ValueResolver<'a> {
    base_path: &'a Path,
    template: &'a dyn TemplateEngine,
    script: Option<&'a dyn ScriptBridge>,
    python: Option<&'a dyn PythonBridge>,
}

impl<'a> ValueResolver<'a> {
    pub fn new(
        base_path: &'a Path,
        template: &'a dyn TemplateEngine,
        script: Option<&'a dyn ScriptBridge>,
        python: Option<&'a dyn PythonBridge>,
    ) -> Self {
        Self {
            base_path,
            template,
            script,
            python,
        }
    }

    pub async fn resolve(
        &self,
        assertion: &Assertion,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Resolution, EngineError> {
        let Some(value) = &assertion.value else {
            return Ok(Resolution::Ready(ResolvedValue::default()));
        };

        match value {
            Value::String(s) => {
                if let Some(reference) = s.strip_prefix("file://") {
                    self.resolve_file(reference, assertion, output, context)
                        .await
                } else {
                    let rendered = self.template.render(s, &context.vars);
                    Ok(ready(Value::String(rendered), None))
                }
            }
            Value::Array(items) => {
                let rendered = items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => {
                            Value::String(self.template.render(s, &context.vars))
                        }
                        other => other.clone(),
                    })
                    .collect();
                Ok(ready(Value::Array(rendered), None))
            }
            other => Ok(ready(other.clone(), None)),
        }
    }

    async fn resolve_file(
        &self,
        reference: &str,
        assertion: &Assertion,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Resolution, EngineError> {
        let path = self.join(reference);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match extension.as_str() {
            "js" | "cjs" | "mjs" => {
                let bridge = self
                    .script
                    .ok_or(EngineError::CollaboratorMissing("script bridge"))?;
                let value = bridge
                    .evaluate_module(&path, output, context)
                    .await
                    .map_err(|err| match err {
                        BridgeError::NotCallable(message) => {
                            AssertError::Malformed(message)
                        }
                        BridgeError::Execution(message) => AssertError::Malformed(format!(
                            "Script {} failed: {message}",
                            path.display()
                        )),
                    })?;
                Ok(ready(value.clone(), Some(value)))
            }
            "py" => {
                let bridge = self
                    .python
                    .ok_or(EngineError::CollaboratorMissing("python bridge"))?;
                match bridge.run_file(&path, output, context).await {
                    Ok(value) => Ok(ready(value.clone(), Some(value))),
                    Err(err) => Ok(Resolution::Failed(GradingResult::failing(
                        format!("Python script error: {err}"),
                        assertion,
                    ))),
                }
            }
            "json" => {
                let contents = self.read(&path)?;
                let parsed: Value =
                    serde_json::from_str(&contents).map_err(|err| AssertError::ParseFile {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    })?;
                Ok(ready(parsed, None))
            }
            "yaml" | "yml" => {
                let contents = self.read(&path)?;
                let parsed: Value =
                    serde_yaml::from_str(&contents).map_err(|err| AssertError::ParseFile {
                        path: path.display().to_string(),
                        message: err.to_string(),
                    })?;
                Ok(ready(parsed, None))
            }
            "txt" => {
                let contents = self.read(&path)?;
                Ok(ready(
                    Value::String(contents.trim_end_matches('\n').to_string()),
                    None,
                ))
            }
            _ => Err(AssertError::UnsupportedFileType(path.display().to_string()).into()),
        }
    }

    fn join(&self, reference: &str) -> PathBuf {
        let reference = Path::new(reference);
        if reference.is_absolute() {
            reference.to_path_buf()
        } else {
            self.base_path.join(reference)
        }
    }

    fn read(&self, path: &Path) -> Result<String, AssertError> {
        fs::read_to_string(path).map_err(|source| AssertError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

fn ready(rendered: Value, from_script: Option<Value>) -> Resolution {
    Resolution::Ready(ResolvedValue {
        rendered: Some(rendered),
        from_script,
    })
}
