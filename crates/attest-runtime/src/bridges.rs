//! Code-bridge collaborators for scripted assertions.
//!
//! Scripted assertions and `file://` script values execute through these
//! traits; the engine never embeds an interpreter. A bridge returns the
//! script's raw value and the engine coerces it into a grade.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use attest_core::EvaluationContext;

/// Errors from a code bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The referenced module does not expose a callable entry point.
    #[error("Script module is not callable: {0}")]
    NotCallable(String),

    #[error("Script execution failed: {0}")]
    Execution(String),
}

/// Executes JavaScript assertion code.
#[async_trait]
pub trait ScriptBridge: Send + Sync {
    /// Load a module and evaluate it with the output and context. A
    /// module exporting a plain value returns that value unchanged.
    async fn evaluate_module(
        &self,
        path: &Path,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Value, BridgeError>;

    /// Evaluate an inline expression with `output` and `context` bound.
    async fn evaluate_inline(
        &self,
        code: &str,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Value, BridgeError>;
}

/// Executes Python assertion code through the `get_assert(output, context)`
/// entry point.
#[async_trait]
pub trait PythonBridge: Send + Sync {
    async fn run_file(
        &self,
        path: &Path,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Value, BridgeError>;

    async fn run_inline(
        &self,
        code: &str,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Value, BridgeError>;
}
