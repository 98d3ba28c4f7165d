//! # attest-runtime
//!
//! The async assertion engine: value resolution, exhaustive dispatch
//! over the assertion vocabulary, and bounded-concurrency scheduling of
//! a test case's assertions.
//!
//! Everything that can leave the process sits behind a collaborator
//! trait: templating, semantic (model-graded) matching, JavaScript and
//! Python bridges, telemetry. The engine itself only validates
//! preconditions, routes work, and folds grades.
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_runtime::{AssertionEngine, RunAssertionsParams};
//!
//! let engine = AssertionEngine::builder()
//!     .config(EngineConfig::from_env())
//!     .semantic_matcher(matcher)
//!     .build();
//!
//! let result = engine.run_assertions(RunAssertionsParams {
//!     prompt: Some("Summarize the ticket"),
//!     provider: None,
//!     test: &test,
//!     output: &output,
//!     latency_ms: Some(412),
//!     log_probs: None,
//!     cost: Some(0.0021),
//! }).await?;
//! ```

pub mod bridges;
pub mod config;
pub mod engine;
pub mod evaluators;
pub mod provider;
pub mod resolver;
pub mod semantic;
pub mod telemetry;
pub mod template;

pub use bridges::{BridgeError, PythonBridge, ScriptBridge};
pub use config::EngineConfig;
pub use engine::{
    AssertionEngine, AssertionEngineBuilder, RunAssertionParams, RunAssertionsParams,
};
pub use provider::{FunctionSpec, ProviderSpec, ToolSpec};
pub use resolver::{Resolution, ResolvedValue, ValueResolver};
pub use semantic::{MatchResult, SemanticError, SemanticMatcher};
pub use telemetry::{NoopTelemetry, Telemetry, TracingTelemetry};
pub use template::{TemplateEngine, VarSubstituter};

use attest_core::AssertError;
use thiserror::Error;

/// Errors that abort an assertion run.
///
/// Content mismatches never surface here; they become failing
/// `GradingResult`s. This type carries malformed test definitions,
/// missing collaborators, and semantic-ranking failures.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Assert(#[from] AssertError),

    #[error("Engine has no {0} configured")]
    CollaboratorMissing(&'static str),

    #[error(transparent)]
    Semantic(#[from] SemanticError),
}
