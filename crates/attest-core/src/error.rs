//! Error taxonomy for assertion evaluation.
//!
//! Two classes of failure exist and they are not interchangeable:
//!
//! - `AssertError` values abort the evaluation of the assertion that
//!   raised them and propagate to the caller of the whole run. They mean
//!   the test definition itself is broken (missing value, missing
//!   threshold, unknown type) or a required provider metric is absent.
//! - Content mismatches never become errors. They are reported as a
//!   failing [`GradingResult`](crate::types::GradingResult) and the run
//!   continues with the remaining assertions.

use thiserror::Error;

/// Run-aborting errors raised while evaluating a single assertion.
#[derive(Error, Debug)]
pub enum AssertError {
    /// The assertion definition is malformed (wrong value shape, missing
    /// required field, invalid regex, empty assert-set, ...).
    #[error("Assertion malformed: {0}")]
    Malformed(String),

    /// The assertion `type` string maps to no known evaluator.
    #[error("Unknown assertion type: {0}")]
    UnknownType(String),

    /// A `file://` value points at an extension no loader handles.
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// A provider-reported metric (cost, latency, logProbs) required by
    /// the assertion was not supplied.
    #[error("{0}")]
    MissingMetric(String),

    /// Reading a referenced file failed.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Parsing a referenced schema/document file failed.
    #[error("Failed to parse {path}: {message}")]
    ParseFile { path: String, message: String },
}
