//! # attest-core
//!
//! Deterministic assertion grading for LLM outputs.
//!
//! This crate holds everything that can be graded without leaving the
//! process: the assertion vocabulary, the text/JSON/SQL/metric matchers,
//! and the weighted result accumulator. Anything that needs a network,
//! a script interpreter, or an LLM judge lives in `attest-runtime`.
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same output and assertion always grade the same
//! 2. **Closed vocabulary**: Unknown assertion types are rejected at parse
//! 3. **Order-stable**: Component results follow declaration order
//!
//! ## Example
//!
//! ```rust,ignore
//! use attest_core::{Assertion, AssertionType};
//!
//! let assertion = Assertion::with_value("not-contains", "yesterday".into());
//! let (kind, inverse) = AssertionType::parse(&assertion.assertion_type)?;
//! assert_eq!(kind, AssertionType::Contains);
//! assert!(inverse);
//! ```

pub mod accumulator;
pub mod error;
pub mod matchers;
pub mod types;

pub use accumulator::{ParentAssertionSet, ResultAccumulator};
pub use error::AssertError;
pub use matchers::{coerce_string, MatcherArgs};
pub use types::{
    read_assertions, Assertion, AssertionType, EvaluationContext, GradingResult, TestCase,
    TestOptions, VarMap,
};
