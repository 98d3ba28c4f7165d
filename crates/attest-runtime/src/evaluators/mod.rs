//! Async evaluator families.
//!
//! Deterministic matchers live in `attest-core`; everything here needs a
//! collaborator: a code bridge, a semantic matcher, a provider spec, or
//! the network.

pub mod model_graded;
pub mod provider_shape;
pub mod scripted;
pub mod webhook;
