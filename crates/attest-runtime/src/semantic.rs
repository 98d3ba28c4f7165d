//! Semantic matcher collaborator.
//!
//! Model-graded verdicts (similarity, rubrics, factuality, context
//! checks, moderation, best-of ranking) are delegated through this trait.
//! The engine never talks to a grading model directly; it validates
//! preconditions, renders prompts, and interprets the returned verdict.

use async_trait::async_trait;
use thiserror::Error;

use attest_core::TestCase;

/// Errors from a semantic matcher collaborator.
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Grading provider call failed: {0}")]
    Provider(String),

    #[error("Grading response malformed: {0}")]
    MalformedResponse(String),
}

/// Verdict from a semantic matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub pass: bool,
    pub score: f64,
    pub reason: String,
}

impl MatchResult {
    pub fn passing(score: f64, reason: impl Into<String>) -> Self {
        Self {
            pass: true,
            score,
            reason: reason.into(),
        }
    }

    pub fn failing(score: f64, reason: impl Into<String>) -> Self {
        Self {
            pass: false,
            score,
            reason: reason.into(),
        }
    }
}

/// One method per model-graded assertion family. The `test` argument is
/// the frozen per-assertion clone, so grader and rubric-prompt overrides
/// are visible in `test.options`.
#[async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Embedding similarity between `expected` and `output`. `inverse`
    /// flips the threshold comparison, not the score.
    async fn similarity(
        &self,
        expected: &str,
        output: &str,
        threshold: f64,
        inverse: bool,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Grade `output` against a free-form rubric.
    async fn llm_rubric(
        &self,
        rubric: &str,
        output: &str,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Factual consistency of `output` against the `ideal` answer.
    async fn factuality(
        &self,
        prompt: &str,
        ideal: &str,
        output: &str,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Closed-domain QA check against `criteria`.
    async fn closed_qa(
        &self,
        prompt: &str,
        criteria: &str,
        output: &str,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    async fn answer_relevance(
        &self,
        query: &str,
        output: &str,
        threshold: f64,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    async fn context_recall(
        &self,
        context: &str,
        ground_truth: &str,
        threshold: f64,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    async fn context_relevance(
        &self,
        query: &str,
        context: &str,
        threshold: f64,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    async fn context_faithfulness(
        &self,
        query: &str,
        context: &str,
        output: &str,
        threshold: f64,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Classify `output` and compare to the expected label.
    async fn classification(
        &self,
        expected: &str,
        output: &str,
        threshold: f64,
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Moderation verdict for `output` given the originating prompt.
    async fn moderation(
        &self,
        prompt: &str,
        output: &str,
        categories: &[String],
        test: &TestCase,
    ) -> Result<MatchResult, SemanticError>;

    /// Index of the best output according to `criteria`.
    async fn select_best(
        &self,
        criteria: &str,
        outputs: &[String],
        test: &TestCase,
    ) -> Result<usize, SemanticError>;
}
