//! Model-graded assertions.
//!
//! The engine's value-add here is precondition checking, rubric-prompt
//! pre-rendering, and folding the collaborator's verdict into a
//! `GradingResult`. A collaborator failure grades as a local failing
//! result; a missing precondition aborts the assertion path.

use serde_json::Value;

use attest_core::{Assertion, AssertError, GradingResult, TestCase, VarMap};

use crate::semantic::{MatchResult, SemanticMatcher};
use crate::template::TemplateEngine;
use crate::EngineError;

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;

/// Shared inputs for the model-graded family.
pub struct ModelGradedInput<'a> {
    pub matcher: &'a dyn SemanticMatcher,
    pub template: &'a dyn TemplateEngine,
    pub assertion: &'a Assertion,
    pub inverse: bool,
    pub rendered: Option<&'a Value>,
    pub output_text: &'a str,
    pub prompt: Option<&'a str>,
    pub vars: &'a VarMap,
    /// Frozen per-assertion test clone with overrides merged in.
    pub test: &'a TestCase,
}

impl<'a> ModelGradedInput<'a> {
    fn rendered_str(&self) -> Option<&str> {
        self.rendered.and_then(Value::as_str)
    }

    fn var_str(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(Value::as_str)
    }

    fn require_prompt(&self) -> Result<&str, EngineError> {
        self.prompt.ok_or_else(|| {
            AssertError::Malformed(format!(
                "{} assertion requires a prompt",
                self.assertion.assertion_type
            ))
            .into()
        })
    }

    fn require_var(&self, name: &str) -> Result<&str, EngineError> {
        self.var_str(name).ok_or_else(|| {
            AssertError::Malformed(format!(
                "{} assertion requires a string \"{name}\" var",
                self.assertion.assertion_type
            ))
            .into()
        })
    }

    fn require_rendered_str(&self) -> Result<&str, EngineError> {
        self.rendered_str().ok_or_else(|| {
            AssertError::Malformed(format!(
                "\"{}\" assertion must have a string value",
                self.assertion.assertion_type
            ))
            .into()
        })
    }

    /// Test clone with any string rubric prompt template-rendered.
    fn rendered_test(&self) -> TestCase {
        let mut test = self.test.clone();
        if let Some(options) = &mut test.options {
            if let Some(Value::String(rubric)) = &options.rubric_prompt {
                options.rubric_prompt =
                    Some(Value::String(self.template.render(rubric, self.vars)));
            }
        }
        test
    }

    fn grade(&self, verdict: Result<MatchResult, crate::semantic::SemanticError>) -> GradingResult {
        match verdict {
            Ok(verdict) => GradingResult {
                pass: verdict.pass,
                score: verdict.score,
                reason: verdict.reason,
                assertion: Some(self.assertion.clone()),
                component_results: None,
                named_scores: None,
            },
            Err(err) => GradingResult::failing(err.to_string(), self.assertion),
        }
    }
}

/// `similar`: embedding similarity against one expected string or, for an
/// array value, any candidate. Array form short-circuits on the first
/// pass, otherwise reports the minimum score.
pub async fn similar(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let threshold = input.assertion.threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
    let test = input.rendered_test();

    let candidates: Vec<String> = match input.rendered {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => {
            return Err(AssertError::Malformed(
                "Similarity assertion must have a string or array of strings value".to_string(),
            )
            .into())
        }
    };

    let mut worst: Option<GradingResult> = None;
    for candidate in &candidates {
        let result = input.grade(
            input
                .matcher
                .similarity(candidate, input.output_text, threshold, input.inverse, &test)
                .await,
        );
        if result.pass {
            return Ok(result);
        }
        let is_worse = worst.as_ref().map(|w| result.score < w.score).unwrap_or(true);
        if is_worse {
            worst = Some(result);
        }
    }
    // An empty array value yields no candidates.
    Ok(worst.unwrap_or_else(|| {
        GradingResult::failing("Similarity assertion has no candidate values", input.assertion)
    }))
}

pub async fn llm_rubric(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let rubric = input.rendered_str().unwrap_or_default();
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .llm_rubric(rubric, input.output_text, &test)
            .await,
    ))
}

pub async fn factuality(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let ideal = input.require_rendered_str()?;
    let prompt = input.require_prompt()?;
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .factuality(prompt, ideal, input.output_text, &test)
            .await,
    ))
}

pub async fn closed_qa(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let criteria = input.require_rendered_str()?;
    let prompt = input.require_prompt()?;
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .closed_qa(prompt, criteria, input.output_text, &test)
            .await,
    ))
}

pub async fn answer_relevance(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let query = match input.var_str("query") {
        Some(query) => query,
        None => input.require_prompt()?,
    };
    let threshold = input.assertion.threshold.unwrap_or(0.0);
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .answer_relevance(query, input.output_text, threshold, &test)
            .await,
    ))
}

pub async fn context_recall(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let ground_truth = input.require_rendered_str()?;
    let context = match input.var_str("context") {
        Some(context) => context,
        None => input.require_prompt()?,
    };
    let threshold = input.assertion.threshold.unwrap_or(0.0);
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .context_recall(context, ground_truth, threshold, &test)
            .await,
    ))
}

pub async fn context_relevance(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let query = input.require_var("query")?;
    let context = input.require_var("context")?;
    let threshold = input.assertion.threshold.unwrap_or(0.0);
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .context_relevance(query, context, threshold, &test)
            .await,
    ))
}

pub async fn context_faithfulness(
    input: &ModelGradedInput<'_>,
) -> Result<GradingResult, EngineError> {
    let query = input.require_var("query")?;
    let context = input.require_var("context")?;
    let threshold = input.assertion.threshold.unwrap_or(0.0);
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .context_faithfulness(query, context, input.output_text, threshold, &test)
            .await,
    ))
}

pub async fn classifier(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let expected = input.require_rendered_str()?;
    let threshold = input.assertion.threshold.unwrap_or(1.0);
    let test = input.rendered_test();
    let mut result = input.grade(
        input
            .matcher
            .classification(expected, input.output_text, threshold, &test)
            .await,
    );
    if input.inverse {
        result.pass = !result.pass;
        result.score = 1.0 - result.score;
    }
    Ok(result)
}

pub async fn moderation(input: &ModelGradedInput<'_>) -> Result<GradingResult, EngineError> {
    let categories: Vec<String> = match input.rendered {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let prompt = input.require_prompt()?;
    let test = input.rendered_test();
    Ok(input.grade(
        input
            .matcher
            .moderation(prompt, input.output_text, &categories, &test)
            .await,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::SemanticError;
    use crate::template::VarSubstituter;
    use async_trait::async_trait;
    use serde_json::json;

    /// Similarity scores per expected string; everything else passes with
    /// score 1.
    struct StubMatcher {
        similarity_scores: Vec<(String, f64)>,
        fail_all: bool,
    }

    impl StubMatcher {
        fn passing() -> Self {
            Self {
                similarity_scores: Vec::new(),
                fail_all: false,
            }
        }
    }

    #[async_trait]
    impl SemanticMatcher for StubMatcher {
        async fn similarity(
            &self,
            expected: &str,
            _output: &str,
            threshold: f64,
            inverse: bool,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            let score = self
                .similarity_scores
                .iter()
                .find(|(e, _)| e == expected)
                .map(|(_, s)| *s)
                .unwrap_or(1.0);
            let pass = (score >= threshold) != inverse;
            Ok(MatchResult {
                pass,
                score,
                reason: format!("Similarity {score}"),
            })
        }

        async fn llm_rubric(
            &self,
            rubric: &str,
            _output: &str,
            test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            if self.fail_all {
                return Err(SemanticError::Provider("grader unavailable".to_string()));
            }
            let rubric_prompt = test
                .options
                .as_ref()
                .and_then(|o| o.rubric_prompt.as_ref())
                .and_then(Value::as_str)
                .unwrap_or("default grader prompt");
            Ok(MatchResult::passing(
                1.0,
                format!("Meets rubric: {rubric} via {rubric_prompt}"),
            ))
        }

        async fn factuality(
            &self,
            _prompt: &str,
            _ideal: &str,
            _output: &str,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Consistent"))
        }

        async fn closed_qa(
            &self,
            _prompt: &str,
            _criteria: &str,
            _output: &str,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Meets criteria"))
        }

        async fn answer_relevance(
            &self,
            _query: &str,
            _output: &str,
            _threshold: f64,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Relevant"))
        }

        async fn context_recall(
            &self,
            _context: &str,
            _ground_truth: &str,
            _threshold: f64,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Recalled"))
        }

        async fn context_relevance(
            &self,
            _query: &str,
            _context: &str,
            _threshold: f64,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Relevant"))
        }

        async fn context_faithfulness(
            &self,
            _query: &str,
            _context: &str,
            _output: &str,
            _threshold: f64,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Faithful"))
        }

        async fn classification(
            &self,
            _expected: &str,
            _output: &str,
            _threshold: f64,
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Classified"))
        }

        async fn moderation(
            &self,
            _prompt: &str,
            _output: &str,
            _categories: &[String],
            _test: &TestCase,
        ) -> Result<MatchResult, SemanticError> {
            Ok(MatchResult::passing(1.0, "Clean"))
        }

        async fn select_best(
            &self,
            _criteria: &str,
            _outputs: &[String],
            _test: &TestCase,
        ) -> Result<usize, SemanticError> {
            Ok(0)
        }
    }

    fn input<'a>(
        matcher: &'a StubMatcher,
        template: &'a VarSubstituter,
        assertion: &'a Assertion,
        rendered: Option<&'a Value>,
        prompt: Option<&'a str>,
        vars: &'a VarMap,
        test: &'a TestCase,
    ) -> ModelGradedInput<'a> {
        ModelGradedInput {
            matcher,
            template,
            assertion,
            inverse: false,
            rendered,
            output_text: "the output",
            prompt,
            vars,
            test,
        }
    }

    #[tokio::test]
    async fn test_similar_array_short_circuits_on_pass() {
        let matcher = StubMatcher {
            similarity_scores: vec![("bad".to_string(), 0.1), ("good".to_string(), 0.9)],
            fail_all: false,
        };
        let template = VarSubstituter;
        let assertion = Assertion::with_value("similar", json!(["bad", "good"]));
        let rendered = json!(["bad", "good"]);
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = similar(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await
        .unwrap();
        assert!(result.pass);
        assert!((result.score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similar_array_reports_minimum_on_failure() {
        let matcher = StubMatcher {
            similarity_scores: vec![("a".to_string(), 0.3), ("b".to_string(), 0.2)],
            fail_all: false,
        };
        let template = VarSubstituter;
        let assertion = Assertion::with_value("similar", json!(["a", "b"]));
        let rendered = json!(["a", "b"]);
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = similar(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await
        .unwrap();
        assert!(!result.pass);
        assert!((result.score - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similar_requires_string_value() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::with_value("similar", json!(42));
        let rendered = json!(42);
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = similar(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await;
        assert!(matches!(
            result,
            Err(EngineError::Assert(AssertError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_factuality_requires_prompt() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::with_value("factuality", json!("the ideal answer"));
        let rendered = json!("the ideal answer");
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = factuality(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await;
        assert!(matches!(
            result,
            Err(EngineError::Assert(AssertError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_context_relevance_requires_vars() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::of_type("context-relevance");
        let vars = VarMap::from([("query".to_string(), json!("why?"))]);
        let test = TestCase::default();
        let result = context_relevance(&input(
            &matcher, &template, &assertion, None, None, &vars, &test,
        ))
        .await;
        // query present but context missing
        assert!(matches!(
            result,
            Err(EngineError::Assert(AssertError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_not_classifier_flips_pass_and_score() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::with_value("not-classifier", json!("spam"));
        let rendered = json!("spam");
        let vars = VarMap::new();
        let test = TestCase::default();
        let mut graded = input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        );
        graded.inverse = true;
        let result = classifier(&graded).await.unwrap();
        // Stub classifies with score 1; inversion flips both fields.
        assert!(!result.pass);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_moderation_requires_prompt() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::of_type("moderation");
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = moderation(&input(
            &matcher, &template, &assertion, None, None, &vars, &test,
        ))
        .await;
        assert!(matches!(
            result,
            Err(EngineError::Assert(AssertError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_collaborator_failure_grades_locally() {
        let matcher = StubMatcher {
            similarity_scores: Vec::new(),
            fail_all: true,
        };
        let template = VarSubstituter;
        let assertion = Assertion::with_value("llm-rubric", json!("be nice"));
        let rendered = json!("be nice");
        let vars = VarMap::new();
        let test = TestCase::default();
        let result = llm_rubric(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await
        .unwrap();
        assert!(!result.pass);
        assert!(result.reason.contains("grader unavailable"));
    }

    #[tokio::test]
    async fn test_rubric_prompt_is_prerendered() {
        let matcher = StubMatcher::passing();
        let template = VarSubstituter;
        let assertion = Assertion::with_value("llm-rubric", json!("{{ tone }} tone"));
        let vars = VarMap::from([("tone".to_string(), json!("friendly"))]);
        let rendered = json!("friendly tone");
        let test = TestCase {
            options: Some(attest_core::TestOptions {
                provider: None,
                rubric_prompt: Some(json!("Grade for {{ tone }}")),
            }),
            ..TestCase::default()
        };
        let result = llm_rubric(&input(
            &matcher,
            &template,
            &assertion,
            Some(&rendered),
            None,
            &vars,
            &test,
        ))
        .await
        .unwrap();
        assert!(result.pass);
        assert_eq!(
            result.reason,
            "Meets rubric: friendly tone via Grade for friendly"
        );
    }
}
