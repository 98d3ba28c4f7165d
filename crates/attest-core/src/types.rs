//! Core data model: assertions, test cases, and grading results.
//!
//! The serialized shapes here are an interchange format shared with
//! report/storage consumers. Field names (`componentResults`,
//! `namedScores`, `rubricPrompt`, ...) and their optionality must be
//! preserved exactly.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AssertError;

/// Variables available to template rendering and evaluators.
///
/// A `BTreeMap` keeps iteration deterministic.
pub type VarMap = BTreeMap<String, Value>;

/// Every assertion kind the dispatcher knows how to evaluate.
///
/// The wire format is a type string, optionally prefixed with `not-` for
/// inversion. Parsing strips the prefix and returns the base kind; the
/// dispatcher then matches exhaustively, so adding a variant without a
/// handler is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssertionType {
    Contains,
    ContainsAll,
    ContainsAny,
    IContains,
    IContainsAll,
    IContainsAny,
    Equals,
    Regex,
    StartsWith,
    Levenshtein,
    RougeN,
    IsSql,
    ContainsSql,
    IsJson,
    ContainsJson,
    Javascript,
    Python,
    IsValidOpenAiToolsCall,
    IsValidOpenAiFunctionCall,
    Similar,
    LlmRubric,
    Factuality,
    ModelGradedClosedQa,
    AnswerRelevance,
    ContextRecall,
    ContextRelevance,
    ContextFaithfulness,
    Classifier,
    Moderation,
    Cost,
    Latency,
    Perplexity,
    PerplexityScore,
    Webhook,
    AssertSet,
    SelectBest,
}

impl AssertionType {
    /// Parse a wire type string into `(base kind, inverse)`.
    ///
    /// `inverse` is true iff the string carries the `not-` prefix.
    /// Grouping (`assert-set`) and comparison (`select-best`) kinds do
    /// not support inversion.
    pub fn parse(raw: &str) -> Result<(Self, bool), AssertError> {
        if raw.is_empty() {
            return Err(AssertError::Malformed(
                "Assertion must have a type".to_string(),
            ));
        }
        let (base, inverse) = match raw.strip_prefix("not-") {
            Some(rest) => (rest, true),
            None => (raw, false),
        };
        let kind = match base {
            "contains" => Self::Contains,
            "contains-all" => Self::ContainsAll,
            "contains-any" => Self::ContainsAny,
            "icontains" => Self::IContains,
            "icontains-all" => Self::IContainsAll,
            "icontains-any" => Self::IContainsAny,
            "equals" => Self::Equals,
            "regex" => Self::Regex,
            "starts-with" => Self::StartsWith,
            "levenshtein" => Self::Levenshtein,
            "rouge-n" => Self::RougeN,
            "is-sql" => Self::IsSql,
            "contains-sql" => Self::ContainsSql,
            "is-json" => Self::IsJson,
            "contains-json" => Self::ContainsJson,
            "javascript" => Self::Javascript,
            "python" => Self::Python,
            "is-valid-openai-tools-call" => Self::IsValidOpenAiToolsCall,
            "is-valid-openai-function-call" => Self::IsValidOpenAiFunctionCall,
            "similar" => Self::Similar,
            "llm-rubric" => Self::LlmRubric,
            "factuality" | "model-graded-factuality" => Self::Factuality,
            "model-graded-closedqa" => Self::ModelGradedClosedQa,
            "answer-relevance" => Self::AnswerRelevance,
            "context-recall" => Self::ContextRecall,
            "context-relevance" => Self::ContextRelevance,
            "context-faithfulness" => Self::ContextFaithfulness,
            "classifier" => Self::Classifier,
            "moderation" => Self::Moderation,
            "cost" => Self::Cost,
            "latency" => Self::Latency,
            "perplexity" => Self::Perplexity,
            "perplexity-score" => Self::PerplexityScore,
            "webhook" => Self::Webhook,
            "assert-set" if !inverse => Self::AssertSet,
            "select-best" if !inverse => Self::SelectBest,
            _ => return Err(AssertError::UnknownType(raw.to_string())),
        };
        Ok((kind, inverse))
    }

    /// Canonical base type string (no `not-` prefix).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::ContainsAll => "contains-all",
            Self::ContainsAny => "contains-any",
            Self::IContains => "icontains",
            Self::IContainsAll => "icontains-all",
            Self::IContainsAny => "icontains-any",
            Self::Equals => "equals",
            Self::Regex => "regex",
            Self::StartsWith => "starts-with",
            Self::Levenshtein => "levenshtein",
            Self::RougeN => "rouge-n",
            Self::IsSql => "is-sql",
            Self::ContainsSql => "contains-sql",
            Self::IsJson => "is-json",
            Self::ContainsJson => "contains-json",
            Self::Javascript => "javascript",
            Self::Python => "python",
            Self::IsValidOpenAiToolsCall => "is-valid-openai-tools-call",
            Self::IsValidOpenAiFunctionCall => "is-valid-openai-function-call",
            Self::Similar => "similar",
            Self::LlmRubric => "llm-rubric",
            Self::Factuality => "factuality",
            Self::ModelGradedClosedQa => "model-graded-closedqa",
            Self::AnswerRelevance => "answer-relevance",
            Self::ContextRecall => "context-recall",
            Self::ContextRelevance => "context-relevance",
            Self::ContextFaithfulness => "context-faithfulness",
            Self::Classifier => "classifier",
            Self::Moderation => "moderation",
            Self::Cost => "cost",
            Self::Latency => "latency",
            Self::Perplexity => "perplexity",
            Self::PerplexityScore => "perplexity-score",
            Self::Webhook => "webhook",
            Self::AssertSet => "assert-set",
            Self::SelectBest => "select-best",
        }
    }
}

/// One declarative check applied to a model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assertion {
    /// Wire type string, e.g. `"contains"`, `"not-equals"`, `"assert-set"`.
    #[serde(rename = "type")]
    pub assertion_type: String,

    /// Comparison value: literal, array, object, or `file://` reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Pass threshold for continuous evaluators and thresholded groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Label used to group scores across assertions for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    /// Multiplier for weighted-average aggregation (default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,

    /// Code applied to the output before evaluation (inline or `file://`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,

    /// Provider override forwarded to model-graded collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Value>,

    /// Rubric prompt override (string or object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_prompt: Option<Value>,

    /// Child assertions; only valid when `type` is `"assert-set"`.
    #[serde(default, rename = "assert", skip_serializing_if = "Option::is_none")]
    pub asserts: Option<Vec<Assertion>>,
}

impl Assertion {
    /// Minimal assertion of the given type with no value.
    pub fn of_type(assertion_type: impl Into<String>) -> Self {
        Self {
            assertion_type: assertion_type.into(),
            value: None,
            threshold: None,
            metric: None,
            weight: None,
            transform: None,
            provider: None,
            rubric_prompt: None,
            asserts: None,
        }
    }

    /// Minimal assertion with a value.
    pub fn with_value(assertion_type: impl Into<String>, value: Value) -> Self {
        Self {
            value: Some(value),
            ..Self::of_type(assertion_type)
        }
    }

    /// Effective aggregation weight (default 1).
    pub fn weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }

    /// Base kind and inverse flag of this assertion.
    pub fn kind(&self) -> Result<(AssertionType, bool), AssertError> {
        AssertionType::parse(&self.assertion_type)
    }

    /// Structural validation.
    ///
    /// - `type` must be non-empty and known.
    /// - `assert-set` entries must carry a non-empty `assert` list; any
    ///   other type must not carry one.
    /// - Assert-sets nest at most one level: children of an assert-set
    ///   may not themselves be assert-sets.
    pub fn validate(&self) -> Result<(), AssertError> {
        self.validate_at_depth(0)
    }

    fn validate_at_depth(&self, depth: usize) -> Result<(), AssertError> {
        let (kind, _) = self.kind()?;
        if kind == AssertionType::AssertSet {
            if depth > 0 {
                return Err(AssertError::Malformed(
                    "assert-set cannot be nested inside another assert-set".to_string(),
                ));
            }
            let children = self
                .asserts
                .as_deref()
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    AssertError::Malformed(
                        "assert-set must have a non-empty assert list".to_string(),
                    )
                })?;
            for child in children {
                child.validate_at_depth(depth + 1)?;
            }
        } else if self.asserts.is_some() {
            return Err(AssertError::Malformed(format!(
                "\"{}\" assertion must not have an assert list",
                self.assertion_type
            )));
        }
        Ok(())
    }
}

/// Per-test options: provider override and rubric prompt.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestOptions {
    /// Grading provider override forwarded to semantic matchers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Value>,

    /// Rubric prompt for rubric-style matchers (string or object).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_prompt: Option<Value>,
}

/// A single test case: variables, assertions, and an optional aggregate
/// threshold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Template variables available to assertion values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: VarMap,

    /// Declared assertions, in declaration order.
    #[serde(default, rename = "assert", skip_serializing_if = "Option::is_none")]
    pub asserts: Option<Vec<Assertion>>,

    /// Aggregate score threshold for the whole test.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    /// Grading options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<TestOptions>,
}

impl TestCase {
    /// Clone of this test with assertion-level `provider` / `rubricPrompt`
    /// overrides merged into the options.
    ///
    /// The clone is handed to provider-shape and model-graded evaluators
    /// so overrides never leak back into the shared test case.
    pub fn final_test(&self, assertion: &Assertion) -> TestCase {
        let mut ret = self.clone();
        let mut options = ret.options.take().unwrap_or_default();
        if assertion.provider.is_some() {
            options.provider = assertion.provider.clone();
        }
        if assertion.rubric_prompt.is_some() {
            options.rubric_prompt = assertion.rubric_prompt.clone();
        }
        ret.options = Some(options);
        ret
    }
}

/// Immutable per-assertion evaluation context, derived once and read-only
/// to evaluators. Serializable so code bridges can receive it as JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
    /// Prompt the output was generated from, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Test variables.
    pub vars: VarMap,

    /// The owning test case.
    pub test: TestCase,

    /// Token log-probabilities reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_probs: Option<Vec<f64>>,
}

/// Canonical outcome of evaluating one assertion or group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingResult {
    /// Whether the check passed.
    pub pass: bool,

    /// Score. Boolean-style evaluators report 0 or 1; continuous
    /// evaluators report a value in `[0, 1]`.
    pub score: f64,

    /// Human-readable explanation.
    pub reason: String,

    /// The assertion that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<Assertion>,

    /// Component results, in declaration order, for aggregated verdicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component_results: Option<Vec<GradingResult>>,

    /// Per-metric weighted scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub named_scores: Option<BTreeMap<String, f64>>,
}

impl GradingResult {
    /// A passing result with score 1.
    pub fn passing(assertion: &Assertion) -> Self {
        Self {
            pass: true,
            score: 1.0,
            reason: "Assertion passed".to_string(),
            assertion: Some(assertion.clone()),
            component_results: None,
            named_scores: None,
        }
    }

    /// A failing result with score 0 and the given reason.
    pub fn failing(reason: impl Into<String>, assertion: &Assertion) -> Self {
        Self {
            pass: false,
            score: 0.0,
            reason: reason.into(),
            assertion: Some(assertion.clone()),
            component_results: None,
            named_scores: None,
        }
    }

    /// Boolean result with the inverse flag already applied.
    pub fn from_bool(pass: bool, reason_on_fail: String, assertion: &Assertion) -> Self {
        if pass {
            Self::passing(assertion)
        } else {
            Self::failing(reason_on_fail, assertion)
        }
    }

    /// Whether a JSON value has the canonical `{pass, score, reason}`
    /// shape of a grading result.
    pub fn value_is_grading_result(value: &Value) -> bool {
        let Some(obj) = value.as_object() else {
            return false;
        };
        obj.get("pass").map(Value::is_boolean).unwrap_or(false)
            && obj.get("score").map(Value::is_number).unwrap_or(false)
            && obj.get("reason").map(Value::is_string).unwrap_or(false)
    }

    /// Deserialize a grading result from a JSON value, requiring the
    /// canonical shape.
    pub fn from_value(value: &Value) -> Option<Self> {
        if !Self::value_is_grading_result(value) {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }
}

/// Load an assertion list from a YAML file.
///
/// The file must contain an array of assertion objects, each with a
/// `type` field.
pub fn read_assertions(path: impl AsRef<Path>) -> Result<Vec<Assertion>, AssertError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| AssertError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let assertions: Vec<Assertion> =
        serde_yaml::from_str(&contents).map_err(|err| AssertError::ParseFile {
            path: path.display().to_string(),
            message: format!("assertions file must be an array of assertion objects: {err}"),
        })?;
    for assertion in &assertions {
        assertion.validate()?;
    }
    tracing::debug!(path = %path.display(), count = assertions.len(), "loaded assertions");
    Ok(assertions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_type() {
        let (kind, inverse) = AssertionType::parse("contains").unwrap();
        assert_eq!(kind, AssertionType::Contains);
        assert!(!inverse);
    }

    #[test]
    fn test_parse_not_prefix() {
        let (kind, inverse) = AssertionType::parse("not-icontains-all").unwrap();
        assert_eq!(kind, AssertionType::IContainsAll);
        assert!(inverse);
    }

    #[test]
    fn test_parse_factuality_alias() {
        let (kind, _) = AssertionType::parse("model-graded-factuality").unwrap();
        assert_eq!(kind, AssertionType::Factuality);
    }

    #[test]
    fn test_parse_unknown_type() {
        assert!(matches!(
            AssertionType::parse("fuzzy-match"),
            Err(AssertError::UnknownType(_))
        ));
    }

    #[test]
    fn test_parse_rejects_inverted_assert_set() {
        assert!(matches!(
            AssertionType::parse("not-assert-set"),
            Err(AssertError::UnknownType(_))
        ));
    }

    #[test]
    fn test_parse_empty_type() {
        assert!(matches!(
            AssertionType::parse(""),
            Err(AssertError::Malformed(_))
        ));
    }

    #[test]
    fn test_validate_assert_set_requires_children() {
        let set = Assertion::of_type("assert-set");
        assert!(matches!(set.validate(), Err(AssertError::Malformed(_))));
    }

    #[test]
    fn test_validate_rejects_children_on_plain_assertion() {
        let mut plain = Assertion::with_value("contains", json!("x"));
        plain.asserts = Some(vec![Assertion::with_value("contains", json!("y"))]);
        assert!(matches!(plain.validate(), Err(AssertError::Malformed(_))));
    }

    #[test]
    fn test_validate_rejects_nested_assert_sets() {
        let inner = Assertion {
            asserts: Some(vec![Assertion::with_value("contains", json!("x"))]),
            ..Assertion::of_type("assert-set")
        };
        let outer = Assertion {
            asserts: Some(vec![inner]),
            ..Assertion::of_type("assert-set")
        };
        assert!(matches!(outer.validate(), Err(AssertError::Malformed(_))));
    }

    #[test]
    fn test_weight_defaults_to_one() {
        let assertion = Assertion::with_value("contains", json!("x"));
        assert_eq!(assertion.weight(), 1.0);
    }

    #[test]
    fn test_grading_result_wire_field_names() {
        let result = GradingResult {
            pass: true,
            score: 0.5,
            reason: "ok".to_string(),
            assertion: None,
            component_results: Some(vec![]),
            named_scores: Some(BTreeMap::from([("accuracy".to_string(), 0.5)])),
        };
        let wire = serde_json::to_value(&result).unwrap();
        assert!(wire.get("componentResults").is_some());
        assert!(wire.get("namedScores").is_some());
        assert!(wire.get("component_results").is_none());
    }

    #[test]
    fn test_assertion_round_trips_wire_type() {
        let assertion: Assertion =
            serde_yaml::from_str("type: not-contains\nvalue: hello\n").unwrap();
        assert_eq!(assertion.assertion_type, "not-contains");
        let wire = serde_json::to_value(&assertion).unwrap();
        assert_eq!(wire["type"], "not-contains");
    }

    #[test]
    fn test_final_test_merges_overrides() {
        let test = TestCase {
            options: Some(TestOptions {
                provider: Some(json!("grader-a")),
                rubric_prompt: None,
            }),
            ..TestCase::default()
        };
        let assertion = Assertion {
            provider: Some(json!("grader-b")),
            rubric_prompt: Some(json!("Judge the tone")),
            ..Assertion::of_type("llm-rubric")
        };
        let merged = test.final_test(&assertion);
        let options = merged.options.unwrap();
        assert_eq!(options.provider, Some(json!("grader-b")));
        assert_eq!(options.rubric_prompt, Some(json!("Judge the tone")));
        // Original test is untouched.
        assert_eq!(
            test.options.as_ref().unwrap().provider,
            Some(json!("grader-a"))
        );
    }

    #[test]
    fn test_value_is_grading_result() {
        assert!(GradingResult::value_is_grading_result(&json!({
            "pass": true, "score": 1.0, "reason": "ok"
        })));
        assert!(!GradingResult::value_is_grading_result(&json!({
            "pass": "yes", "score": 1.0, "reason": "ok"
        })));
        assert!(!GradingResult::value_is_grading_result(&json!(42)));
    }
}
