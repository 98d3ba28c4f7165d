//! The assertion engine: resolve, dispatch, evaluate, accumulate.
//!
//! `run_assertion` grades one assertion. `run_assertions` flattens a
//! test's assertion list (one `assert-set` level), evaluates it through a
//! bounded worker pool, and folds the grades into one result.
//! `run_compare_assertion` handles `select-*` assertions, which rank all
//! candidate outputs at once.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};

use attest_core::{
    coerce_string, matchers, Assertion, AssertError, AssertionType, EvaluationContext,
    GradingResult, MatcherArgs, ResultAccumulator, TestCase,
};

use crate::bridges::{PythonBridge, ScriptBridge};
use crate::config::EngineConfig;
use crate::evaluators::model_graded::{self, ModelGradedInput};
use crate::evaluators::scripted::{self, grade_python_value, grade_script_value};
use crate::evaluators::{provider_shape, webhook::WebhookEvaluator};
use crate::provider::ProviderSpec;
use crate::resolver::{Resolution, ResolvedValue, ValueResolver};
use crate::semantic::SemanticMatcher;
use crate::telemetry::{NoopTelemetry, Telemetry};
use crate::template::{TemplateEngine, VarSubstituter};
use crate::EngineError;

/// Inputs for grading one assertion against one output.
#[derive(Clone, Copy)]
pub struct RunAssertionParams<'a> {
    pub prompt: Option<&'a str>,
    pub provider: Option<&'a ProviderSpec>,
    pub assertion: &'a Assertion,
    pub test: &'a TestCase,
    pub output: &'a Value,
    /// `None` means the output was served from a cache with no fresh
    /// timing; latency assertions refuse to grade it.
    pub latency_ms: Option<u64>,
    pub log_probs: Option<&'a [f64]>,
    pub cost: Option<f64>,
}

/// Inputs for grading a whole test case.
#[derive(Clone, Copy)]
pub struct RunAssertionsParams<'a> {
    pub prompt: Option<&'a str>,
    pub provider: Option<&'a ProviderSpec>,
    pub test: &'a TestCase,
    pub output: &'a Value,
    pub latency_ms: Option<u64>,
    pub log_probs: Option<&'a [f64]>,
    pub cost: Option<f64>,
}

pub struct AssertionEngine {
    config: EngineConfig,
    template: Arc<dyn TemplateEngine>,
    semantic: Option<Arc<dyn SemanticMatcher>>,
    script: Option<Arc<dyn ScriptBridge>>,
    python: Option<Arc<dyn PythonBridge>>,
    telemetry: Arc<dyn Telemetry>,
    webhook: WebhookEvaluator,
}

impl AssertionEngine {
    pub fn builder() -> AssertionEngineBuilder {
        AssertionEngineBuilder::new()
    }

    /// Grade one assertion. Precondition violations and unknown types
    /// return `Err`; content mismatches and evaluation-local failures
    /// return a failing `GradingResult`.
    pub async fn run_assertion(
        &self,
        params: RunAssertionParams<'_>,
    ) -> Result<GradingResult, EngineError> {
        let assertion = params.assertion;
        let (kind, inverse) = assertion.kind()?;

        self.telemetry
            .record("assertion_used", &json!({"type": kind.as_str()}));

        let context = EvaluationContext {
            prompt: params.prompt.map(str::to_string),
            vars: params.test.vars.clone(),
            test: params.test.clone(),
            log_probs: params.log_probs.map(<[f64]>::to_vec),
        };

        let output = match &assertion.transform {
            Some(code) => self.transform_output(code, params.output, &context).await?,
            None => params.output.clone(),
        };

        // Inline script code is executed, never template-rendered.
        match kind {
            AssertionType::Javascript => {
                if let Some(code) = inline_code(assertion) {
                    let bridge = self.script_bridge()?;
                    return scripted::javascript_inline(
                        bridge, code, &output, &context, assertion, inverse,
                    )
                    .await;
                }
            }
            AssertionType::Python => {
                if let Some(code) = inline_code(assertion) {
                    let bridge = self.python_bridge()?;
                    return scripted::python_inline(
                        bridge, code, &output, &context, assertion, inverse,
                    )
                    .await;
                }
            }
            _ => {}
        }

        let resolver = ValueResolver::new(
            &self.config.base_path,
            self.template.as_ref(),
            self.script.as_deref(),
            self.python.as_deref(),
        );
        let resolved = match resolver.resolve(assertion, &output, &context).await? {
            Resolution::Ready(resolved) => resolved,
            Resolution::Failed(result) => return Ok(result),
        };

        self.dispatch(kind, inverse, &output, &resolved, &context, params)
            .await
    }

    async fn dispatch(
        &self,
        kind: AssertionType,
        inverse: bool,
        output: &Value,
        resolved: &ResolvedValue,
        context: &EvaluationContext,
        params: RunAssertionParams<'_>,
    ) -> Result<GradingResult, EngineError> {
        let assertion = params.assertion;
        let output_text = coerce_string(output);
        let args = MatcherArgs {
            output,
            output_text: &output_text,
            rendered: resolved.rendered.as_ref(),
            inverse,
            assertion,
        };

        use AssertionType::*;
        let result = match kind {
            Contains => matchers::text::contains(&args)?,
            ContainsAll => matchers::text::contains_all(&args)?,
            ContainsAny => matchers::text::contains_any(&args)?,
            IContains => matchers::text::icontains(&args)?,
            IContainsAll => matchers::text::icontains_all(&args)?,
            IContainsAny => matchers::text::icontains_any(&args)?,
            Equals => matchers::text::equals(&args)?,
            Regex => matchers::text::regex_match(&args)?,
            StartsWith => matchers::text::starts_with(&args)?,
            Levenshtein => matchers::text::levenshtein(&args)?,
            RougeN => matchers::text::rouge_n(&args)?,
            IsSql => matchers::sql::is_sql(&args)?,
            ContainsSql => matchers::sql::contains_sql(&args)?,
            IsJson => matchers::json::is_json(&args, resolved.from_script.as_ref())?,
            ContainsJson => matchers::json::contains_json(&args, resolved.from_script.as_ref())?,
            Cost => matchers::metrics::cost(assertion, params.cost)?,
            Latency => matchers::metrics::latency(assertion, params.latency_ms)?,
            Perplexity => matchers::metrics::perplexity(assertion, params.log_probs)?,
            PerplexityScore => matchers::metrics::perplexity_score(assertion, params.log_probs)?,

            // File-based scripts were already executed by the resolver.
            Javascript => {
                let value = resolved.from_script.as_ref().ok_or_else(|| {
                    AssertError::Malformed(
                        "javascript assertion must have code or a file reference".to_string(),
                    )
                })?;
                grade_script_value(value, assertion, inverse)?
            }
            Python => {
                let value = resolved.from_script.as_ref().ok_or_else(|| {
                    AssertError::Malformed(
                        "python assertion must have code or a file reference".to_string(),
                    )
                })?;
                grade_python_value(value, assertion, inverse)?
            }

            IsValidOpenAiFunctionCall => provider_shape::is_valid_function_call(
                output,
                params.provider,
                self.template.as_ref(),
                &context.vars,
                assertion,
                inverse,
            ),
            IsValidOpenAiToolsCall => provider_shape::is_valid_tools_call(
                output,
                params.provider,
                self.template.as_ref(),
                &context.vars,
                assertion,
                inverse,
            ),

            Similar | LlmRubric | Factuality | ModelGradedClosedQa | AnswerRelevance
            | ContextRecall | ContextRelevance | ContextFaithfulness | Classifier | Moderation => {
                let matcher = self.semantic_matcher()?;
                let final_test = params.test.final_test(assertion);
                let input = ModelGradedInput {
                    matcher,
                    template: self.template.as_ref(),
                    assertion,
                    inverse,
                    rendered: resolved.rendered.as_ref(),
                    output_text: &output_text,
                    prompt: params.prompt,
                    vars: &context.vars,
                    test: &final_test,
                };
                match kind {
                    Similar => model_graded::similar(&input).await?,
                    LlmRubric => model_graded::llm_rubric(&input).await?,
                    Factuality => model_graded::factuality(&input).await?,
                    ModelGradedClosedQa => model_graded::closed_qa(&input).await?,
                    AnswerRelevance => model_graded::answer_relevance(&input).await?,
                    ContextRecall => model_graded::context_recall(&input).await?,
                    ContextRelevance => model_graded::context_relevance(&input).await?,
                    ContextFaithfulness => model_graded::context_faithfulness(&input).await?,
                    Classifier => model_graded::classifier(&input).await?,
                    Moderation => model_graded::moderation(&input).await?,
                    _ => unreachable!("guarded by the outer match arm"),
                }
            }

            Webhook => {
                self.webhook
                    .evaluate(
                        resolved.rendered.as_ref(),
                        output,
                        params.prompt,
                        &context.vars,
                        assertion,
                        inverse,
                    )
                    .await?
            }

            AssertSet => {
                return Err(AssertError::Malformed(
                    "assert-set is evaluated through its children, not directly".to_string(),
                )
                .into())
            }
            SelectBest => {
                return Err(AssertError::Malformed(
                    "select-best compares outputs; use run_compare_assertion".to_string(),
                )
                .into())
            }
        };

        Ok(result)
    }

    /// Grade every assertion of a test case against one output and fold
    /// the grades into a single result.
    ///
    /// Assertions run through a bounded pool; every assertion runs to
    /// completion with no short-circuit on failure. `select-*` entries
    /// are skipped here. A precondition error in any assertion aborts
    /// the whole run.
    pub async fn run_assertions(
        &self,
        params: RunAssertionsParams<'_>,
    ) -> Result<GradingResult, EngineError> {
        let Some(asserts) = params.test.asserts.as_deref().filter(|a| !a.is_empty()) else {
            return Ok(ResultAccumulator::no_asserts_result());
        };
        for assertion in asserts {
            assertion.validate()?;
        }

        let root = Arc::new(Mutex::new(ResultAccumulator::new(params.test.threshold)));
        // Child accumulators in declaration order, folded in after the run.
        let mut children: Vec<Arc<Mutex<ResultAccumulator>>> = Vec::new();
        let mut tasks: Vec<(Arc<Mutex<ResultAccumulator>>, usize, &Assertion)> = Vec::new();

        for (index, assertion) in asserts.iter().enumerate() {
            if assertion.assertion_type.starts_with("select-") {
                tracing::debug!(index, "skipping comparison assertion in per-output run");
                continue;
            }
            let (kind, _) = assertion.kind()?;
            if kind == AssertionType::AssertSet {
                let child = Arc::new(Mutex::new(ResultAccumulator::for_assertion_set(
                    index,
                    assertion.clone(),
                )));
                let child_asserts = assertion.asserts.as_deref().unwrap_or_default();
                for (child_index, child_assertion) in child_asserts.iter().enumerate() {
                    if child_assertion.assertion_type.starts_with("select-") {
                        tracing::debug!(
                            index,
                            child_index,
                            "skipping comparison assertion in per-output run"
                        );
                        continue;
                    }
                    tasks.push((Arc::clone(&child), child_index, child_assertion));
                }
                children.push(child);
            } else {
                tasks.push((Arc::clone(&root), index, assertion));
            }
        }

        let mut evaluations = stream::iter(tasks.into_iter().map(
            |(accumulator, index, assertion)| async move {
                let result = self
                    .run_assertion(RunAssertionParams {
                        prompt: params.prompt,
                        provider: params.provider,
                        assertion,
                        test: params.test,
                        output: params.output,
                        latency_ms: params.latency_ms,
                        log_probs: params.log_probs,
                        cost: params.cost,
                    })
                    .await?;
                accumulator.lock().add(index, result, assertion);
                Ok::<(), EngineError>(())
            },
        ))
        .buffer_unordered(self.config.max_concurrency.max(1));

        while let Some(evaluation) = evaluations.next().await {
            evaluation?;
        }
        drop(evaluations);

        let mut root = Arc::try_unwrap(root)
            .map(Mutex::into_inner)
            .unwrap_or_else(|root| root.lock().clone());
        for child in &children {
            root.add_folded(&child.lock());
        }
        Ok(root.finalize())
    }

    /// Rank all candidate outputs for one prompt with a `select-*`
    /// assertion, producing one result per output in input order.
    pub async fn run_compare_assertion(
        &self,
        test: &TestCase,
        assertion: &Assertion,
        outputs: &[Value],
    ) -> Result<Vec<GradingResult>, EngineError> {
        let matcher = self.semantic_matcher()?;
        let criteria = assertion.value.as_ref().and_then(Value::as_str).ok_or_else(|| {
            AssertError::Malformed("Select-best assertion must have a string value".to_string())
        })?;
        let criteria = self.template.render(criteria, &test.vars);
        let final_test = test.final_test(assertion);
        let texts: Vec<String> = outputs.iter().map(coerce_string).collect();

        let winner = matcher.select_best(&criteria, &texts, &final_test).await?;

        Ok((0..outputs.len())
            .map(|i| {
                if i == winner {
                    GradingResult::passing(assertion)
                } else {
                    GradingResult::failing("Output did not rank best".to_string(), assertion)
                }
            })
            .collect())
    }

    async fn transform_output(
        &self,
        code: &str,
        output: &Value,
        context: &EvaluationContext,
    ) -> Result<Value, EngineError> {
        let bridge = self.script_bridge()?;
        let transformed = if let Some(reference) = code.strip_prefix("file://") {
            let path = self.config.base_path.join(reference);
            bridge.evaluate_module(&path, output, context).await
        } else {
            bridge.evaluate_inline(code, output, context).await
        };
        transformed
            .map_err(|err| AssertError::Malformed(format!("Transform failed: {err}")).into())
    }

    fn script_bridge(&self) -> Result<&dyn ScriptBridge, EngineError> {
        self.script
            .as_deref()
            .ok_or(EngineError::CollaboratorMissing("script bridge"))
    }

    fn python_bridge(&self) -> Result<&dyn PythonBridge, EngineError> {
        self.python
            .as_deref()
            .ok_or(EngineError::CollaboratorMissing("python bridge"))
    }

    fn semantic_matcher(&self) -> Result<&dyn SemanticMatcher, EngineError> {
        self.semantic
            .as_deref()
            .ok_or(EngineError::CollaboratorMissing("semantic matcher"))
    }
}

/// Inline source code on a script assertion, if its value is a plain
/// (non-`file://`) string.
fn inline_code(assertion: &Assertion) -> Option<&str> {
    assertion
        .value
        .as_ref()
        .and_then(Value::as_str)
        .filter(|s| !s.starts_with("file://"))
}

/// Builder mirroring the engine's collaborator seams. Only the template
/// engine and telemetry have defaults; bridges and the semantic matcher
/// stay unset until provided.
pub struct AssertionEngineBuilder {
    config: EngineConfig,
    template: Arc<dyn TemplateEngine>,
    semantic: Option<Arc<dyn SemanticMatcher>>,
    script: Option<Arc<dyn ScriptBridge>>,
    python: Option<Arc<dyn PythonBridge>>,
    telemetry: Arc<dyn Telemetry>,
}

impl AssertionEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            template: Arc::new(VarSubstituter),
            semantic: None,
            script: None,
            python: None,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn template(mut self, template: Arc<dyn TemplateEngine>) -> Self {
        self.template = template;
        self
    }

    pub fn semantic_matcher(mut self, matcher: Arc<dyn SemanticMatcher>) -> Self {
        self.semantic = Some(matcher);
        self
    }

    pub fn script_bridge(mut self, bridge: Arc<dyn ScriptBridge>) -> Self {
        self.script = Some(bridge);
        self
    }

    pub fn python_bridge(mut self, bridge: Arc<dyn PythonBridge>) -> Self {
        self.python = Some(bridge);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn build(self) -> AssertionEngine {
        let webhook = WebhookEvaluator::new(self.config.webhook_timeout);
        AssertionEngine {
            config: self.config,
            template: self.template,
            semantic: self.semantic,
            script: self.script,
            python: self.python,
            telemetry: self.telemetry,
            webhook,
        }
    }
}

impl Default for AssertionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
