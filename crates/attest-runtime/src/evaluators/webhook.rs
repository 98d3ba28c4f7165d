//! `webhook` assertion: grade by POSTing the output to an external URL.
//!
//! The request body is `{output, context: {prompt, vars}}`. Transport
//! failures and non-2xx responses grade as local failures so one dead
//! endpoint never aborts the rest of the run. A missing URL is a test
//! definition error and does abort.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::Deserialize;
use serde_json::{json, Value};

use attest_core::{Assertion, AssertError, GradingResult, VarMap};

use crate::EngineError;

/// Transport retries after the first attempt.
const WEBHOOK_RETRIES: usize = 2;

#[derive(Debug, Deserialize)]
struct WebhookVerdict {
    #[serde(default)]
    pass: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct WebhookEvaluator {
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookEvaluator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    pub async fn evaluate(
        &self,
        rendered: Option<&Value>,
        output: &Value,
        prompt: Option<&str>,
        vars: &VarMap,
        assertion: &Assertion,
        inverse: bool,
    ) -> Result<GradingResult, EngineError> {
        let url = rendered.and_then(Value::as_str).ok_or_else(|| {
            AssertError::Malformed("Webhook assertion must have a URL value".to_string())
        })?;

        let body = json!({
            "output": output,
            "context": {
                "prompt": prompt,
                "vars": vars,
            },
        });

        let send = || async {
            self.client
                .post(url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await
        };
        let response = send
            .retry(ExponentialBuilder::default().with_max_times(WEBHOOK_RETRIES))
            .notify(|err, delay| {
                tracing::warn!(error = %err, ?delay, "webhook request failed, retrying");
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                return Ok(GradingResult::failing(
                    format!("Webhook error: {err}"),
                    assertion,
                ))
            }
        };
        if !response.status().is_success() {
            return Ok(GradingResult::failing(
                format!("Webhook error: statusCode={}", response.status().as_u16()),
                assertion,
            ));
        }
        let verdict: WebhookVerdict = match response.json().await {
            Ok(verdict) => verdict,
            Err(err) => {
                return Ok(GradingResult::failing(
                    format!("Webhook error: invalid response: {err}"),
                    assertion,
                ))
            }
        };

        let pass = verdict.pass != inverse;
        let mut score = verdict.score.unwrap_or(if verdict.pass { 1.0 } else { 0.0 });
        if inverse {
            score = 1.0 - score;
        }
        let reason = verdict
            .reason
            .unwrap_or_else(|| format!("Webhook returned {}", verdict.pass));

        Ok(GradingResult {
            pass,
            score,
            reason,
            assertion: Some(assertion.clone()),
            component_results: None,
            named_scores: None,
        })
    }
}
