//! Numeric run-metric assertions: cost, latency, and perplexity.
//!
//! These compare against measurements taken outside the output text, so a
//! missing measurement aborts the run instead of producing a failing grade.

use crate::error::AssertError;
use crate::types::{Assertion, GradingResult};

pub fn cost(assertion: &Assertion, cost: Option<f64>) -> Result<GradingResult, AssertError> {
    let threshold = assertion
        .threshold
        .ok_or_else(|| AssertError::Malformed("Cost assertion must have a threshold".to_string()))?;
    let cost = cost.ok_or_else(|| {
        AssertError::MissingMetric("Cost not found for assertion".to_string())
    })?;
    let pass = cost <= threshold;
    Ok(GradingResult {
        pass,
        score: if pass { 1.0 } else { 0.0 },
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            format!("Cost {cost:.4} is greater than threshold {threshold}")
        },
        assertion: Some(assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

pub fn latency(assertion: &Assertion, latency_ms: Option<u64>) -> Result<GradingResult, AssertError> {
    let threshold = assertion.threshold.ok_or_else(|| {
        AssertError::Malformed("Latency assertion must have a threshold in milliseconds".to_string())
    })?;
    let latency_ms = latency_ms.ok_or_else(|| {
        AssertError::MissingMetric(
            "Latency assertion does not support cached results. Rerun without caching to get a latency measurement.".to_string(),
        )
    })?;
    let pass = (latency_ms as f64) <= threshold;
    Ok(GradingResult {
        pass,
        score: if pass { 1.0 } else { 0.0 },
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            format!("Latency {latency_ms}ms is greater than threshold {threshold}ms")
        },
        assertion: Some(assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

/// exp of the mean negative log-probability. Lower is better; passes when
/// at or below the threshold, or unconditionally without one.
pub fn perplexity(assertion: &Assertion, log_probs: Option<&[f64]>) -> Result<GradingResult, AssertError> {
    let perplexity = raw_perplexity(log_probs)?;
    let pass = assertion.threshold.map_or(true, |t| perplexity <= t);
    Ok(GradingResult {
        pass,
        score: if pass { 1.0 } else { 0.0 },
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            format!(
                "Perplexity {perplexity:.4} is greater than threshold {}",
                assertion.threshold.unwrap_or_default()
            )
        },
        assertion: Some(assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

/// Perplexity normalized to `1 / (1 + perplexity)` so that higher is
/// better; passes when at or above the threshold (default 0).
pub fn perplexity_score(
    assertion: &Assertion,
    log_probs: Option<&[f64]>,
) -> Result<GradingResult, AssertError> {
    let perplexity = raw_perplexity(log_probs)?;
    let norm = 1.0 / (1.0 + perplexity);
    let threshold = assertion.threshold.unwrap_or(0.0);
    let pass = norm >= threshold;
    Ok(GradingResult {
        pass,
        score: norm,
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            format!("Perplexity score {norm:.4} is less than threshold {threshold}")
        },
        assertion: Some(assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

fn raw_perplexity(log_probs: Option<&[f64]>) -> Result<f64, AssertError> {
    let log_probs = log_probs.filter(|lp| !lp.is_empty()).ok_or_else(|| {
        AssertError::MissingMetric(
            "Perplexity assertion does not support providers that do not return logProbs"
                .to_string(),
        )
    })?;
    let sum: f64 = log_probs.iter().sum();
    let avg = sum / log_probs.len() as f64;
    Ok((-avg).exp())
}
