//! Deterministic text matchers: containment, equality, regex, prefix,
//! edit distance, and ROUGE overlap.

use std::collections::HashMap;

use regex::Regex;
use serde_json::Value;

use crate::error::AssertError;
use crate::matchers::{value_as_list, value_as_text, MatcherArgs};
use crate::types::GradingResult;

const DEFAULT_LEVENSHTEIN_THRESHOLD: f64 = 5.0;
const DEFAULT_ROUGE_THRESHOLD: f64 = 0.75;

fn not(inverse: bool) -> &'static str {
    if inverse {
        "not "
    } else {
        ""
    }
}

/// Case-sensitive substring containment.
pub fn contains(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needle = value_as_text(args.rendered, "contains")?;
    let pass = args.output_text.contains(&needle) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain \"{needle}\"",
            not(args.inverse)
        ),
        args.assertion,
    ))
}

/// Case-insensitive substring containment.
pub fn icontains(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needle = value_as_text(args.rendered, "icontains")?;
    let pass = args
        .output_text
        .to_lowercase()
        .contains(&needle.to_lowercase())
        != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain \"{needle}\"",
            not(args.inverse)
        ),
        args.assertion,
    ))
}

/// Pass when any of the listed values is contained in the output.
pub fn contains_any(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needles = value_as_list(args.rendered, "contains-any")?;
    let pass = needles.iter().any(|v| args.output_text.contains(v)) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain one of \"{}\"",
            not(args.inverse),
            needles.join(", ")
        ),
        args.assertion,
    ))
}

/// Case-insensitive [`contains_any`].
pub fn icontains_any(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needles = value_as_list(args.rendered, "icontains-any")?;
    let haystack = args.output_text.to_lowercase();
    let pass = needles.iter().any(|v| haystack.contains(&v.to_lowercase())) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain one of \"{}\"",
            not(args.inverse),
            needles.join(", ")
        ),
        args.assertion,
    ))
}

/// Pass when every listed value is contained in the output.
pub fn contains_all(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needles = value_as_list(args.rendered, "contains-all")?;
    let pass = needles.iter().all(|v| args.output_text.contains(v)) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain all of \"{}\"",
            not(args.inverse),
            needles.join(", ")
        ),
        args.assertion,
    ))
}

/// Case-insensitive [`contains_all`].
pub fn icontains_all(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let needles = value_as_list(args.rendered, "icontains-all")?;
    let haystack = args.output_text.to_lowercase();
    let pass = needles.iter().all(|v| haystack.contains(&v.to_lowercase())) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}contain all of \"{}\"",
            not(args.inverse),
            needles.join(", ")
        ),
        args.assertion,
    ))
}

/// Exact equality. Object and array values are compared structurally
/// against the output parsed as JSON; an unparseable output is simply
/// not equal.
pub fn equals(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let rendered = args.rendered.ok_or_else(|| {
        AssertError::Malformed("\"equals\" assertion type must have a value".to_string())
    })?;
    let (matched, expected_text) = match rendered {
        Value::Object(_) | Value::Array(_) => {
            let parsed: Option<Value> = serde_json::from_str(args.output_text).ok();
            (
                parsed.as_ref() == Some(rendered),
                rendered.to_string(),
            )
        }
        Value::String(s) => (s == args.output_text, s.clone()),
        other => (other.to_string() == args.output_text, other.to_string()),
    };
    let pass = matched != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output \"{}\" to {}equal \"{expected_text}\"",
            args.output_text,
            not(args.inverse)
        ),
        args.assertion,
    ))
}

/// Regular-expression match. An invalid pattern aborts the run.
pub fn regex_match(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let pattern = match args.rendered {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(AssertError::Malformed(
                "\"regex\" assertion type must have a string value".to_string(),
            ))
        }
    };
    let regex = Regex::new(&pattern)
        .map_err(|err| AssertError::Malformed(format!("invalid regex \"{pattern}\": {err}")))?;
    let pass = regex.is_match(args.output_text) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}match regex \"{pattern}\"",
            not(args.inverse)
        ),
        args.assertion,
    ))
}

/// Prefix match.
pub fn starts_with(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let prefix = match args.rendered {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(AssertError::Malformed(
                "\"starts-with\" assertion type must have a string value".to_string(),
            ))
        }
    };
    let pass = args.output_text.starts_with(&prefix) != args.inverse;
    Ok(GradingResult::from_bool(
        pass,
        format!(
            "Expected output to {}start with \"{prefix}\"",
            not(args.inverse)
        ),
        args.assertion,
    ))
}

/// Edit distance against the expected string; pass iff the distance is
/// at most the threshold (default 5).
pub fn levenshtein(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let expected = match args.rendered {
        Some(Value::String(s)) => s,
        _ => {
            return Err(AssertError::Malformed(
                "\"levenshtein\" assertion type must have a string value".to_string(),
            ))
        }
    };
    let threshold = args
        .assertion
        .threshold
        .unwrap_or(DEFAULT_LEVENSHTEIN_THRESHOLD);
    let distance = edit_distance(args.output_text, expected);
    let pass = (distance as f64) <= threshold;
    Ok(GradingResult::from_bool(
        pass,
        format!("Levenshtein distance {distance} is greater than threshold {threshold}"),
        args.assertion,
    ))
}

/// ROUGE-N unigram overlap F-score; pass iff the score meets the
/// threshold (default 0.75). Inversion flips pass and reports `1 - score`.
pub fn rouge_n(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let expected = match args.rendered {
        Some(Value::String(s)) => s,
        _ => {
            return Err(AssertError::Malformed(
                "\"rouge-n\" assertion type must have a string value".to_string(),
            ))
        }
    };
    let threshold = args.assertion.threshold.unwrap_or(DEFAULT_ROUGE_THRESHOLD);
    let score = rouge_f_score(args.output_text, expected);
    let pass = (score >= threshold) != args.inverse;
    let reported = if args.inverse { 1.0 - score } else { score };
    Ok(GradingResult {
        pass,
        score: reported,
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            format!(
                "ROUGE-N score {score:.2} is {} threshold {threshold}",
                if args.inverse {
                    "greater than or equal to"
                } else {
                    "less than"
                }
            )
        },
        assertion: Some(args.assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

/// Classic two-row Levenshtein over unicode scalar values.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Unigram co-occurrence F1 between candidate and reference.
fn rouge_f_score(candidate: &str, reference: &str) -> f64 {
    let candidate_grams = unigrams(candidate);
    let reference_grams = unigrams(reference);
    let candidate_total: usize = candidate_grams.values().sum();
    let reference_total: usize = reference_grams.values().sum();
    if candidate_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let overlap: usize = reference_grams
        .iter()
        .map(|(gram, &count)| count.min(candidate_grams.get(gram).copied().unwrap_or(0)))
        .sum();
    if overlap == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / candidate_total as f64;
    let recall = overlap as f64 / reference_total as f64;
    2.0 * precision * recall / (precision + recall)
}

fn unigrams(text: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        *counts.entry(token.to_lowercase()).or_insert(0) += 1;
    }
    counts
}
