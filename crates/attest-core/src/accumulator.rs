//! Folds per-assertion grades into a single weighted grading result.
//!
//! One accumulator exists per test case; each `assert-set` gets its own
//! child accumulator whose folded result is added back to the parent as a
//! single component.

use std::collections::BTreeMap;

use crate::types::{Assertion, GradingResult};

#[derive(Debug, Clone)]
struct ComponentEntry {
    result: GradingResult,
    metric: Option<String>,
    weight: f64,
}

/// Assertion-set context for a child accumulator: where the folded result
/// lands in the parent, and the set assertion it is attributed to.
#[derive(Debug, Clone)]
pub struct ParentAssertionSet {
    pub index: usize,
    pub assertion: Assertion,
}

#[derive(Debug, Clone, Default)]
pub struct ResultAccumulator {
    threshold: Option<f64>,
    // Keyed by declaration index so concurrent completion order does not
    // affect componentResults ordering.
    entries: BTreeMap<usize, ComponentEntry>,
    parent: Option<ParentAssertionSet>,
}

impl ResultAccumulator {
    pub fn new(threshold: Option<f64>) -> Self {
        Self {
            threshold,
            entries: BTreeMap::new(),
            parent: None,
        }
    }

    /// Child accumulator for the `assert-set` at `index` in the parent's
    /// assertion list. The set's own threshold governs the fold.
    pub fn for_assertion_set(index: usize, assertion: Assertion) -> Self {
        Self {
            threshold: assertion.threshold,
            entries: BTreeMap::new(),
            parent: Some(ParentAssertionSet { index, assertion }),
        }
    }

    pub fn parent(&self) -> Option<&ParentAssertionSet> {
        self.parent.as_ref()
    }

    pub fn add(&mut self, index: usize, result: GradingResult, assertion: &Assertion) {
        self.entries.insert(
            index,
            ComponentEntry {
                result,
                metric: assertion.metric.clone(),
                weight: assertion.weight(),
            },
        );
    }

    /// Fold a child accumulator's result into this one at the child's
    /// declared position.
    pub fn add_folded(&mut self, child: &ResultAccumulator) {
        let Some(parent) = child.parent.clone() else {
            return;
        };
        let mut folded = child.finalize();
        folded.assertion = Some(parent.assertion.clone());
        self.add(parent.index, folded, &parent.assertion);
    }

    /// Grade for a test case that declares no assertions at all.
    pub fn no_asserts_result() -> GradingResult {
        GradingResult {
            pass: true,
            score: 1.0,
            reason: "No assertions".to_string(),
            assertion: None,
            component_results: None,
            named_scores: None,
        }
    }

    pub fn finalize(&self) -> GradingResult {
        if self.entries.is_empty() {
            return Self::no_asserts_result();
        }

        let mut total_score = 0.0;
        let mut total_weight = 0.0;
        let mut all_pass = true;
        let mut failed_reason: Option<String> = None;
        let mut metric_totals: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        let mut named_scores: BTreeMap<String, f64> = BTreeMap::new();

        for entry in self.entries.values() {
            total_score += entry.result.score * entry.weight;
            total_weight += entry.weight;
            if let Some(metric) = &entry.metric {
                let slot = metric_totals.entry(metric.clone()).or_insert((0.0, 0.0));
                slot.0 += entry.result.score * entry.weight;
                slot.1 += entry.weight;
            }
            if !entry.result.pass {
                all_pass = false;
                if failed_reason.is_none() {
                    failed_reason = Some(entry.result.reason.clone());
                }
            }
        }

        for (metric, (score, weight)) in metric_totals {
            named_scores.insert(metric, score / weight);
        }

        let score = if total_weight > 0.0 {
            total_score / total_weight
        } else {
            0.0
        };
        let pass = match self.threshold {
            Some(threshold) => score >= threshold,
            None => all_pass,
        };
        let reason = if pass {
            "All assertions passed".to_string()
        } else {
            failed_reason.unwrap_or_else(|| {
                format!("Aggregate score {score:.2} < {:.2} threshold", self.threshold.unwrap_or(0.0))
            })
        };

        GradingResult {
            pass,
            score,
            reason,
            assertion: None,
            component_results: Some(
                self.entries
                    .values()
                    .map(|entry| entry.result.clone())
                    .collect(),
            ),
            named_scores: if named_scores.is_empty() {
                None
            } else {
                Some(named_scores)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn passing(score: f64) -> GradingResult {
        GradingResult {
            pass: true,
            score,
            reason: "Assertion passed".to_string(),
            assertion: None,
            component_results: None,
            named_scores: None,
        }
    }

    fn failing(score: f64, reason: &str) -> GradingResult {
        GradingResult {
            pass: false,
            score,
            reason: reason.to_string(),
            assertion: None,
            component_results: None,
            named_scores: None,
        }
    }

    fn weighted(assertion_type: &str, weight: f64) -> Assertion {
        let mut assertion = Assertion::of_type(assertion_type);
        assertion.weight = Some(weight);
        assertion
    }

    #[test]
    fn test_empty_accumulator_passes() {
        let result = ResultAccumulator::new(None).finalize();
        assert!(result.pass);
        assert_eq!(result.score, 1.0);
        assert!(result.component_results.is_none());
    }

    #[test]
    fn test_weighted_mean() {
        let mut acc = ResultAccumulator::new(None);
        acc.add(0, passing(1.0), &weighted("contains", 3.0));
        acc.add(1, passing(0.0), &weighted("equals", 1.0));
        let result = acc.finalize();
        assert!((result.score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_without_threshold_any_failure_fails() {
        let mut acc = ResultAccumulator::new(None);
        acc.add(0, passing(1.0), &Assertion::of_type("contains"));
        acc.add(1, failing(0.0, "Expected output to contain \"x\""), &Assertion::of_type("contains"));
        let result = acc.finalize();
        assert!(!result.pass);
        assert_eq!(result.reason, "Expected output to contain \"x\"");
    }

    #[test]
    fn test_threshold_overrides_component_failures() {
        let mut acc = ResultAccumulator::new(Some(0.5));
        acc.add(0, passing(1.0), &Assertion::of_type("contains"));
        acc.add(1, failing(0.0, "nope"), &Assertion::of_type("contains"));
        let result = acc.finalize();
        assert!(result.pass);
        assert_eq!(result.reason, "All assertions passed");
    }

    #[test]
    fn test_threshold_fails_low_aggregate() {
        let mut acc = ResultAccumulator::new(Some(0.9));
        acc.add(0, passing(1.0), &Assertion::of_type("contains"));
        acc.add(1, failing(0.0, "nope"), &Assertion::of_type("contains"));
        let result = acc.finalize();
        assert!(!result.pass);
    }

    #[test]
    fn test_named_scores_grouped_by_metric() {
        let mut with_metric = Assertion::of_type("contains");
        with_metric.metric = Some("accuracy".to_string());
        let mut acc = ResultAccumulator::new(None);
        acc.add(0, passing(1.0), &with_metric);
        acc.add(1, passing(0.5), &with_metric);
        acc.add(2, passing(0.2), &Assertion::of_type("equals"));
        let result = acc.finalize();
        let named = result.named_scores.unwrap();
        assert_eq!(named.len(), 1);
        assert!((named["accuracy"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_component_order_follows_declaration_index() {
        let mut acc = ResultAccumulator::new(None);
        acc.add(2, failing(0.0, "third"), &Assertion::of_type("contains"));
        acc.add(0, failing(0.0, "first"), &Assertion::of_type("contains"));
        acc.add(1, failing(0.0, "second"), &Assertion::of_type("contains"));
        let components = acc.finalize().component_results.unwrap();
        let reasons: Vec<&str> = components.iter().map(|c| c.reason.as_str()).collect();
        assert_eq!(reasons, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_assert_set_fold() {
        let mut set = Assertion::of_type("assert-set");
        set.threshold = Some(0.5);
        set.weight = Some(2.0);
        set.asserts = Some(vec![
            Assertion::of_type("contains"),
            Assertion::of_type("equals"),
        ]);

        let mut child = ResultAccumulator::for_assertion_set(1, set.clone());
        child.add(0, passing(1.0), &Assertion::of_type("contains"));
        child.add(1, failing(0.0, "nope"), &Assertion::of_type("equals"));

        let mut parent = ResultAccumulator::new(None);
        parent.add(0, passing(1.0), &Assertion::of_type("contains"));
        parent.add_folded(&child);

        let result = parent.finalize();
        assert!(result.pass);
        // Set scored 0.5 with weight 2, sibling 1.0 with weight 1.
        assert!((result.score - (2.0 * 0.5 + 1.0) / 3.0).abs() < 1e-9);
        let components = result.component_results.unwrap();
        assert_eq!(components.len(), 2);
        let folded = &components[1];
        assert!(folded.pass);
        assert_eq!(
            folded.assertion.as_ref().unwrap().assertion_type,
            "assert-set"
        );
        assert_eq!(folded.component_results.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_metric_scoping_stops_at_the_assertion_set() {
        let mut metric_assert = Assertion::of_type("contains");
        metric_assert.metric = Some("recall".to_string());
        let mut set = Assertion::of_type("assert-set");
        set.metric = Some("quality".to_string());
        let mut child = ResultAccumulator::for_assertion_set(0, set);
        child.add(0, passing(0.8), &metric_assert);

        let mut parent = ResultAccumulator::new(None);
        parent.add_folded(&child);
        let result = parent.finalize();

        // The set contributes under its own metric; its children's metric
        // names stay inside the folded component.
        let named = result.named_scores.unwrap();
        assert_eq!(named.len(), 1);
        assert!((named["quality"] - 0.8).abs() < 1e-9);
        let folded = &result.component_results.unwrap()[0];
        let child_named = folded.named_scores.as_ref().unwrap();
        assert!((child_named["recall"] - 0.8).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_weighted_score_stays_within_component_bounds(
            components in proptest::collection::vec((0.0f64..=1.0, 0.1f64..=10.0), 1..8),
        ) {
            let mut acc = ResultAccumulator::new(None);
            for (index, (score, weight)) in components.iter().enumerate() {
                acc.add(index, passing(*score), &weighted("contains", *weight));
            }
            let score = acc.finalize().score;
            let lo = components.iter().map(|(s, _)| *s).fold(f64::INFINITY, f64::min);
            let hi = components.iter().map(|(s, _)| *s).fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(score >= lo - 1e-9);
            prop_assert!(score <= hi + 1e-9);
        }
    }
}
