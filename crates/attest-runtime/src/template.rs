//! Template rendering collaborator.
//!
//! Assertion values may interpolate test variables before comparison.
//! Rendering is infallible by contract: a template collaborator may never
//! abort a run, so undefined variables render as the empty string.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use attest_core::VarMap;

/// Renders template strings against test variables. Must not fail.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, template: &str, vars: &VarMap) -> String;
}

lazy_static! {
    static ref VAR_PATTERN: Regex = Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}")
        .expect("variable pattern is valid");
}

/// Default engine: `{{ var }}` substitution with dotted-path lookup into
/// object variables. No conditionals, no loops.
#[derive(Debug, Default, Clone)]
pub struct VarSubstituter;

impl VarSubstituter {
    fn lookup(vars: &VarMap, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let mut current = vars.get(segments.next()?)?.clone();
        for segment in segments {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }
}

impl TemplateEngine for VarSubstituter {
    fn render(&self, template: &str, vars: &VarMap) -> String {
        VAR_PATTERN
            .replace_all(template, |caps: &regex::Captures| {
                match Self::lookup(vars, &caps[1]) {
                    Some(Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => String::new(),
                }
            })
            .into_owned()
    }
}
