//! Provider function/tool declarations.
//!
//! Shape-validation assertions check a model's function calls against the
//! schemas the provider was configured with. Only the declarations are
//! modeled here; issuing provider calls is out of scope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A declared callable function with a JSON Schema for its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for the function arguments. May contain `{{ var }}`
    /// templates, rendered with test vars before validation.
    pub parameters: Value,
}

/// A declared tool wrapping a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

/// The function/tool surface a provider was configured with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl ProviderSpec {
    pub fn function_named(&self, name: &str) -> Option<&FunctionSpec> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn tool_function_named(&self, name: &str) -> Option<&FunctionSpec> {
        self.tools
            .iter()
            .map(|t| &t.function)
            .find(|f| f.name == name)
    }
}
