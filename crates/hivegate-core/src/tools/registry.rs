//! [`Tool`] trait and [`ToolRegistry`].
//!
//! A tool is a named operation with a JSON-schema-shaped parameter
//! description and an async execute returning text. The registry maps
//! names to tools and produces the OpenAI function-calling schema array
//! advertised to providers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The requested tool is not registered.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Arguments failed validation.
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    /// The tool failed at runtime.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool exceeded its time budget.
    #[error("timeout after {0}s")]
    Timeout(u64),
}

/// A tool invocable by the agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name used in function calling.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters: an object schema with
    /// `properties`, `required`, and optional per-field `enum`s.
    fn parameters(&self) -> serde_json::Value;

    /// Execute with an argument map; returns the textual result handed
    /// back to the model.
    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError>;
}

/// Registry of tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool; a tool with the same name is replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registering tool");
        self.tools.insert(name, tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Sorted list of registered names.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// The OpenAI-function-style schema array, sorted by name.
    pub fn definitions(&self) -> Vec<serde_json::Value> {
        let mut definitions: Vec<(String, serde_json::Value)> = self
            .tools
            .iter()
            .map(|(name, tool)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": name,
                            "description": tool.description(),
                            "parameters": tool.parameters(),
                        }
                    }),
                )
            })
            .collect();
        definitions.sort_by(|a, b| a.0.cmp(&b.0));
        definitions.into_iter().map(|(_, v)| v).collect()
    }

    /// Execute a tool directly, without the self-healing pipeline.
    pub async fn execute(
        &self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        tool.execute(args).await
    }
}

/// Validate an argument map against a tool's parameter schema.
///
/// Checks required presence, JSON-schema type per property, and enum
/// membership. Unknown parameters produce warnings, not errors.
pub fn validate_arguments(
    schema: &serde_json::Value,
    args: &serde_json::Value,
) -> (Vec<String>, Vec<String>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let empty = serde_json::Map::new();
    let args_map = args.as_object().unwrap_or(&empty);
    let properties = schema
        .get("properties")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();

    if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
        for req in required.iter().filter_map(|v| v.as_str()) {
            if !args_map.contains_key(req) {
                errors.push(format!("missing required parameter: '{req}'"));
            }
        }
    }

    for (name, value) in args_map {
        let Some(prop) = properties.get(name) else {
            warnings.push(format!("unknown parameter: '{name}'"));
            continue;
        };

        if let Some(expected) = prop.get("type").and_then(|v| v.as_str())
            && !type_matches(value, expected)
        {
            errors.push(format!(
                "parameter '{name}' should be {expected}, got {}",
                json_type_name(value)
            ));
        }

        if let Some(allowed) = prop.get("enum").and_then(|v| v.as_array())
            && !allowed.contains(value)
        {
            errors.push(format!(
                "parameter '{name}' must be one of: {}",
                serde_json::to_string(allowed).unwrap_or_default()
            ));
        }
    }

    (errors, warnings)
}

fn type_matches(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo back the input text"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" },
                    "mode": { "type": "string", "enum": ["plain", "loud"] }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidArgs("missing 'text'".into()))?;
            Ok(text.to_string())
        }
    }

    #[tokio::test]
    async fn register_and_execute() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry
            .execute("echo", serde_json::json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(result, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn definitions_shape_and_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["type"], "function");
        assert_eq!(defs[0]["function"]["name"], "echo");
        assert!(defs[0]["function"]["parameters"]["properties"]["text"].is_object());
    }

    #[test]
    fn validate_required_missing() {
        let schema = EchoTool.parameters();
        let (errors, _) = validate_arguments(&schema, &serde_json::json!({}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("text"));
    }

    #[test]
    fn validate_type_mismatch() {
        let schema = EchoTool.parameters();
        let (errors, _) =
            validate_arguments(&schema, &serde_json::json!({"text": 42}));
        assert!(errors[0].contains("should be string"));
    }

    #[test]
    fn validate_enum_membership() {
        let schema = EchoTool.parameters();
        let (errors, _) = validate_arguments(
            &schema,
            &serde_json::json!({"text": "x", "mode": "silent"}),
        );
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("must be one of"));

        let (errors, _) = validate_arguments(
            &schema,
            &serde_json::json!({"text": "x", "mode": "loud"}),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn validate_unknown_param_warns_only() {
        let schema = EchoTool.parameters();
        let (errors, warnings) = validate_arguments(
            &schema,
            &serde_json::json!({"text": "x", "extra": true}),
        );
        assert!(errors.is_empty());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn integer_vs_number_types() {
        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "ratio": {"type": "number"}
            },
            "required": []
        });
        let (errors, _) = validate_arguments(
            &schema,
            &serde_json::json!({"count": 3, "ratio": 0.5}),
        );
        assert!(errors.is_empty());

        let (errors, _) =
            validate_arguments(&schema, &serde_json::json!({"count": 0.5}));
        assert_eq!(errors.len(), 1);
    }
}
