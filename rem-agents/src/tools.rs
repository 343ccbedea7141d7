//! In-process tool execution
//!
//! Tools named by an agent resolve first against this registry (built-ins
//! and chained tools run in the same process), falling back to the `tools`
//! table for remote registrations whose schemas the model needs.

use async_trait::async_trait;
use rem_core::AgentError;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// One executable tool.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// JSON Schema for the tool's arguments.
    fn input_schema(&self) -> JsonValue {
        serde_json::json!({"type": "object"})
    }

    async fn invoke(&self, arguments: &JsonValue) -> Result<JsonValue, AgentError>;
}

/// Named lookup over executors.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn ToolExecutor>> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, arguments: &JsonValue) -> Result<JsonValue, AgentError> {
            Ok(arguments.clone())
        }
    }

    #[tokio::test]
    async fn registry_resolves_and_invokes() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let tool = registry.get("echo").unwrap();
        let out = tool.invoke(&serde_json::json!({"x": 1})).await.unwrap();
        assert_eq!(out["x"], 1);
        assert!(registry.get("missing").is_none());
    }
}
