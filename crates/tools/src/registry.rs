use std::collections::HashMap;
use std::sync::Arc;

use gptbridge_core::{Error, Result};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{Tool, ToolContext};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn get_tool_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    /// Get all registered tool names.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        // Validate parameters
        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        debug!(tool = name, "Executing tool");
        tool.execute(ctx, params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolSchema;
    use async_trait::async_trait;
    use gptbridge_core::Config;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "echo",
                description: "Echo the given text back.",
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"}
                    },
                    "required": ["text"]
                }),
            }
        }

        fn validate(&self, params: &Value) -> Result<()> {
            if params.get("text").and_then(|v| v.as_str()).is_none() {
                return Err(Error::Validation("Missing required parameter: text".into()));
            }
            Ok(())
        }

        async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
            Ok(json!({"echo": params["text"]}))
        }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            config: Config::default(),
        }
    }

    #[test]
    fn test_registry_new_empty() {
        let reg = ToolRegistry::new();
        assert!(reg.tool_names().is_empty());
        assert!(reg.get("echo").is_none());
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.get("echo").is_some());
        assert_eq!(reg.tool_names().len(), 1);
    }

    #[test]
    fn test_registry_get_tool_schemas() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let schemas = reg.get_tool_schemas();
        assert_eq!(schemas.len(), 1);
        // Each schema should have type=function and function.name
        for schema in &schemas {
            assert_eq!(schema["type"], "function");
            assert!(schema["function"]["name"].is_string());
            assert!(schema["function"]["description"].is_string());
        }
    }

    #[tokio::test]
    async fn test_registry_execute_unknown_tool() {
        let reg = ToolRegistry::new();
        let err = reg
            .execute("nonexistent", test_ctx(), json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Unknown tool: nonexistent"));
    }

    #[tokio::test]
    async fn test_registry_execute_runs_tool() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let out = reg
            .execute("echo", test_ctx(), json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(out["echo"], "hi");
    }

    #[tokio::test]
    async fn test_registry_execute_rejects_invalid_params() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let err = reg.execute("echo", test_ctx(), json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Missing required parameter"));
    }
}
