//! The bounded agent run loop.
//!
//! Each step sends the message history and tool schemas to the LLM provider,
//! executes any tool calls through the registry, and appends the results. The
//! run finishes when the model calls the `done` completion tool with arguments
//! matching the `ChatGPTResponse` schema; a run that ends any other way (step
//! budget, failure budget, provider outage) yields no structured output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gptbridge_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use gptbridge_core::{ChatGPTResponse, Config, Error, Result};
use gptbridge_providers::Provider;
use gptbridge_tools::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Completion tool the model must call to end the run.
pub const DONE_TOOL_NAME: &str = "done";

/// Injected once per run when a step produces no tool calls.
const NO_TOOL_CALL_REMINDER: &str =
    "You did not call any tool. Use the browser tools to continue the task, and call `done` \
     with the final response and sources once the task is complete.";

fn done_tool_schema() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": DONE_TOOL_NAME,
            "description": "Complete the task and return the final result. Call this once the ChatGPT response and its cited sources have been extracted.",
            "parameters": ChatGPTResponse::json_schema()
        }
    })
}

/// What a finished run produced, for the orchestrator and for logging.
#[derive(Debug)]
pub struct RunHistory {
    pub structured_output: Option<ChatGPTResponse>,
    pub steps: u32,
    pub duration_ms: u64,
}

pub struct AgentRuntime {
    config: Arc<Config>,
    provider: Arc<dyn Provider>,
    tool_registry: ToolRegistry,
}

impl AgentRuntime {
    pub fn new(config: Arc<Config>, provider: Arc<dyn Provider>, tool_registry: ToolRegistry) -> Self {
        Self {
            config,
            provider,
            tool_registry,
        }
    }

    /// Run the agent on a task string until it calls `done` or a budget runs out.
    pub async fn run(&self, task: &str) -> RunHistory {
        let task_id = uuid::Uuid::new_v4().to_string();
        let start = Instant::now();

        let mut tools = self.tool_registry.get_tool_schemas();
        tools.push(done_tool_schema());

        let mut messages = vec![
            ChatMessage::system(&self.config.chatgpt.system_prompt),
            ChatMessage::user(task),
        ];

        let max_steps = self.config.agent.max_steps;
        let max_failures = self.config.agent.max_failures;
        let mut consecutive_failures = 0u32;
        let mut reminded = false;
        let mut structured_output: Option<ChatGPTResponse> = None;
        let mut steps = 0u32;

        info!(task_id = %task_id, tool_count = tools.len(), max_steps, "Starting agent run");

        for step in 0..max_steps {
            steps = step + 1;
            debug!(task_id = %task_id, step, "LLM call step");

            let response = match self.call_llm_with_retry(&messages, &tools, step).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, step, "LLM call failed after all retries, ending run");
                    break;
                }
            };

            info!(
                content_len = response.content.as_ref().map(|c| c.len()).unwrap_or(0),
                tool_calls_count = response.tool_calls.len(),
                finish_reason = %response.finish_reason,
                "LLM response received"
            );

            if response.tool_calls.is_empty() {
                // One reminder per run; a second tool-less step ends it.
                if reminded {
                    warn!(task_id = %task_id, step, "No tool calls after reminder, ending run");
                    break;
                }
                reminded = true;
                messages.push(ChatMessage::assistant(response.content.as_deref().unwrap_or("")));
                messages.push(ChatMessage::user(NO_TOOL_CALL_REMINDER));
                continue;
            }

            let mut assistant_msg = ChatMessage::assistant(response.content.as_deref().unwrap_or(""));
            assistant_msg.tool_calls = Some(response.tool_calls.clone());
            messages.push(assistant_msg);

            let mut step_failed = false;
            for tool_call in &response.tool_calls {
                if tool_call.name == DONE_TOOL_NAME {
                    match serde_json::from_value::<ChatGPTResponse>(tool_call.arguments.clone()) {
                        Ok(output) => {
                            info!(
                                task_id = %task_id,
                                step,
                                sources = output.sources.len(),
                                "Done tool called with structured output"
                            );
                            structured_output = Some(output);
                            messages.push(ChatMessage::tool_result(&tool_call.id, "Task completed."));
                        }
                        Err(e) => {
                            warn!(task_id = %task_id, error = %e, "Done tool arguments did not match the output schema");
                            step_failed = true;
                            messages.push(ChatMessage::tool_result(
                                &tool_call.id,
                                &format!(
                                    "Error: arguments did not match the required output schema: {}. \
                                     Call done again with a valid response object.",
                                    e
                                ),
                            ));
                        }
                    }
                    continue;
                }

                let (result, is_error) = self.execute_tool_call(tool_call).await;
                if is_error {
                    step_failed = true;
                }
                let mut tool_msg = ChatMessage::tool_result(&tool_call.id, &result);
                tool_msg.name = Some(tool_call.name.clone());
                messages.push(tool_msg);
            }

            if structured_output.is_some() {
                break;
            }

            if step_failed {
                consecutive_failures += 1;
                warn!(task_id = %task_id, consecutive_failures, max_failures, "Step had a failed tool call");
                if consecutive_failures >= max_failures {
                    warn!(task_id = %task_id, "Aborting run: consecutive failure budget exhausted");
                    break;
                }
            } else {
                consecutive_failures = 0;
            }

            if step == max_steps - 1 {
                warn!(task_id = %task_id, "Reached max steps without a done call");
            }
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            task_id = %task_id,
            steps,
            duration_ms,
            has_output = structured_output.is_some(),
            "Agent run finished"
        );

        RunHistory {
            structured_output,
            steps,
            duration_ms,
        }
    }

    async fn call_llm_with_retry(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
        step: u32,
    ) -> Result<LLMResponse> {
        let max_retries = self.config.agent.llm_max_retries;
        let base_delay_ms = self.config.agent.llm_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, max_retries, delay_ms, step, "Retrying LLM call after transient error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.provider.chat(messages, tools).await {
                Ok(r) => {
                    if attempt > 0 {
                        info!(attempt, step, "LLM call succeeded after retry");
                    }
                    return Ok(r);
                }
                Err(e) => {
                    warn!(error = %e, attempt, max_retries, step, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Provider("LLM call failed".to_string())))
    }

    /// Execute one tool call and stringify its outcome for the message history.
    /// Registry-level failures (unknown tool, invalid params, CDP errors) come
    /// back as error text and count against the failure budget.
    async fn execute_tool_call(&self, tool_call: &ToolCallRequest) -> (String, bool) {
        let ctx = ToolContext {
            config: (*self.config).clone(),
        };

        let start = Instant::now();
        let result = self
            .tool_registry
            .execute(&tool_call.name, ctx, tool_call.arguments.clone())
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(val) => {
                info!(tool = %tool_call.name, duration_ms, "Tool call finished");
                (val.to_string(), false)
            }
            Err(e) => {
                warn!(tool = %tool_call.name, duration_ms, error = %e, "Tool call failed");
                (format!("Error: {}", e), true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gptbridge_tools::{Tool, ToolSchema};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<LLMResponse>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<LLMResponse>>) -> Self {
            Self {
                script: Mutex::new(script.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, _messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LLMResponse::default()))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    struct RecorderTool {
        calls: Arc<Mutex<Vec<Value>>>,
    }

    #[async_trait]
    impl Tool for RecorderTool {
        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "recorder",
                description: "Records the parameters it was called with.",
                parameters: json!({"type": "object", "properties": {}}),
            }
        }

        fn validate(&self, _params: &Value) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
            self.calls.lock().unwrap().push(params);
            Ok(json!({"ok": true}))
        }
    }

    fn fast_config() -> Arc<Config> {
        let mut config = Config::default();
        config.agent.llm_retry_delay_ms = 1;
        Arc::new(config)
    }

    fn runtime_with(script: Vec<Result<LLMResponse>>) -> AgentRuntime {
        AgentRuntime::new(
            fast_config(),
            Arc::new(ScriptedProvider::new(script)),
            ToolRegistry::new(),
        )
    }

    fn done_call(arguments: Value) -> LLMResponse {
        LLMResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_done".to_string(),
                name: DONE_TOOL_NAME.to_string(),
                arguments,
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Value::Null,
        }
    }

    fn text_only(content: &str) -> LLMResponse {
        LLMResponse {
            content: Some(content.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_finishes_on_done_call() {
        let runtime = runtime_with(vec![Ok(done_call(json!({
            "response": "Rust is a systems language.",
            "sources": [{"url": "https://rust-lang.org", "order": 1}]
        })))]);

        let history = runtime.run("task").await;
        let output = history.structured_output.unwrap();
        assert_eq!(output.response, "Rust is a systems language.");
        assert_eq!(output.sources.len(), 1);
        assert_eq!(history.steps, 1);
    }

    #[tokio::test]
    async fn test_run_reminds_once_then_ends() {
        let runtime = runtime_with(vec![
            Ok(text_only("thinking out loud")),
            Ok(text_only("still no tool call")),
        ]);

        let history = runtime.run("task").await;
        assert!(history.structured_output.is_none());
        assert_eq!(history.steps, 2);
    }

    #[tokio::test]
    async fn test_run_recovers_after_malformed_done() {
        // First done call is missing the required "response" field
        let runtime = runtime_with(vec![
            Ok(done_call(json!({"sources": []}))),
            Ok(done_call(json!({"response": "second try", "sources": []}))),
        ]);

        let history = runtime.run("task").await;
        let output = history.structured_output.unwrap();
        assert_eq!(output.response, "second try");
        assert_eq!(history.steps, 2);
    }

    #[tokio::test]
    async fn test_run_aborts_after_consecutive_failures() {
        let bad_call = || LLMResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_x".to_string(),
                name: "no_such_tool".to_string(),
                arguments: json!({}),
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Value::Null,
        };
        let runtime = runtime_with(vec![
            Ok(bad_call()),
            Ok(bad_call()),
            Ok(bad_call()),
            Ok(bad_call()),
        ]);

        let history = runtime.run("task").await;
        assert!(history.structured_output.is_none());
        // Default failure budget is 3 consecutive failed steps
        assert_eq!(history.steps, 3);
    }

    #[tokio::test]
    async fn test_run_retries_llm_errors() {
        let runtime = runtime_with(vec![
            Err(Error::Provider("rate limited".to_string())),
            Ok(done_call(json!({"response": "after retry", "sources": []}))),
        ]);

        let history = runtime.run("task").await;
        assert_eq!(history.structured_output.unwrap().response, "after retry");
        assert_eq!(history.steps, 1);
    }

    #[tokio::test]
    async fn test_run_ends_when_retries_exhausted() {
        let mut config = Config::default();
        config.agent.llm_retry_delay_ms = 1;
        config.agent.llm_max_retries = 1;
        let script: Vec<Result<LLMResponse>> = vec![
            Err(Error::Provider("down".to_string())),
            Err(Error::Provider("down".to_string())),
        ];
        let runtime = AgentRuntime::new(
            Arc::new(config),
            Arc::new(ScriptedProvider::new(script)),
            ToolRegistry::new(),
        );

        let history = runtime.run("task").await;
        assert!(history.structured_output.is_none());
        assert_eq!(history.steps, 1);
    }

    #[tokio::test]
    async fn test_run_dispatches_tool_calls_through_registry() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(RecorderTool { calls: calls.clone() }));

        let step1 = LLMResponse {
            content: None,
            tool_calls: vec![ToolCallRequest {
                id: "tc_1".to_string(),
                name: "recorder".to_string(),
                arguments: json!({"x": 1}),
            }],
            finish_reason: "tool_calls".to_string(),
            usage: Value::Null,
        };
        let runtime = AgentRuntime::new(
            fast_config(),
            Arc::new(ScriptedProvider::new(vec![
                Ok(step1),
                Ok(done_call(json!({"response": "done", "sources": []}))),
            ])),
            registry,
        );

        let history = runtime.run("task").await;
        assert!(history.structured_output.is_some());
        assert_eq!(history.steps, 2);
        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0]["x"], 1);
    }

    #[test]
    fn test_done_tool_schema_shape() {
        let schema = done_tool_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["function"]["name"], "done");
        assert!(schema["function"]["parameters"]["properties"]["response"].is_object());
    }
}
