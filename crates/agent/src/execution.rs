//! Execution orchestrator: one agent run per prompt, bounded by a wall-clock
//! timeout, browser closed on every path out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gptbridge_core::{ChatGPTResponse, Config, Error, Result};
use tracing::{info, warn};

use crate::runtime::AgentRuntime;
use crate::setup::AgentSetup;

/// The boundary the HTTP layer talks to. Implemented by `AgentExecution` in
/// production and by mocks in server tests.
#[async_trait]
pub trait PromptExecutor: Send + Sync {
    /// Run the agent on a prompt. `Ok(None)` means the run finished without
    /// producing structured output; it is not an error.
    async fn execute(&self, prompt: &str) -> Result<Option<ChatGPTResponse>>;
}

pub struct AgentExecution {
    config: Arc<Config>,
    setup: AgentSetup,
}

impl AgentExecution {
    pub fn new(config: Arc<Config>) -> Self {
        let setup = AgentSetup::new(config.clone());
        Self { config, setup }
    }

    async fn run_once(&self, prompt: &str) -> Result<Option<ChatGPTResponse>> {
        let provider = self.setup.create_provider()?;
        let session = self.setup.create_session().await?;
        let task = self.setup.create_task(prompt);
        let registry = self.setup.create_registry(session.clone());

        let runtime = AgentRuntime::new(self.config.clone(), provider, registry);
        let history = runtime.run(&task).await;

        session.close().await;

        if let Some(output) = history.structured_output {
            if !output.sources_in_order() {
                warn!(
                    sources = output.sources.len(),
                    "Source ordering is not monotonic, passing through unchanged"
                );
            }
            return Ok(Some(output));
        }

        info!(steps = history.steps, "Agent run produced no structured output");
        Ok(None)
    }
}

#[async_trait]
impl PromptExecutor for AgentExecution {
    async fn execute(&self, prompt: &str) -> Result<Option<ChatGPTResponse>> {
        let timeout = Duration::from_secs(self.config.agent.run_timeout_secs);
        match tokio::time::timeout(timeout, self.run_once(prompt)).await {
            Ok(result) => result,
            // Cancelling the run future drops the session; its Drop kills
            // the Chrome child.
            Err(_) => Err(Error::Timeout(format!(
                "agent run exceeded {}s",
                self.config.agent.run_timeout_secs
            ))),
        }
    }
}
