//! Per-request assembly: provider, browser session, task string, tool set.

use std::sync::Arc;

use gptbridge_core::{Config, Error, Result};
use gptbridge_providers::{create_provider, Provider};
use gptbridge_tools::browser::{BrowserSession, BrowserTool};
use gptbridge_tools::chatgpt::{EnableSearchTool, NavigateUrlTool, SubmitPromptTool};
use gptbridge_tools::ToolRegistry;

pub struct AgentSetup {
    config: Arc<Config>,
}

impl AgentSetup {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Build the LLM provider from the configured model and provider name.
    pub fn create_provider(&self) -> Result<Arc<dyn Provider>> {
        let provider = create_provider(
            &self.config,
            &self.config.agent.model,
            self.config.agent.provider.as_deref(),
        )
        .map_err(|e| Error::Provider(e.to_string()))?;
        Ok(Arc::from(provider))
    }

    /// Launch a fresh browser session scoped to this request.
    pub async fn create_session(&self) -> Result<Arc<BrowserSession>> {
        let session = BrowserSession::launch(&self.config).await?;
        Ok(Arc::new(session))
    }

    /// Wrap the user prompt in the fixed task template. The sources
    /// instruction is always appended so the agent asks ChatGPT for
    /// citations regardless of the prompt's own wording.
    pub fn create_task(&self, prompt: &str) -> String {
        let full_prompt = format!("{}. Retrieve sources", prompt.trim());
        format!(
            "\nSubmit this prompt to ChatGPT: \"{}\"\n\n\
             IMPORTANT: The prompt above ALREADY includes the instruction to retrieve sources. \
             Submit it exactly as shown without adding or modifying anything.\n",
            full_prompt
        )
    }

    /// Register the three ChatGPT adapters and the generic browser tool,
    /// all holding the same session handle.
    pub fn create_registry(&self, session: Arc<BrowserSession>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NavigateUrlTool::new(session.clone())));
        registry.register(Arc::new(EnableSearchTool::new(session.clone())));
        registry.register(Arc::new(SubmitPromptTool::new(session.clone())));
        registry.register(Arc::new(BrowserTool::new(session)));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_task_template() {
        let setup = AgentSetup::new(Arc::new(Config::default()));
        let task = setup.create_task("What is Rust?");
        assert_eq!(
            task,
            "\nSubmit this prompt to ChatGPT: \"What is Rust?. Retrieve sources\"\n\n\
             IMPORTANT: The prompt above ALREADY includes the instruction to retrieve sources. \
             Submit it exactly as shown without adding or modifying anything.\n"
        );
    }

    #[test]
    fn test_create_task_trims_prompt() {
        let setup = AgentSetup::new(Arc::new(Config::default()));
        let task = setup.create_task("  spaced out  ");
        assert!(task.contains("\"spaced out. Retrieve sources\""));
        assert!(!task.contains("  spaced out"));
    }

    #[test]
    fn test_create_provider_uses_config_key() {
        let mut config = Config::default();
        config.providers.get_mut("anthropic").unwrap().api_key = "sk-ant-test".to_string();
        let setup = AgentSetup::new(Arc::new(config));
        let provider = setup.create_provider().unwrap();
        assert_eq!(provider.name(), "anthropic");
    }
}
