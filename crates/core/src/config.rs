use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

/// Default system prompt for the browser agent. Walks the model through the
/// chatgpt.com flow and pins down the extraction rules for the final answer.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"ROLE AND OBJECTIVE:
You are a ChatGPT interface agent. Your goal is to navigate to chatgpt.com, submit user prompts with web search enabled, and extract complete responses with cited sources.

TASK SEQUENCE:
1. Navigate to https://chatgpt.com using the navigate_to_url tool
2. Use the enable_chatgpt_search tool to activate the web search feature
3. Enter the user's prompt in the textbox exactly as provided
4. Use the submit_chatgpt_prompt tool to submit the prompt immediately after entering it
5. Wait for the complete response to load
6. Scroll to the end of the response
7. Click the 'Sources' button if it exists
8. Extract all source URLs from the citations panel in order of appearance

RESPONSE EXTRACTION REQUIREMENTS:
- Preserve ALL formatting exactly as displayed:
  * Markdown syntax (headers, bold, italic, lists, tables, etc.)
  * Line breaks and paragraph spacing
  * Code blocks and inline code
  * Bullet points and numbered lists
  * Any other formatting elements
- Return the complete response text without modifications, truncation, or summarization
- Do NOT paraphrase any part of the response

SOURCE EXTRACTION REQUIREMENTS:
- Extract sources ONLY from the citations panel (accessed via the 'Sources' button)
- Do NOT extract inline hyperlinks from the response text itself
- For each source, record:
  * The complete URL
  * Its order of appearance (1-based index)
- Return sources as an array of objects with 'url' and 'order' fields
- If no 'Sources' button exists or citations panel is empty, return an empty array

OUTPUT FORMAT:
{
  "response": "<complete formatted response text>",
  "sources": [
    {"url": "https://example.com", "order": 1},
    {"url": "https://example2.com", "order": 2}
  ]
}"#;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatGPTConfig {
    #[serde(default = "default_chatgpt_url")]
    pub url: String,
    /// Hosts the browser session may navigate to. Subdomains of an entry
    /// are allowed as well.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_chatgpt_url() -> String {
    "https://chatgpt.com".to_string()
}

fn default_allowed_domains() -> Vec<String> {
    vec!["chatgpt.com".to_string()]
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for ChatGPTConfig {
    fn default() -> Self {
        Self {
            url: default_chatgpt_url(),
            allowed_domains: default_allowed_domains(),
            system_prompt: default_system_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Headless Chrome. Off by default so a ChatGPT login session can be
    /// established interactively.
    #[serde(default)]
    pub headless: bool,
    /// Explicit browser binary path. If unset, well-known install
    /// locations are probed.
    #[serde(default)]
    pub binary: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Explicit LLM provider. If unset, inferred from the model prefix
    /// (e.g. "claude-..." selects anthropic).
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
}

fn default_model() -> String {
    "claude-sonnet-4-0".to_string()
}

fn default_temperature() -> f32 {
    0.0
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_max_steps() -> u32 {
    25
}

fn default_max_failures() -> u32 {
    3
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

fn default_run_timeout_secs() -> u64 {
    600
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            provider: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_steps: default_max_steps(),
            max_failures: default_max_failures(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
            run_timeout_secs: default_run_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub chatgpt: ChatGPTConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let mut providers = HashMap::new();
        providers.insert("anthropic".to_string(), ProviderConfig::default());
        providers.insert("openai".to_string(), ProviderConfig::default());

        Self {
            chatgpt: ChatGPTConfig::default(),
            browser: BrowserConfig::default(),
            agent: AgentConfig::default(),
            server: ServerConfig::default(),
            providers,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.chatgpt.url, "https://chatgpt.com");
        assert_eq!(cfg.chatgpt.allowed_domains, vec!["chatgpt.com"]);
        assert_eq!(cfg.agent.model, "claude-sonnet-4-0");
        assert_eq!(cfg.agent.temperature, 0.0);
        assert_eq!(cfg.agent.max_steps, 25);
        assert_eq!(cfg.agent.max_failures, 3);
        assert_eq!(cfg.server.port, 8000);
        assert!(!cfg.browser.headless);
    }

    #[test]
    fn test_camel_case_overrides() {
        let raw = r#"{
  "chatgpt": { "allowedDomains": ["chatgpt.com", "openai.com"] },
  "agent": { "maxSteps": 10, "runTimeoutSecs": 120 },
  "browser": { "headless": true }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.chatgpt.allowed_domains.len(), 2);
        assert_eq!(cfg.agent.max_steps, 10);
        assert_eq!(cfg.agent.run_timeout_secs, 120);
        assert!(cfg.browser.headless);
        // Untouched sections keep their defaults
        assert_eq!(cfg.agent.model, "claude-sonnet-4-0");
        assert_eq!(cfg.server.host, "0.0.0.0");
    }

    #[test]
    fn test_default_system_prompt_present() {
        let cfg = Config::default();
        assert!(cfg.chatgpt.system_prompt.contains("TASK SEQUENCE"));
        assert!(cfg.chatgpt.system_prompt.contains("OUTPUT FORMAT"));
    }
}
