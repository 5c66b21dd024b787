//! ChatGPT page adapters.
//!
//! Three single-purpose tools the planning LLM drives to operate chatgpt.com:
//! navigate, enable web search, and press send. Each returns a tagged
//! [`ToolOutcome`] instead of an `Err`, so failures degrade to an outcome
//! value the calling agent can reason about.

use async_trait::async_trait;
use gptbridge_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::{Tool, ToolContext, ToolSchema};

/// ChatGPT's composer search toggle.
pub const SEARCH_BUTTON_SELECTOR: &str = "[data-testid=\"composer-button-search\"]";
/// ChatGPT's send button.
pub const SEND_BUTTON_SELECTOR: &str = "[data-testid=\"send-button\"]";

/// How long to wait for a button to appear.
const SELECTOR_WAIT_MS: u64 = 5000;
/// How long to wait for aria-pressed to flip after clicking the search toggle.
const STATE_CHANGE_WAIT_MS: u64 = 5000;
/// Poll interval while waiting for the toggle state.
const STATE_POLL_MS: u64 = 200;
/// Settle time after clicking send.
const SUBMIT_SETTLE_MS: u64 = 1000;

/// Chromium network-failure markers that mean "site unavailable" rather than
/// a bug in the agent.
const NETWORK_ERROR_MARKERS: &[&str] = &[
    "ERR_NAME_NOT_RESOLVED",
    "ERR_INTERNET_DISCONNECTED",
    "ERR_CONNECTION_REFUSED",
    "ERR_TIMED_OUT",
    "net::",
];

/// Transport-level failures of the CDP client itself.
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "Failed to connect to CDP endpoint",
    "Failed to send CDP command",
    "CDP response channel closed",
];

/// Result tag for adapter outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Success,
    NotFound,
    Disabled,
    Error,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::NotFound => "not_found",
            Self::Disabled => "disabled",
            Self::Error => "error",
        }
    }
}

/// Tagged outcome serialized into every adapter tool result. The message is
/// the human-readable text the planning LLM reasons about; the tag keeps
/// behavior testable without string matching.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub outcome: OutcomeKind,
    pub message: String,
}

impl ToolOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            outcome: OutcomeKind::Success,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            outcome: OutcomeKind::NotFound,
            message: message.into(),
        }
    }

    pub fn disabled(message: impl Into<String>) -> Self {
        Self {
            outcome: OutcomeKind::Disabled,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: OutcomeKind::Error,
            message: message.into(),
        }
    }

    pub fn into_value(self) -> Value {
        json!({
            "outcome": self.outcome.as_str(),
            "message": self.message,
        })
    }
}

fn is_network_unavailable(error: &str) -> bool {
    NETWORK_ERROR_MARKERS.iter().any(|m| error.contains(m))
}

fn is_connection_error(error: &str) -> bool {
    CONNECTION_ERROR_MARKERS.iter().any(|m| error.contains(m))
}

/// Map a navigation failure onto the message the agent is trained to expect.
fn classify_navigation_failure(url: &str, error: &str) -> ToolOutcome {
    if is_connection_error(error) {
        ToolOutcome::error(format!("Browser connection error: {}", error))
    } else if is_network_unavailable(error) {
        ToolOutcome::error(format!("Navigation failed - site unavailable: {}", url))
    } else {
        ToolOutcome::error(format!("Navigation failed: {}", error))
    }
}

/// Map a search/submit failure onto an error outcome.
fn classify_adapter_failure(prefix: &str, error: &str) -> ToolOutcome {
    if is_connection_error(error) {
        ToolOutcome::error(format!("Browser connection error: {}", error))
    } else {
        ToolOutcome::error(format!("{}: {}", prefix, error))
    }
}

/// Pre-click decision for the search toggle. A `Some` return means the
/// toggle is already on and no click should happen.
fn search_precheck(pressed: Option<&str>) -> Option<ToolOutcome> {
    if pressed == Some("true") {
        Some(ToolOutcome::success("Search is already enabled"))
    } else {
        None
    }
}

/// Pre-click decision for the send button. A present `disabled` attribute
/// (even empty) means the button is inert and must not be clicked.
fn submit_precheck(disabled: Option<&str>) -> Option<ToolOutcome> {
    disabled.map(|_| {
        ToolOutcome::disabled("Submit button is disabled - prompt may be empty or invalid")
    })
}

// ─── navigate_to_url ──────────────────────────────────────────────────

pub struct NavigateUrlTool {
    session: Arc<BrowserSession>,
}

impl NavigateUrlTool {
    pub const NAME: &'static str = "navigate_to_url";

    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    fn parameters() -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to navigate to (must include protocol, e.g., https://)"
                },
                "new_tab": {
                    "type": "boolean",
                    "description": "Whether to open the URL in a new tab (default: false)"
                }
            },
            "required": ["url"]
        })
    }

    fn validate_params(params: &Value) -> Result<()> {
        match params.get("url").and_then(|v| v.as_str()) {
            Some(url) if !url.is_empty() => Ok(()),
            _ => Err(Error::Validation("Missing required parameter: url".into())),
        }
    }
}

#[async_trait]
impl Tool for NavigateUrlTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME,
            description: "Navigate to a specific URL. The URL must include the protocol (e.g., https://).",
            parameters: Self::parameters(),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::validate_params(params)
    }

    async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
        let url = params["url"].as_str().unwrap_or_default().to_string();
        let new_tab = params["new_tab"].as_bool().unwrap_or(false);

        let result = if new_tab {
            self.session.open_in_new_tab(&url).await
        } else {
            self.session.navigate(&url).await
        };

        let outcome = match result {
            Ok(()) => {
                info!(url = %url, new_tab, "Navigation complete");
                if new_tab {
                    ToolOutcome::success(format!("Opened new tab with URL {}", url))
                } else {
                    ToolOutcome::success(format!("Navigated to {}", url))
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Navigation failed");
                classify_navigation_failure(&url, &e.to_string())
            }
        };

        Ok(outcome.into_value())
    }
}

// ─── enable_chatgpt_search ────────────────────────────────────────────

pub struct EnableSearchTool {
    session: Arc<BrowserSession>,
}

impl EnableSearchTool {
    pub const NAME: &'static str = "enable_chatgpt_search";

    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    /// Checks the toggle state first; clicking is skipped when search is
    /// already on, so the call is idempotent.
    async fn run(&self) -> Result<ToolOutcome> {
        if !self
            .session
            .wait_for_selector(SEARCH_BUTTON_SELECTOR, SELECTOR_WAIT_MS)
            .await?
        {
            return Ok(ToolOutcome::not_found(
                "Search button not found - may not be available on this page",
            ));
        }

        let pressed = self
            .session
            .get_attribute(SEARCH_BUTTON_SELECTOR, "aria-pressed")
            .await?;
        if let Some(outcome) = search_precheck(pressed.as_deref()) {
            return Ok(outcome);
        }

        if !self.session.click_selector(SEARCH_BUTTON_SELECTOR).await? {
            return Ok(ToolOutcome::not_found(
                "Search button not found - may not be available on this page",
            ));
        }

        // Wait for the toggle state to update
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(STATE_CHANGE_WAIT_MS) {
            let pressed = self
                .session
                .get_attribute(SEARCH_BUTTON_SELECTOR, "aria-pressed")
                .await?;
            if pressed.as_deref() == Some("true") {
                return Ok(ToolOutcome::success("Search feature enabled successfully"));
            }
            tokio::time::sleep(Duration::from_millis(STATE_POLL_MS)).await;
        }

        Ok(ToolOutcome::success(
            "Search button clicked but state change timeout - search may still be enabled",
        ))
    }
}

#[async_trait]
impl Tool for EnableSearchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME,
            description: "Enable ChatGPT's web search feature by clicking the Search toggle. Checks the current state and only clicks if search is disabled.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: ToolContext, _params: Value) -> Result<Value> {
        let outcome = match self.run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "enable_chatgpt_search failed");
                classify_adapter_failure("Failed to enable search", &e.to_string())
            }
        };
        Ok(outcome.into_value())
    }
}

// ─── submit_chatgpt_prompt ────────────────────────────────────────────

pub struct SubmitPromptTool {
    session: Arc<BrowserSession>,
}

impl SubmitPromptTool {
    pub const NAME: &'static str = "submit_chatgpt_prompt";

    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    async fn run(&self) -> Result<ToolOutcome> {
        if !self
            .session
            .wait_for_selector(SEND_BUTTON_SELECTOR, SELECTOR_WAIT_MS)
            .await?
        {
            return Ok(ToolOutcome::not_found(
                "Submit button not found - may not be available on this page",
            ));
        }

        let disabled = self
            .session
            .get_attribute(SEND_BUTTON_SELECTOR, "disabled")
            .await?;
        if let Some(outcome) = submit_precheck(disabled.as_deref()) {
            return Ok(outcome);
        }

        if !self.session.click_selector(SEND_BUTTON_SELECTOR).await? {
            return Ok(ToolOutcome::not_found(
                "Submit button not found - may not be available on this page",
            ));
        }

        // Give the submission a moment to register
        tokio::time::sleep(Duration::from_millis(SUBMIT_SETTLE_MS)).await;

        Ok(ToolOutcome::success("Prompt submitted successfully"))
    }
}

#[async_trait]
impl Tool for SubmitPromptTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME,
            description: "Submit the ChatGPT prompt by clicking the send button. Call this immediately after the prompt is written in the text input.",
            parameters: json!({"type": "object", "properties": {}}),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, _ctx: ToolContext, _params: Value) -> Result<Value> {
        let outcome = match self.run().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "submit_chatgpt_prompt failed");
                classify_adapter_failure("Failed to submit prompt", &e.to_string())
            }
        };
        Ok(outcome.into_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_names_match_system_prompt() {
        assert_eq!(NavigateUrlTool::NAME, "navigate_to_url");
        assert_eq!(EnableSearchTool::NAME, "enable_chatgpt_search");
        assert_eq!(SubmitPromptTool::NAME, "submit_chatgpt_prompt");
    }

    #[test]
    fn test_selectors() {
        assert_eq!(SEARCH_BUTTON_SELECTOR, "[data-testid=\"composer-button-search\"]");
        assert_eq!(SEND_BUTTON_SELECTOR, "[data-testid=\"send-button\"]");
    }

    #[test]
    fn test_outcome_tags() {
        assert_eq!(ToolOutcome::success("ok").into_value()["outcome"], "success");
        assert_eq!(
            ToolOutcome::not_found("missing").into_value()["outcome"],
            "not_found"
        );
        assert_eq!(
            ToolOutcome::disabled("inert").into_value()["outcome"],
            "disabled"
        );
        assert_eq!(ToolOutcome::error("boom").into_value()["outcome"], "error");
    }

    #[test]
    fn test_outcome_keeps_message() {
        let value = ToolOutcome::success("Navigated to https://chatgpt.com").into_value();
        assert_eq!(value["message"], "Navigated to https://chatgpt.com");
    }

    #[test]
    fn test_is_network_unavailable() {
        assert!(is_network_unavailable("net::ERR_NAME_NOT_RESOLVED"));
        assert!(is_network_unavailable(
            "Browser error: Page.navigate failed: net::ERR_INTERNET_DISCONNECTED"
        ));
        assert!(is_network_unavailable("something ERR_CONNECTION_REFUSED"));
        assert!(is_network_unavailable("ERR_TIMED_OUT while loading"));
        assert!(!is_network_unavailable("JavaScript exception: boom"));
    }

    #[test]
    fn test_is_connection_error() {
        assert!(is_connection_error(
            "Failed to connect to CDP endpoint ws://127.0.0.1:9222: refused"
        ));
        assert!(is_connection_error("CDP response channel closed"));
        assert!(!is_connection_error("net::ERR_TIMED_OUT"));
    }

    #[test]
    fn test_classify_navigation_failure_network() {
        let outcome = classify_navigation_failure(
            "https://chatgpt.com",
            "Browser error: Page.navigate failed: net::ERR_NAME_NOT_RESOLVED",
        );
        assert_eq!(outcome.outcome, OutcomeKind::Error);
        assert_eq!(
            outcome.message,
            "Navigation failed - site unavailable: https://chatgpt.com"
        );
    }

    #[test]
    fn test_classify_navigation_failure_connection() {
        let outcome =
            classify_navigation_failure("https://chatgpt.com", "CDP response channel closed");
        assert!(outcome.message.starts_with("Browser connection error:"));
    }

    #[test]
    fn test_classify_navigation_failure_other() {
        let outcome = classify_navigation_failure(
            "https://example.com",
            "Browser error: Navigation to https://example.com blocked: host not in allowed domain list",
        );
        assert!(outcome.message.starts_with("Navigation failed:"));
        assert!(outcome.message.contains("blocked"));
    }

    #[test]
    fn test_classify_adapter_failure() {
        let outcome = classify_adapter_failure("Failed to enable search", "JavaScript exception: x");
        assert_eq!(
            outcome.message,
            "Failed to enable search: JavaScript exception: x"
        );

        let outcome =
            classify_adapter_failure("Failed to submit prompt", "CDP response channel closed");
        assert!(outcome.message.starts_with("Browser connection error:"));
    }

    #[test]
    fn test_search_precheck_skips_click_when_already_on() {
        let outcome = search_precheck(Some("true")).unwrap();
        assert_eq!(outcome.outcome, OutcomeKind::Success);
        assert_eq!(outcome.message, "Search is already enabled");
        // Toggle off or attribute unreadable: the click path must run
        assert!(search_precheck(Some("false")).is_none());
        assert!(search_precheck(None).is_none());
    }

    #[test]
    fn test_submit_precheck_blocks_disabled_button() {
        // An empty attribute value still means disabled
        let outcome = submit_precheck(Some("")).unwrap();
        assert_eq!(outcome.outcome, OutcomeKind::Disabled);
        assert!(outcome.message.contains("disabled"));
        assert!(submit_precheck(None).is_none());
    }

    #[test]
    fn test_navigate_parameters_require_url() {
        let params = NavigateUrlTool::parameters();
        assert_eq!(params["required"], json!(["url"]));
        assert!(params["properties"]["new_tab"].is_object());
    }

    #[test]
    fn test_navigate_validate() {
        assert!(NavigateUrlTool::validate_params(&json!({})).is_err());
        assert!(NavigateUrlTool::validate_params(&json!({"url": ""})).is_err());
        assert!(
            NavigateUrlTool::validate_params(&json!({"url": "https://chatgpt.com"})).is_ok()
        );
    }
}
