//! Request and response models for the HTTP API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest prompt the API accepts, in characters.
pub const MAX_PROMPT_CHARS: usize = 10000;

/// Body of `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    /// The prompt to send to ChatGPT.
    pub prompt: String,
}

impl PromptRequest {
    /// Length check applied at the HTTP boundary before any browser work starts.
    /// Counts characters, not bytes, so multibyte input is not penalized.
    pub fn validate(&self) -> Result<()> {
        let len = self.prompt.chars().count();
        if len == 0 {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        if len > MAX_PROMPT_CHARS {
            return Err(Error::Validation(format!(
                "prompt exceeds maximum length of {} characters",
                MAX_PROMPT_CHARS
            )));
        }
        Ok(())
    }
}

/// A cited source from the ChatGPT citations panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// The URL of the source.
    pub url: String,
    /// The order of the source in the response (1-based).
    pub order: u32,
}

/// The structured result of one agent run, as returned by `POST /execute`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ChatGPTResponse {
    /// The complete response text from ChatGPT, formatting preserved.
    pub response: String,
    /// The cited sources, in order of appearance. Empty when the response
    /// has no citations panel.
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl ChatGPTResponse {
    /// JSON schema of this type, used as the parameter schema of the
    /// completion tool the agent must call. Subschemas are inlined so the
    /// result is self-contained (no `$ref`s for the model to chase).
    pub fn json_schema() -> serde_json::Value {
        let mut settings = schemars::gen::SchemaSettings::default();
        settings.inline_subschemas = true;
        let schema = settings.into_generator().into_root_schema_for::<ChatGPTResponse>();
        serde_json::to_value(schema).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
    }

    /// True when source orders run 1..N in sequence. The orders are a soft
    /// contract with the model; callers log a warning on violation rather
    /// than rejecting the payload.
    pub fn sources_in_order(&self) -> bool {
        self.sources
            .iter()
            .enumerate()
            .all(|(i, s)| s.order == (i as u32) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_prompt() {
        let req = PromptRequest { prompt: String::new() };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_accepts_boundary_lengths() {
        let req = PromptRequest { prompt: "x".to_string() };
        assert!(req.validate().is_ok());

        let req = PromptRequest { prompt: "x".repeat(MAX_PROMPT_CHARS) };
        assert!(req.validate().is_ok());

        let req = PromptRequest { prompt: "x".repeat(MAX_PROMPT_CHARS + 1) };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_counts_chars_not_bytes() {
        // 10000 three-byte chars is 30000 bytes but still a valid prompt
        let req = PromptRequest { prompt: "日".repeat(MAX_PROMPT_CHARS) };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_sources_in_order() {
        let resp = ChatGPTResponse {
            response: "text".to_string(),
            sources: vec![
                Source { url: "https://a.example".to_string(), order: 1 },
                Source { url: "https://b.example".to_string(), order: 2 },
            ],
        };
        assert!(resp.sources_in_order());

        let resp = ChatGPTResponse {
            response: "text".to_string(),
            sources: vec![
                Source { url: "https://a.example".to_string(), order: 2 },
                Source { url: "https://b.example".to_string(), order: 1 },
            ],
        };
        assert!(!resp.sources_in_order());

        // A gap in the sequence is flagged too
        let resp = ChatGPTResponse {
            response: "text".to_string(),
            sources: vec![
                Source { url: "https://a.example".to_string(), order: 1 },
                Source { url: "https://b.example".to_string(), order: 3 },
            ],
        };
        assert!(!resp.sources_in_order());

        let empty = ChatGPTResponse { response: "text".to_string(), sources: vec![] };
        assert!(empty.sources_in_order());
    }

    #[test]
    fn test_json_schema_shape() {
        let schema = ChatGPTResponse::json_schema();
        let props = schema.get("properties").and_then(|v| v.as_object()).unwrap();
        assert!(props.contains_key("response"));
        assert!(props.contains_key("sources"));
        let required = schema.get("required").and_then(|v| v.as_array()).unwrap();
        assert!(required.iter().any(|v| v == "response"));
    }

    #[test]
    fn test_response_deserialize_defaults_sources() {
        let resp: ChatGPTResponse = serde_json::from_str(r#"{"response": "hi"}"#).unwrap();
        assert_eq!(resp.response, "hi");
        assert!(resp.sources.is_empty());
    }
}
