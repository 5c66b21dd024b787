use gptbridge_core::Config;

use crate::{AnthropicProvider, OpenAIProvider, Provider};

/// Infer the provider name from the model string prefix.
/// Returns None when the prefix is not recognized.
pub fn infer_provider_from_model(model: &str) -> Option<&'static str> {
    if model.starts_with("anthropic/") || model.starts_with("claude-") {
        Some("anthropic")
    } else if model.starts_with("openai/")
        || model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
    {
        Some("openai")
    } else {
        None
    }
}

fn env_key_var(provider: &str) -> Option<&'static str> {
    match provider {
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        _ => None,
    }
}

/// Resolve the API key for a provider: config entry first, then the
/// conventional environment variable.
pub fn resolve_api_key(config: &Config, provider: &str) -> Option<String> {
    if let Some(cfg) = config.get_provider(provider) {
        if !cfg.api_key.is_empty() {
            return Some(cfg.api_key.clone());
        }
    }
    env_key_var(provider)
        .and_then(|var| std::env::var(var).ok())
        .filter(|k| !k.is_empty())
}

/// Pick a provider when neither an explicit name nor a model prefix decides.
fn fallback_provider_name(config: &Config) -> Option<&'static str> {
    for name in ["anthropic", "openai"] {
        if resolve_api_key(config, name).is_some() {
            return Some(name);
        }
    }
    None
}

/// Provider construction entry point.
///
/// Resolution order:
/// 1. `explicit_provider` (from config.agent.provider)
/// 2. model string prefix (e.g. "claude-..." selects anthropic)
/// 3. the first provider with a usable API key
pub fn create_provider(
    config: &Config,
    model: &str,
    explicit_provider: Option<&str>,
) -> anyhow::Result<Box<dyn Provider>> {
    let max_tokens = config.agent.max_tokens;
    let temperature = config.agent.temperature;

    let effective_provider: &str = if let Some(ep) = explicit_provider {
        ep
    } else if let Some(inferred) = infer_provider_from_model(model) {
        inferred
    } else if let Some(fallback) = fallback_provider_name(config) {
        fallback
    } else {
        return Err(anyhow::anyhow!(
            "No LLM provider configured. Set 'provider' in config, use a recognized model prefix \
             (e.g. 'claude-...' or 'gpt-...'), or add an API key to the providers section."
        ));
    };

    let api_key = resolve_api_key(config, effective_provider).ok_or_else(|| {
        let env_hint = env_key_var(effective_provider).unwrap_or("the provider's API key variable");
        anyhow::anyhow!(
            "No API key for provider '{}'. Set providers.{}.apiKey in config or export {}.",
            effective_provider,
            effective_provider,
            env_hint
        )
    })?;

    let api_base = config
        .get_provider(effective_provider)
        .and_then(|p| p.api_base.as_deref());

    match effective_provider {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            &api_key,
            api_base,
            model,
            max_tokens,
            temperature,
        )) as Box<dyn Provider>),
        "openai" => Ok(Box::new(OpenAIProvider::new(
            &api_key,
            api_base,
            model,
            max_tokens,
            temperature,
        )) as Box<dyn Provider>),
        other => Err(anyhow::anyhow!(
            "Unknown provider '{}'. Supported providers: anthropic, openai.",
            other
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_provider_from_model() {
        assert_eq!(infer_provider_from_model("claude-sonnet-4-0"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("anthropic/claude-sonnet-4-0"), Some("anthropic"));
        assert_eq!(infer_provider_from_model("gpt-4o"), Some("openai"));
        assert_eq!(infer_provider_from_model("openai/gpt-4o-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("o3-mini"), Some("openai"));
        assert_eq!(infer_provider_from_model("some-unknown-model"), None);
    }

    #[test]
    fn test_create_provider_model_prefix() {
        let mut config = Config::default();
        config.providers.get_mut("anthropic").unwrap().api_key = "sk-ant-test".to_string();
        let result = create_provider(&config, "claude-sonnet-4-0", None);
        assert!(result.is_ok());
        assert_eq!(result.unwrap().name(), "anthropic");
    }

    #[test]
    fn test_create_provider_explicit_wins() {
        let mut config = Config::default();
        config.providers.get_mut("openai").unwrap().api_key = "sk-test".to_string();
        // Model has an anthropic prefix but openai is forced
        let result = create_provider(&config, "claude-sonnet-4-0", Some("openai"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().name(), "openai");
    }

    #[test]
    fn test_create_provider_unknown_name_fails() {
        let mut config = Config::default();
        config.providers.get_mut("anthropic").unwrap().api_key = "sk-ant-test".to_string();
        let result = create_provider(&config, "claude-sonnet-4-0", Some("gemini"));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_api_key_from_config() {
        let mut config = Config::default();
        config.providers.get_mut("anthropic").unwrap().api_key = "sk-ant-test".to_string();
        assert_eq!(resolve_api_key(&config, "anthropic").as_deref(), Some("sk-ant-test"));
    }
}
