use std::sync::Arc;

use gptbridge_agent::{AgentExecution, PromptExecutor};
use gptbridge_core::{Config, Paths, PromptRequest};

use super::serve::NO_OUTPUT_DETAIL;

/// One-shot execution: print the structured response as JSON, or exit
/// non-zero when the run produces nothing.
pub async fn run(prompt: &str) -> anyhow::Result<()> {
    let request = PromptRequest {
        prompt: prompt.to_string(),
    };
    request.validate()?;

    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Arc::new(Config::load_or_default(&paths)?);

    let executor = AgentExecution::new(config);
    match executor.execute(prompt).await? {
        Some(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        None => anyhow::bail!("{}", NO_OUTPUT_DETAIL),
    }
}
