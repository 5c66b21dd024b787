pub mod browser;
pub mod chatgpt;
pub mod registry;

use async_trait::async_trait;
use gptbridge_core::{Config, Result};
use serde_json::Value;

pub use registry::ToolRegistry;

/// Truncate a string to at most `max_bytes` bytes, backing up to a valid
/// UTF-8 char boundary when the cut would split a character.
pub fn safe_truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    // Find the last valid char boundary at or before max_bytes
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[derive(Clone)]
pub struct ToolContext {
    pub config: Config,
}

pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<Value>;
}
