pub mod execution;
pub mod runtime;
pub mod setup;

pub use execution::{AgentExecution, PromptExecutor};
pub use runtime::{AgentRuntime, RunHistory};
pub use setup::AgentSetup;
