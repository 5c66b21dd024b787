pub mod config;
pub mod error;
pub mod models;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{ChatGPTResponse, PromptRequest, Source};
pub use paths::Paths;
