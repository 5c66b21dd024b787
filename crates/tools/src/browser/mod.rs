//! CDP-based browser automation.
//!
//! - One Chrome process per session, launched with a private user data dir
//! - Full Chrome DevTools Protocol over WebSocket
//! - Accessibility snapshot + ref system for AI-friendly element targeting
//! - Navigation restricted to the configured domain allowlist

pub mod cdp;
pub mod session;
pub mod snapshot;
pub mod tool;

pub use session::BrowserSession;
pub use tool::BrowserTool;
