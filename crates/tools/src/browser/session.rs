//! Browser session lifecycle.
//!
//! Each session owns one Chrome process and one CDP connection to its active
//! page target. Sessions are created per agent run and torn down when the run
//! finishes; navigation is restricted to the configured domain allowlist.

use super::cdp::CdpClient;
use gptbridge_core::{Config, Error, Paths, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

/// Upper bound on waiting for Page.loadEventFired after Page.navigate.
const PAGE_LOAD_TIMEOUT_SECS: u64 = 10;
/// Settle time after the load event so late-rendering UI can attach.
const POST_LOAD_SETTLE_MS: u64 = 500;
/// Poll interval for wait_for_selector.
const SELECTOR_POLL_MS: u64 = 200;

/// A browser session: one Chrome process plus a CDP client for its page target.
///
/// All state is behind async locks so tools can share the session via `Arc`.
pub struct BrowserSession {
    /// CDP client for the active page target. Replaced when a new tab is opened.
    cdp: Mutex<CdpClient>,
    chrome_process: Mutex<Option<Child>>,
    /// Remote debugging port, used to discover per-target WebSocket URLs.
    pub debug_port: u16,
    allowed_domains: Vec<String>,
    current_url: Mutex<Option<String>>,
    /// Ref map from the latest snapshot: ref id -> {role, name, backendNodeId, ...}.
    refs: Mutex<HashMap<String, Value>>,
}

impl BrowserSession {
    /// Launch a browser process and connect to its first page target.
    pub async fn launch(config: &Config) -> Result<Self> {
        let binary = match &config.browser.binary {
            Some(path) => path.clone(),
            None => find_browser_binary().ok_or_else(|| {
                Error::Browser(
                    "No Chrome/Chromium binary found. Set browser.binary in the config.".into(),
                )
            })?,
        };

        let paths = Paths::new();
        paths.ensure_dirs()?;

        let debug_port = find_free_port().await.map_err(Error::Browser)?;
        let user_data_dir = paths.browser_dir().join(format!("profile-{}", debug_port));
        std::fs::create_dir_all(&user_data_dir)?;

        let args = build_browser_args(debug_port, &user_data_dir, config.browser.headless);

        info!(
            binary = %binary,
            port = debug_port,
            headless = config.browser.headless,
            user_data_dir = %user_data_dir.display(),
            "Launching browser"
        );

        let child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch browser: {}", e)))?;

        wait_for_cdp_ready(debug_port, 15).await.map_err(Error::Browser)?;

        // Connect to the page target (not browser-level) so Page.enable etc. work
        let page_ws_url = get_page_ws_url(debug_port).await.map_err(Error::Browser)?;
        let cdp = CdpClient::connect(&page_ws_url).await.map_err(Error::Browser)?;
        enable_page_domains(&cdp).await?;

        info!(ws_url = %page_ws_url, "CDP connection established (page target)");

        Ok(Self {
            cdp: Mutex::new(cdp),
            chrome_process: Mutex::new(Some(child)),
            debug_port,
            allowed_domains: config.chatgpt.allowed_domains.clone(),
            current_url: Mutex::new(None),
            refs: Mutex::new(HashMap::new()),
        })
    }

    /// Lock the CDP client for direct protocol access.
    pub async fn cdp(&self) -> tokio::sync::MutexGuard<'_, CdpClient> {
        self.cdp.lock().await
    }

    /// Navigate the current tab, enforcing the domain allowlist, and wait for
    /// the page load event (bounded).
    pub async fn navigate(&self, url: &str) -> Result<()> {
        if !host_allowed(url, &self.allowed_domains) {
            return Err(Error::Browser(format!(
                "Navigation to {} blocked: host not in allowed domain list",
                url
            )));
        }

        {
            let cdp = self.cdp.lock().await;
            let mut load_events = cdp.subscribe_event("Page.loadEventFired").await;
            let result = cdp.navigate(url).await.map_err(Error::Browser)?;
            if let Some(err_text) = result.get("errorText").and_then(|v| v.as_str()) {
                if !err_text.is_empty() {
                    return Err(Error::Browser(format!("Page.navigate failed: {}", err_text)));
                }
            }
            // Bounded wait; heavy pages keep streaming after the load event anyway
            let _ = tokio::time::timeout(
                Duration::from_secs(PAGE_LOAD_TIMEOUT_SECS),
                load_events.recv(),
            )
            .await;
            tokio::time::sleep(Duration::from_millis(POST_LOAD_SETTLE_MS)).await;
        }

        *self.current_url.lock().await = Some(url.to_string());
        Ok(())
    }

    /// Open a URL in a new tab and switch the CDP connection to it.
    pub async fn open_in_new_tab(&self, url: &str) -> Result<()> {
        if !host_allowed(url, &self.allowed_domains) {
            return Err(Error::Browser(format!(
                "Navigation to {} blocked: host not in allowed domain list",
                url
            )));
        }

        let target_id = {
            let cdp = self.cdp.lock().await;
            let target_id = cdp.create_target("about:blank").await.map_err(Error::Browser)?;
            let _ = cdp.activate_target(&target_id).await;
            target_id
        };

        let ws_url = get_target_ws_url(self.debug_port, &target_id)
            .await
            .map_err(Error::Browser)?;
        let client = CdpClient::connect(&ws_url).await.map_err(Error::Browser)?;
        enable_page_domains(&client).await?;

        *self.cdp.lock().await = client;
        self.refs.lock().await.clear();

        self.navigate(url).await
    }

    /// Evaluate JavaScript and return the raw Runtime.evaluate result.
    pub async fn evaluate_raw(&self, expression: &str) -> Result<Value> {
        let cdp = self.cdp.lock().await;
        cdp.evaluate_js(expression).await.map_err(Error::Browser)
    }

    /// Evaluate JavaScript and return its value, surfacing page exceptions as errors.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self.evaluate_raw(expression).await?;
        if let Some(text) = result
            .get("exceptionDetails")
            .and_then(|e| e.get("text"))
            .and_then(|t| t.as_str())
        {
            return Err(Error::Browser(format!("JavaScript exception: {}", text)));
        }
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    /// Poll until a CSS selector matches, up to `timeout_ms`. Returns whether
    /// the element appeared; a timeout is not an error.
    pub async fn wait_for_selector(&self, selector: &str, timeout_ms: u64) -> Result<bool> {
        let js = format!("!!document.querySelector('{}')", escape_selector(selector));
        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        loop {
            if self.evaluate(&js).await?.as_bool().unwrap_or(false) {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(SELECTOR_POLL_MS)).await;
        }
    }

    /// Read an attribute from the first element matching a selector.
    /// Returns None when the element or the attribute is absent.
    pub async fn get_attribute(&self, selector: &str, attribute: &str) -> Result<Option<String>> {
        let js = format!(
            "(function() {{ var el = document.querySelector('{}'); return el ? el.getAttribute('{}') : null; }})()",
            escape_selector(selector),
            escape_selector(attribute)
        );
        let value = self.evaluate(&js).await?;
        Ok(value.as_str().map(|s| s.to_string()))
    }

    /// Scroll the first element matching a selector into view and click it.
    /// Returns whether the element was found.
    pub async fn click_selector(&self, selector: &str) -> Result<bool> {
        let js = format!(
            "(function() {{ var el = document.querySelector('{}'); if (!el) return false; el.scrollIntoView({{block: 'center'}}); el.click(); return true; }})()",
            escape_selector(selector)
        );
        Ok(self.evaluate(&js).await?.as_bool().unwrap_or(false))
    }

    /// Look up a snapshot ref by id.
    pub async fn ref_data(&self, ref_id: &str) -> Option<Value> {
        self.refs.lock().await.get(ref_id).cloned()
    }

    /// Replace the ref map with the one from a fresh snapshot.
    pub async fn store_refs(&self, refs: HashMap<String, Value>) {
        *self.refs.lock().await = refs;
    }

    /// URL of the last successful navigation, if any.
    pub async fn current_url(&self) -> Option<String> {
        self.current_url.lock().await.clone()
    }

    /// Close the browser session.
    pub async fn close(&self) {
        // Try graceful close via CDP first
        if let Err(e) = self.cdp.lock().await.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        if let Some(mut child) = self.chrome_process.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Best-effort kill on drop
        if let Some(child) = self.chrome_process.get_mut().as_mut() {
            let _ = child.start_kill();
        }
    }
}

async fn enable_page_domains(cdp: &CdpClient) -> Result<()> {
    for domain in ["Page", "Runtime", "DOM", "Accessibility"] {
        cdp.enable_domain(domain).await.map_err(Error::Browser)?;
    }
    // Optional, not available on every build
    let _ = cdp.enable_domain("Target").await;
    Ok(())
}

/// True when the URL's host is one of the allowed domains or a subdomain of one.
pub fn host_allowed(url: &str, allowed: &[String]) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(h) => h.to_ascii_lowercase(),
        None => return false,
    };
    allowed.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    })
}

/// Escape a string for embedding in single-quoted JS source.
pub(crate) fn escape_selector(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Build Chrome command line arguments.
fn build_browser_args(
    debug_port: u16,
    user_data_dir: &std::path::Path,
    headless: bool,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.push("about:blank".to_string());
    args
}

/// Find a Chrome/Chromium binary on the system.
pub fn find_browser_binary() -> Option<String> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> std::result::Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Wait for Chrome's CDP endpoint to become available.
/// Polls /json/version until it responds, up to `timeout_secs`.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> std::result::Result<(), String> {
    let start = Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Chrome CDP not ready after {}s on port {}",
                timeout_secs, port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if resp.json::<Value>().await.is_ok() {
                return Ok(());
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the first page target's WebSocket URL via /json/list.
/// Retries a few times since the page target may not appear immediately.
async fn get_page_ws_url(port: u16) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err("No page target found after retries".to_string())
}

/// Resolve a targetId to its WebSocket debugger URL via /json/list.
async fn get_target_ws_url(port: u16, target_id: &str) -> std::result::Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(_) => continue,
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        for target in &targets {
            if target.get("targetId").and_then(|v| v.as_str()) == Some(target_id) {
                if let Some(ws_url) = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }
    }

    Err(format!(
        "No WebSocket URL found for targetId '{}' after retries",
        target_id
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        vec!["chatgpt.com".to_string()]
    }

    #[test]
    fn test_host_allowed_exact_match() {
        assert!(host_allowed("https://chatgpt.com", &allowed()));
        assert!(host_allowed("https://chatgpt.com/some/path?q=1", &allowed()));
    }

    #[test]
    fn test_host_allowed_subdomain() {
        assert!(host_allowed("https://cdn.chatgpt.com/asset.js", &allowed()));
    }

    #[test]
    fn test_host_allowed_rejects_other_hosts() {
        assert!(!host_allowed("https://example.com", &allowed()));
        // Suffix without a dot boundary is not a subdomain
        assert!(!host_allowed("https://evilchatgpt.com", &allowed()));
    }

    #[test]
    fn test_host_allowed_rejects_unparseable() {
        assert!(!host_allowed("not a url", &allowed()));
        assert!(!host_allowed("", &allowed()));
    }

    #[test]
    fn test_host_allowed_is_case_insensitive() {
        assert!(host_allowed("https://ChatGPT.com", &allowed()));
        assert!(host_allowed(
            "https://chatgpt.com",
            &["ChatGPT.COM".to_string()]
        ));
    }

    #[test]
    fn test_build_browser_args_headless() {
        let dir = std::path::PathBuf::from("/tmp/profile");
        let args = build_browser_args(9222, &dir, true);
        assert!(args.contains(&"--remote-debugging-port=9222".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
        assert_eq!(args.last().map(|s| s.as_str()), Some("about:blank"));
    }

    #[test]
    fn test_build_browser_args_headed() {
        let dir = std::path::PathBuf::from("/tmp/profile");
        let args = build_browser_args(9222, &dir, false);
        assert!(!args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn test_escape_selector() {
        assert_eq!(escape_selector("a'b"), "a\\'b");
        assert_eq!(escape_selector("a\\b"), "a\\\\b");
        assert_eq!(
            escape_selector("[data-testid=\"send-button\"]"),
            "[data-testid=\"send-button\"]"
        );
    }
}
