//! Generic page interaction over a shared browser session.

use async_trait::async_trait;
use gptbridge_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;

use super::session::{escape_selector, BrowserSession};
use super::snapshot::{assign_refs, parse_ax_tree, render_tree};
use crate::{Tool, ToolContext, ToolSchema};

/// Cap on page text returned to the model.
const MAX_TEXT_CHARS: usize = 50000;
/// Snapshot rendering depth limit.
const SNAPSHOT_MAX_DEPTH: usize = 15;

pub struct BrowserTool {
    session: Arc<BrowserSession>,
}

impl BrowserTool {
    pub const NAME: &'static str = "browser";

    pub fn new(session: Arc<BrowserSession>) -> Self {
        Self { session }
    }

    fn parameters() -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["snapshot", "click", "fill", "text", "scroll", "evaluate"],
                    "description": "'snapshot'=read page structure with element refs; 'click'=click element (requires ref or selector); 'fill'=replace an input's content (requires ref/selector + text); 'text'=get the page's visible text; 'scroll'=scroll page or element; 'evaluate'=run a JavaScript expression"
                },
                "ref": {
                    "type": "string",
                    "description": "Element ref from the latest snapshot (e.g. 'e5')"
                },
                "selector": {
                    "type": "string",
                    "description": "CSS selector (fallback when no ref is known)"
                },
                "text": {
                    "type": "string",
                    "description": "Text to fill"
                },
                "expression": {
                    "type": "string",
                    "description": "JavaScript expression for 'evaluate'"
                },
                "direction": {
                    "type": "string",
                    "enum": ["up", "down", "left", "right"],
                    "description": "Scroll direction (default: 'down')"
                },
                "amount": {
                    "type": "integer",
                    "description": "Scroll amount in pixels (default: 400)"
                },
                "compact": {
                    "type": "boolean",
                    "description": "Compact snapshot, skipping empty structural nodes (default: true)"
                }
            },
            "required": ["action"]
        })
    }

    fn validate_params(params: &Value) -> Result<()> {
        let action = params
            .get("action")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Validation("Missing required parameter: action".into()))?;

        let has_target = params.get("ref").and_then(|v| v.as_str()).is_some()
            || params.get("selector").and_then(|v| v.as_str()).is_some();

        match action {
            "click" if !has_target => Err(Error::Validation(
                "click requires 'ref' or 'selector'".into(),
            )),
            "fill" if !has_target => Err(Error::Validation(
                "fill requires 'ref' or 'selector'".into(),
            )),
            "fill" if params.get("text").and_then(|v| v.as_str()).is_none() => {
                Err(Error::Validation("fill requires 'text'".into()))
            }
            "evaluate" if params.get("expression").and_then(|v| v.as_str()).is_none() => {
                Err(Error::Validation("evaluate requires 'expression'".into()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: Self::NAME,
            description: "Interact with the current browser page. Take an accessibility snapshot with element refs (e1, e2, ...), click elements, fill inputs, read visible text, scroll, or evaluate JavaScript.",
            parameters: Self::parameters(),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        Self::validate_params(params)
    }

    async fn execute(&self, _ctx: ToolContext, params: Value) -> Result<Value> {
        let action = params["action"].as_str().unwrap_or("snapshot");
        let session = self.session.as_ref();

        match action {
            "snapshot" => action_snapshot(session, &params).await,
            "click" => action_click(session, &params).await,
            "fill" => action_fill(session, &params).await,
            "text" => action_text(session).await,
            "scroll" => action_scroll(session, &params).await,
            "evaluate" => action_evaluate(session, &params).await,
            _ => Err(Error::Tool(format!("Unknown browser action: {}", action))),
        }
    }
}

// ─── Action implementations ───────────────────────────────────────────

async fn action_snapshot(session: &BrowserSession, params: &Value) -> Result<Value> {
    let compact = params["compact"].as_bool().unwrap_or(true);
    take_snapshot(session, compact).await
}

/// Take an accessibility snapshot, assign refs, and store them on the session.
async fn take_snapshot(session: &BrowserSession, compact: bool) -> Result<Value> {
    let ax_tree = {
        let cdp = session.cdp().await;
        cdp.get_accessibility_tree().await.map_err(cdp_err)?
    };

    let mut nodes = parse_ax_tree(&ax_tree);
    let (_, ref_map) = assign_refs(&mut nodes, 0, false);
    let ref_count = ref_map.len();
    session.store_refs(ref_map).await;

    let tree_text = render_tree(&nodes, compact, Some(SNAPSHOT_MAX_DEPTH));

    Ok(json!({
        "snapshot": tree_text,
        "ref_count": ref_count,
        "url": session.current_url().await,
    }))
}

async fn action_click(session: &BrowserSession, params: &Value) -> Result<Value> {
    let (method, target) = resolve_element_target(params)?;

    match method {
        "ref" => {
            let ref_data = session.ref_data(&target).await.ok_or_else(|| {
                Error::Tool(format!("Ref '{}' not found. Take a snapshot first.", target))
            })?;
            let backend_node_id = ref_data["backendNodeId"]
                .as_i64()
                .ok_or_else(|| Error::Tool("Ref has no backendNodeId".into()))?;
            click_by_backend_node(session, backend_node_id).await?;
        }
        "selector" => {
            if !session.click_selector(&target).await? {
                return Err(Error::Tool(format!("Element not found: {}", target)));
            }
        }
        _ => unreachable!(),
    }

    // Brief wait for UI update
    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    Ok(json!({"status": "clicked", "target": target}))
}

async fn action_fill(session: &BrowserSession, params: &Value) -> Result<Value> {
    let text = params["text"]
        .as_str()
        .ok_or_else(|| Error::Tool("fill requires 'text'".into()))?;

    let (method, target) = resolve_element_target(params)?;

    // Focus the element first
    match method {
        "ref" => {
            let ref_data = session
                .ref_data(&target)
                .await
                .ok_or_else(|| Error::Tool(format!("Ref '{}' not found", target)))?;
            let backend_node_id = ref_data["backendNodeId"]
                .as_i64()
                .ok_or_else(|| Error::Tool("Ref has no backendNodeId".into()))?;
            let cdp = session.cdp().await;
            cdp.send_command("DOM.focus", json!({"backendNodeId": backend_node_id}))
                .await
                .map_err(cdp_err)?;
        }
        "selector" => {
            session
                .evaluate(&format!(
                    "document.querySelector('{}')?.focus()",
                    escape_selector(&target)
                ))
                .await?;
        }
        _ => unreachable!(),
    }

    // Clear existing content, insert new text, then fire an input event for frameworks
    session
        .evaluate(
            "document.activeElement && (document.activeElement.value = '', document.activeElement.textContent = '')",
        )
        .await?;

    {
        let cdp = session.cdp().await;
        cdp.insert_text(text).await.map_err(cdp_err)?;
    }

    session
        .evaluate(
            "document.activeElement && document.activeElement.dispatchEvent(new Event('input', {bubbles: true}))",
        )
        .await?;

    Ok(json!({"status": "filled", "target": target, "chars": text.chars().count()}))
}

async fn action_text(session: &BrowserSession) -> Result<Value> {
    let value = session
        .evaluate("document.body ? document.body.innerText : ''")
        .await?;
    let text = value.as_str().unwrap_or("");

    let truncated = if text.len() > MAX_TEXT_CHARS {
        format!(
            "{}...\n[truncated, {} total chars]",
            crate::safe_truncate(text, MAX_TEXT_CHARS),
            text.len()
        )
    } else {
        text.to_string()
    };

    Ok(json!({"text": truncated, "length": text.len()}))
}

async fn action_scroll(session: &BrowserSession, params: &Value) -> Result<Value> {
    let direction = params["direction"].as_str().unwrap_or("down");
    let amount = params["amount"].as_i64().unwrap_or(400);

    let (dx, dy) = match direction {
        "up" => (0, -amount),
        "down" => (0, amount),
        "left" => (-amount, 0),
        "right" => (amount, 0),
        _ => (0, amount),
    };

    // Scroll a specific element when a selector is given, the window otherwise
    let js = if let Some(selector) = params["selector"].as_str() {
        format!(
            "document.querySelector('{}')?.scrollBy({}, {})",
            escape_selector(selector),
            dx,
            dy
        )
    } else {
        format!("window.scrollBy({}, {})", dx, dy)
    };
    session.evaluate(&js).await?;

    Ok(json!({"status": "scrolled", "direction": direction, "amount": amount}))
}

async fn action_evaluate(session: &BrowserSession, params: &Value) -> Result<Value> {
    let expression = params["expression"]
        .as_str()
        .ok_or_else(|| Error::Tool("evaluate requires 'expression'".into()))?;

    let result = session.evaluate_raw(expression).await?;

    let value = result
        .get("result")
        .and_then(|r| r.get("value"))
        .cloned()
        .unwrap_or(Value::Null);

    let exception = result
        .get("exceptionDetails")
        .and_then(|e| e.get("text"))
        .and_then(|t| t.as_str());

    if let Some(err) = exception {
        Ok(json!({"status": "error", "error": err}))
    } else {
        Ok(json!({"status": "ok", "result": value}))
    }
}

// ─── Helper functions ─────────────────────────────────────────────────

/// Resolve element target from params: either "ref" or "selector".
fn resolve_element_target(params: &Value) -> Result<(&'static str, String)> {
    if let Some(r) = params["ref"].as_str() {
        let ref_id = r.trim_start_matches('@');
        Ok(("ref", ref_id.to_string()))
    } else if let Some(s) = params["selector"].as_str() {
        Ok(("selector", s.to_string()))
    } else {
        Err(Error::Tool(
            "Action requires 'ref' (from snapshot) or 'selector' (CSS)".into(),
        ))
    }
}

/// Click an element by its backendNodeId, dispatching real mouse events at
/// its center. Falls back to a JS click when no box model is available.
async fn click_by_backend_node(session: &BrowserSession, backend_node_id: i64) -> Result<()> {
    let cdp = session.cdp().await;

    let result = cdp
        .send_command("DOM.resolveNode", json!({"backendNodeId": backend_node_id}))
        .await
        .map_err(cdp_err)?;

    let object_id = result
        .get("object")
        .and_then(|o| o.get("objectId"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Tool("Failed to resolve node for click".into()))?;

    let box_result = cdp
        .send_command("DOM.getBoxModel", json!({"backendNodeId": backend_node_id}))
        .await;

    let (x, y) = match box_result {
        Ok(bm) => extract_center_from_box_model(&bm),
        Err(_) => {
            cdp.call_function_on(
                object_id,
                "function() { this.scrollIntoView({block: 'center'}); this.click(); }",
            )
            .await
            .map_err(cdp_err)?;
            return Ok(());
        }
    };

    cdp.dispatch_mouse_event("mousePressed", x, y, "left", 1)
        .await
        .map_err(cdp_err)?;
    cdp.dispatch_mouse_event("mouseReleased", x, y, "left", 1)
        .await
        .map_err(cdp_err)?;

    Ok(())
}

/// Extract center coordinates from a DOM.getBoxModel response.
fn extract_center_from_box_model(bm: &Value) -> (f64, f64) {
    if let Some(content) = bm
        .get("model")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    {
        if content.len() >= 8 {
            let x1 = content[0].as_f64().unwrap_or(0.0);
            let y1 = content[1].as_f64().unwrap_or(0.0);
            let x2 = content[4].as_f64().unwrap_or(0.0);
            let y2 = content[5].as_f64().unwrap_or(0.0);
            return ((x1 + x2) / 2.0, (y1 + y2) / 2.0);
        }
    }
    (0.0, 0.0)
}

/// Convert a CDP error string to a tool error.
fn cdp_err(e: String) -> Error {
    Error::Tool(format!("CDP: {}", e))
}
