//! Accessibility tree snapshot and ref system.
//!
//! Converts Chrome's accessibility tree into a compact text representation
//! with deterministic element refs (e1, e2, ...) so the planning LLM can
//! target elements without CSS selectors.

use serde_json::{json, Value};
use std::collections::HashMap;

/// An accessibility node with ref annotation.
#[derive(Debug, Clone)]
pub struct AXNode {
    pub role: String,
    pub name: String,
    pub value: String,
    pub backend_node_id: Option<i64>,
    pub ref_id: Option<String>,
    pub children: Vec<AXNode>,
    pub interactive: bool,
    pub focused: bool,
    pub checked: Option<bool>,
    pub disabled: bool,
    pub expanded: Option<bool>,
    pub level: Option<i32>,
}

/// Roles considered interactive (buttons, inputs, links, etc.).
const INTERACTIVE_ROLES: &[&str] = &[
    "button", "link", "textbox", "searchbox", "combobox", "listbox",
    "menuitem", "menuitemcheckbox", "menuitemradio", "option",
    "radio", "checkbox", "switch", "slider", "spinbutton",
    "tab", "treeitem", "gridcell", "columnheader", "rowheader",
    "textField", "TextField", "select",
];

/// Roles that are structural/container (skip in compact mode if empty).
const STRUCTURAL_ROLES: &[&str] = &[
    "generic", "none", "presentation", "group", "region",
    "GenericContainer", "Section",
];

/// Parse the CDP Accessibility.getFullAXTree response into an AXNode tree.
pub fn parse_ax_tree(cdp_response: &Value) -> Vec<AXNode> {
    let nodes = match cdp_response.get("nodes").and_then(|v| v.as_array()) {
        Some(arr) => arr,
        None => return Vec::new(),
    };

    if nodes.is_empty() {
        return Vec::new();
    }

    // CDP returns a flat node list; rebuild the tree from childIds
    let mut node_map: HashMap<String, &Value> = HashMap::new();
    for node in nodes {
        if let Some(id) = node.get("nodeId").and_then(|v| v.as_str()) {
            node_map.insert(id.to_string(), node);
        }
    }

    match nodes.first().and_then(|root| root.get("nodeId")).and_then(|v| v.as_str()) {
        Some(root_id) => vec![build_ax_node(root_id, &node_map)],
        None => Vec::new(),
    }
}

fn build_ax_node(node_id: &str, node_map: &HashMap<String, &Value>) -> AXNode {
    let node = match node_map.get(node_id) {
        Some(n) => *n,
        None => {
            return AXNode {
                role: "unknown".to_string(),
                name: String::new(),
                value: String::new(),
                backend_node_id: None,
                ref_id: None,
                children: Vec::new(),
                interactive: false,
                focused: false,
                checked: None,
                disabled: false,
                expanded: None,
                level: None,
            };
        }
    };

    let role = get_ax_value(node, "role");
    let name = get_ax_value(node, "name");
    let value = get_ax_value(node, "value");

    let backend_node_id = node.get("backendDOMNodeId").and_then(|v| v.as_i64());

    let interactive = INTERACTIVE_ROLES.iter().any(|r| r.eq_ignore_ascii_case(&role));

    let mut focused = false;
    let mut checked = None;
    let mut disabled = false;
    let mut expanded = None;
    let mut level = None;

    if let Some(props) = node.get("properties").and_then(|v| v.as_array()) {
        for prop in props {
            let prop_name = prop.get("name").and_then(|v| v.as_str()).unwrap_or("");
            let prop_value = prop
                .get("value")
                .and_then(|v| v.get("value"))
                .cloned()
                .unwrap_or(Value::Null);
            match prop_name {
                "focused" => focused = prop_value.as_bool().unwrap_or(false),
                "checked" => checked = prop_value.as_bool().or(Some(false)),
                "disabled" => disabled = prop_value.as_bool().unwrap_or(false),
                "expanded" => expanded = prop_value.as_bool(),
                "level" => level = prop_value.as_i64().map(|v| v as i32),
                _ => {}
            }
        }
    }

    let children = if let Some(child_ids) = node.get("childIds").and_then(|v| v.as_array()) {
        child_ids
            .iter()
            .filter_map(|id| id.as_str())
            .map(|id| build_ax_node(id, node_map))
            .collect()
    } else {
        Vec::new()
    };

    AXNode {
        role,
        name,
        value,
        backend_node_id,
        ref_id: None,
        children,
        interactive,
        focused,
        checked,
        disabled,
        expanded,
        level,
    }
}

fn get_ax_value(node: &Value, field: &str) -> String {
    node.get(field)
        .and_then(|v| {
            // CDP wraps role/name/value as {type: "...", value: "..."}
            v.get("value")
                .and_then(|val| val.as_str())
                .or_else(|| v.as_str())
        })
        .unwrap_or("")
        .to_string()
}

/// Assign ref IDs to elements in the tree.
/// Returns the updated ref counter and a map of ref_id -> node metadata.
pub fn assign_refs(
    nodes: &mut Vec<AXNode>,
    start_counter: u32,
    interactive_only: bool,
) -> (u32, HashMap<String, Value>) {
    let mut counter = start_counter;
    let mut ref_map = HashMap::new();
    for node in nodes.iter_mut() {
        assign_refs_recursive(node, &mut counter, &mut ref_map, interactive_only);
    }
    (counter, ref_map)
}

fn assign_refs_recursive(
    node: &mut AXNode,
    counter: &mut u32,
    ref_map: &mut HashMap<String, Value>,
    interactive_only: bool,
) {
    let should_assign = if interactive_only {
        node.interactive
    } else {
        // Interactive elements plus any named non-structural element
        node.interactive
            || (!node.name.is_empty()
                && !STRUCTURAL_ROLES.iter().any(|r| r.eq_ignore_ascii_case(&node.role)))
    };

    if should_assign {
        *counter += 1;
        let ref_id = format!("e{}", counter);
        node.ref_id = Some(ref_id.clone());
        ref_map.insert(
            ref_id,
            json!({
                "role": node.role,
                "name": node.name,
                "backendNodeId": node.backend_node_id,
                "interactive": node.interactive,
            }),
        );
    }

    for child in node.children.iter_mut() {
        assign_refs_recursive(child, counter, ref_map, interactive_only);
    }
}

/// Render the accessibility tree as a compact text representation.
pub fn render_tree(nodes: &[AXNode], compact: bool, max_depth: Option<usize>) -> String {
    let mut output = String::new();
    for node in nodes {
        render_node(&mut output, node, 0, compact, max_depth);
    }
    output
}

fn render_node(
    output: &mut String,
    node: &AXNode,
    indent: usize,
    compact: bool,
    max_depth: Option<usize>,
) {
    if let Some(max) = max_depth {
        if indent > max {
            return;
        }
    }

    // In compact mode, skip empty structural elements but keep their children
    if compact
        && STRUCTURAL_ROLES.iter().any(|r| r.eq_ignore_ascii_case(&node.role))
        && node.name.is_empty()
        && node.ref_id.is_none()
    {
        for child in &node.children {
            render_node(output, child, indent, compact, max_depth);
        }
        return;
    }

    if compact && node.role == "StaticText" && node.name.is_empty() {
        return;
    }

    let prefix = "  ".repeat(indent);
    let mut line = format!("{}- {}", prefix, node.role);

    if !node.name.is_empty() {
        let name = if node.name.len() > 80 {
            format!("{}...", crate::safe_truncate(&node.name, 77))
        } else {
            node.name.clone()
        };
        line.push_str(&format!(" \"{}\"", name));
    }

    if let Some(ref ref_id) = node.ref_id {
        line.push_str(&format!(" [ref={}]", ref_id));
    }

    if let Some(level) = node.level {
        line.push_str(&format!(" [level={}]", level));
    }
    if node.focused {
        line.push_str(" [focused]");
    }
    if let Some(true) = node.checked {
        line.push_str(" [checked]");
    }
    if node.disabled {
        line.push_str(" [disabled]");
    }
    if let Some(expanded) = node.expanded {
        line.push_str(if expanded { " [expanded]" } else { " [collapsed]" });
    }
    if !node.value.is_empty() && node.value != node.name {
        let val = if node.value.len() > 60 {
            format!("{}...", crate::safe_truncate(&node.value, 57))
        } else {
            node.value.clone()
        };
        line.push_str(&format!(" value=\"{}\"", val));
    }

    output.push_str(&line);
    output.push('\n');

    for child in &node.children {
        render_node(output, child, indent + 1, compact, max_depth);
    }
}
