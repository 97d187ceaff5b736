//! Built-in action catalog of the execution process.
//!
//! Two sets: the base actions every session supports, and the vision actions
//! that only work when the process runs with screen analysis enabled. The
//! source definitions are raw JSON in the shape the execution server
//! documents them; every entry passes through schema normalization before it
//! is exposed, so incomplete array schemas and `default` fields never reach
//! the model API.

use serde_json::{json, Value};

use crate::schema::ToolDefinition;

fn base_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "browser_navigate",
            "description": "Navigate the browser to a URL and wait for the page to load",
            "parameters": {
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "Absolute URL to open" }
                },
                "required": ["url"]
            }
        }),
        json!({
            "name": "browser_click",
            "description": "Click the first element matching a CSS selector",
            "parameters": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector of the element" }
                },
                "required": ["selector"]
            }
        }),
        json!({
            "name": "browser_type",
            "description": "Type text into the element matching a CSS selector",
            "parameters": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "CSS selector of the input" },
                    "text": { "type": "string", "description": "Text to type" },
                    "clear": { "type": "boolean", "description": "Clear the field first", "default": true }
                },
                "required": ["selector", "text"]
            }
        }),
        json!({
            "name": "browser_get_text",
            "description": "Read the visible text of the page or of a selected element",
            "parameters": {
                "type": "object",
                "properties": {
                    "selector": { "type": "string", "description": "Optional CSS selector; whole page when omitted" }
                }
            }
        }),
        json!({
            "name": "browser_get_links",
            "description": "List the links on the current page",
            "parameters": {
                "type": "object",
                "properties": {
                    "filter": { "type": "string", "description": "Substring the link text or href must contain" }
                }
            }
        }),
        json!({
            "name": "browser_scroll",
            "description": "Scroll the page",
            "parameters": {
                "type": "object",
                "properties": {
                    "direction": { "type": "string", "enum": ["up", "down"], "description": "Scroll direction" },
                    "amount": { "type": "number", "description": "Pixels to scroll, one viewport when omitted" }
                },
                "required": ["direction"]
            }
        }),
        json!({
            "name": "browser_back",
            "description": "Go back one entry in the browser history",
            "parameters": { "type": "object", "properties": {} }
        }),
        json!({
            "name": "browser_wait",
            "description": "Wait for a number of seconds, for slow pages",
            "parameters": {
                "type": "object",
                "properties": {
                    "seconds": { "type": "number", "description": "How long to wait" }
                },
                "required": ["seconds"]
            }
        }),
        json!({
            "name": "browser_fill_form",
            "description": "Fill several form fields in one call",
            "parameters": {
                "type": "object",
                "properties": {
                    // The server documents fields without an item schema;
                    // normalization backfills it.
                    "fields": { "type": "array", "description": "selector=value pairs" },
                    "submit_selector": { "type": "string", "description": "Selector to click after filling" }
                },
                "required": ["fields"]
            }
        }),
        json!({
            "name": "browser_screenshot",
            "description": "Capture a screenshot of the current page",
            "parameters": {
                "type": "object",
                "properties": {
                    "full_page": { "type": "boolean", "description": "Capture the full scroll height" }
                }
            }
        }),
    ]
}

fn vision_catalog() -> Vec<Value> {
    vec![
        json!({
            "name": "browser_click_at",
            "description": "Click at screen coordinates (vision sessions only)",
            "parameters": {
                "type": "object",
                "properties": {
                    "x": { "type": "number", "description": "X coordinate in CSS pixels" },
                    "y": { "type": "number", "description": "Y coordinate in CSS pixels" }
                },
                "required": ["x", "y"]
            }
        }),
        json!({
            "name": "browser_type_at",
            "description": "Click at screen coordinates and type text (vision sessions only)",
            "parameters": {
                "type": "object",
                "properties": {
                    "x": { "type": "number", "description": "X coordinate in CSS pixels" },
                    "y": { "type": "number", "description": "Y coordinate in CSS pixels" },
                    "text": { "type": "string", "description": "Text to type" }
                },
                "required": ["x", "y", "text"]
            }
        }),
        json!({
            "name": "browser_read_screen",
            "description": "Describe the rendered page from a fresh screenshot (vision sessions only)",
            "parameters": { "type": "object", "properties": {} }
        }),
    ]
}

/// The catalog as normalized, typed definitions: the base set always, the
/// vision set only when `vision` is enabled.
pub fn catalog_definitions(vision: bool) -> Vec<ToolDefinition> {
    let mut sources = base_catalog();
    if vision {
        sources.extend(vision_catalog());
    }
    sources
        .iter()
        .filter_map(|v| match ToolDefinition::from_value(v) {
            Ok(def) => Some(def),
            Err(e) => {
                tracing::error!("skipping malformed built-in definition: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ParamSchema;

    #[test]
    fn base_set_excludes_vision_actions() {
        let names: Vec<String> = catalog_definitions(false)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), 10, "no base definition may be skipped");
        assert!(names.contains(&"browser_navigate".to_string()));
        assert!(!names.iter().any(|n| n == "browser_click_at"));
    }

    #[test]
    fn vision_mode_adds_vision_actions() {
        let base = catalog_definitions(false).len();
        let with_vision = catalog_definitions(true);
        assert_eq!(with_vision.len(), base + 3);
        assert!(with_vision.iter().any(|d| d.name == "browser_read_screen"));
    }

    #[test]
    fn every_array_property_carries_items() {
        for def in catalog_definitions(true) {
            for (name, prop) in &def.parameters.properties {
                if let ParamSchema::Array { items, .. } = prop {
                    // Typed items always carry a type tag; reaching here
                    // means normalization produced one.
                    assert!(
                        matches!(**items, ParamSchema::String { .. }),
                        "{}.{} items",
                        def.name,
                        name
                    );
                }
            }
        }
    }

    #[test]
    fn default_fields_do_not_survive_normalization() {
        let defs = catalog_definitions(false);
        let typing = defs.iter().find(|d| d.name == "browser_type").unwrap();
        let wire = typing.parameters.to_value();
        assert!(wire["properties"]["clear"].get("default").is_none());
    }
}
