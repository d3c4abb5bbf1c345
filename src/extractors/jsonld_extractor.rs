//! JSON-LD extraction from HTML
//!
//! Collects the typed objects from `<script type="application/ld+json">`
//! blocks (with `@graph` support) and resolves `Type.key.key` paths into
//! them.

use std::collections::HashMap;

use scraper::{Html, Selector};
use serde_json::Value;

/// Typed JSON-LD objects from every block matching `selector`, keyed by
/// `@type` with the schema.org prefix stripped. Blocks that are not valid JSON
/// are skipped.
pub fn extract_jsonld_objects(document: &Html, selector: &Selector) -> HashMap<String, Vec<Value>> {
    let mut collected: HashMap<String, Vec<Value>> = HashMap::new();

    for element in document.select(selector) {
        let text = element.text().collect::<String>();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(json) => collect_typed_objects(&json, &mut collected),
            Err(e) => tracing::debug!(error = %e, "skipping unparsable JSON-LD block"),
        }
    }

    collected
}

/// Recursively collect objects with @type, including from @graph
fn collect_typed_objects(value: &Value, result: &mut HashMap<String, Vec<Value>>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::Array(graph)) = obj.get("@graph") {
                for item in graph {
                    collect_typed_objects(item, result);
                }
            }

            if let Some(type_val) = obj.get("@type") {
                let types = match type_val {
                    Value::String(s) => vec![s.clone()],
                    Value::Array(arr) => arr
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect(),
                    _ => vec![],
                };

                for t in types {
                    let clean_type = t
                        .strip_prefix("https://schema.org/")
                        .or_else(|| t.strip_prefix("http://schema.org/"))
                        .unwrap_or(&t)
                        .to_string();
                    result.entry(clean_type).or_default().push(value.clone());
                }
            }
        }
        Value::Array(arr) => {
            for item in arr {
                collect_typed_objects(item, result);
            }
        }
        _ => {}
    }
}

/// Resolve `Type.key.key` against collected objects.
///
/// Each object of the type is tried in order until the path resolves. When a
/// hop lands on an array, a numeric segment indexes it and a named segment
/// takes the first element carrying that key (`offers` is often a list).
pub fn lookup_path<'a>(objects: &'a HashMap<String, Vec<Value>>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let type_name = segments.next()?;
    let rest: Vec<&str> = segments.collect();

    objects
        .get(type_name)?
        .iter()
        .find_map(|obj| navigate(obj, &rest))
}

fn navigate<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Array(items) => match segment.parse::<usize>() {
                Ok(idx) => items.get(idx)?,
                Err(_) => items.iter().find_map(|item| item.get(*segment))?,
            },
            _ => current.get(*segment)?,
        };
    }
    Some(current)
}

/// Render a resolved JSON-LD value as text.
///
/// Numbers become their decimal form, arrays yield their first renderable
/// element, and objects (`ImageObject`, `Offer`) fall back to their `url`,
/// `contentUrl` or `@value`.
pub fn value_to_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.iter().find_map(value_to_text),
        Value::Object(obj) => ["url", "contentUrl", "@value"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(value_to_text)),
        Value::Bool(_) | Value::Null => None,
    }
}
