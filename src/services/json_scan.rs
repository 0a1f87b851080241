//! Defensive descent through provider JSON.
//!
//! Provider response shapes drift: the same entity may arrive under `data`,
//! `results`, `items`, `included`, or a type-named wrapper, at varying depth.
//! Rather than hard-coding one path per endpoint version, lookups scan for
//! the first node that satisfies a predicate.

use serde_json::Value;

/// Container keys descended in preference order before any other key.
const CONTAINER_KEYS: [&str; 8] =
    ["data", "results", "items", "included", "tracks", "songs", "albums", "artists"];

/// Depth-first search for the first object satisfying `pred`, preferring the
/// well-known container keys at each level.
pub fn first_entity<'a, F>(value: &'a Value, pred: &F) -> Option<&'a Value>
where
    F: Fn(&Value) -> bool,
{
    if value.is_object() && pred(value) {
        return Some(value);
    }
    match value {
        Value::Array(items) => items.iter().find_map(|item| first_entity(item, pred)),
        Value::Object(map) => {
            for key in CONTAINER_KEYS {
                if let Some(child) = map.get(key) {
                    if let Some(found) = first_entity(child, pred) {
                        return Some(found);
                    }
                }
            }
            map.iter()
                .filter(|(key, _)| !CONTAINER_KEYS.contains(&key.as_str()))
                .find_map(|(_, child)| first_entity(child, pred))
        }
        _ => None,
    }
}

/// Collect every object satisfying `pred`, in document order.
pub fn all_entities<'a, F>(value: &'a Value, pred: &F) -> Vec<&'a Value>
where
    F: Fn(&Value) -> bool,
{
    let mut found = Vec::new();
    collect(value, pred, &mut found);
    found
}

fn collect<'a, F>(value: &'a Value, pred: &F, found: &mut Vec<&'a Value>)
where
    F: Fn(&Value) -> bool,
{
    if value.is_object() && pred(value) {
        found.push(value);
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect(item, pred, found);
            }
        }
        Value::Object(map) => {
            for key in CONTAINER_KEYS {
                if let Some(child) = map.get(key) {
                    collect(child, pred, found);
                }
            }
            for (key, child) in map {
                if !CONTAINER_KEYS.contains(&key.as_str()) {
                    collect(child, pred, found);
                }
            }
        }
        _ => {}
    }
}

/// String field access that treats absent and non-string as empty.
pub fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn has_title(v: &Value) -> bool {
        v.get("title").is_some() || v.get("name").is_some()
    }

    #[test]
    fn finds_entity_under_data_wrapper() {
        let doc = json!({"data": [{"id": "1", "title": "A"}]});
        let found = first_entity(&doc, &has_title).unwrap();
        assert_eq!(found["id"], "1");
    }

    #[test]
    fn finds_entity_under_nested_results() {
        let doc = json!({"results": {"songs": {"data": [{"id": "9", "name": "B"}]}}});
        let found = first_entity(&doc, &has_title).unwrap();
        assert_eq!(found["id"], "9");
    }

    #[test]
    fn prefers_data_over_included() {
        let doc = json!({
            "included": [{"id": "wrong", "title": "X"}],
            "data": [{"id": "right", "title": "X"}],
        });
        let found = first_entity(&doc, &has_title).unwrap();
        assert_eq!(found["id"], "right");
    }

    #[test]
    fn missing_entity_yields_none() {
        let doc = json!({"data": [], "meta": {"total": 0}});
        assert!(first_entity(&doc, &has_title).is_none());
    }

    #[test]
    fn collects_all_matching_entities_in_order() {
        let doc = json!({"data": [
            {"id": "1", "title": "A"},
            {"id": "2", "title": "B"},
        ]});
        let all = all_entities(&doc, &has_title);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["id"], "1");
    }

    #[test]
    fn str_field_tolerates_absent_and_wrong_type() {
        let doc = json!({"title": 42});
        assert_eq!(str_field(&doc, "title"), "");
        assert_eq!(str_field(&doc, "missing"), "");
    }
}
