//! Strict-mode normalization of tool parameter schemas.
//!
//! Providers that enforce strict function calling require every object to be
//! closed (`additionalProperties: false`) and every property to be listed in
//! `required`. Optional properties keep their optionality by becoming
//! nullable instead.

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

/// Normalize a tool's parameter schema for strict mode. Returns `None` when
/// the input is not a workable schema object, in which case the caller keeps
/// the original parameters and disables strict mode for that tool.
pub fn normalize_strict(parameters: &Value) -> Option<Value> {
    let mut schema = match parameters {
        Value::Object(_) => parameters.clone(),
        Value::Null => json!({"type": "object", "properties": {}}),
        _ => return None,
    };
    {
        let map = schema.as_object_mut()?;
        // A root with properties but no declared type is an object schema in
        // all but name.
        if !map.contains_key("type")
            && (map.contains_key("properties") || map.contains_key("required"))
        {
            map.insert("type".to_string(), Value::String("object".to_string()));
        }
    }
    normalize_node(&mut schema);
    Some(schema)
}

fn is_object_node(map: &Map<String, Value>) -> bool {
    match map.get("type") {
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some("object")),
        _ => map.contains_key("properties"),
    }
}

fn normalize_node(schema: &mut Value) {
    let Some(map) = schema.as_object_mut() else {
        return;
    };

    // Descend first: combinator members, array items, then object shape.
    for combiner in ["anyOf", "oneOf", "allOf"] {
        if let Some(Value::Array(members)) = map.get_mut(combiner) {
            for member in members.iter_mut() {
                normalize_node(member);
            }
        }
    }
    if let Some(items) = map.get_mut("items") {
        normalize_node(items);
    }

    if !is_object_node(map) {
        return;
    }

    if !map.contains_key("additionalProperties") {
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }

    let previously_required: Vec<String> = map
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let mut all_names = Vec::new();
    if let Some(Value::Object(properties)) = map.get_mut("properties") {
        for (name, prop) in properties.iter_mut() {
            normalize_node(prop);
            // Strict mode has no optional properties; what used to be
            // optional stays expressible as an explicit null.
            if !previously_required.iter().any(|r| r == name) {
                widen_nullable(prop);
            }
            all_names.push(name.clone());
        }
    }
    if !all_names.is_empty() || map.contains_key("properties") {
        map.insert(
            "required".to_string(),
            Value::Array(all_names.into_iter().map(Value::String).collect()),
        );
    }
}

/// Widen a singular `type` to `[t, "null"]`; a type union gains `"null"`
/// when missing. Schemas without a `type` keyword are left alone.
fn widen_nullable(schema: &mut Value) {
    let Some(map) = schema.as_object_mut() else {
        return;
    };
    match map.get_mut("type") {
        Some(Value::String(t)) => {
            if t != "null" {
                let t = t.clone();
                map.insert(
                    "type".to_string(),
                    Value::Array(vec![Value::String(t), Value::String("null".to_string())]),
                );
            }
        }
        Some(Value::Array(types)) => {
            if !types.iter().any(|t| t.as_str() == Some("null")) {
                types.push(Value::String("null".to_string()));
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use pretty_assertions::assert_eq;

    use super::*;

    /// Walk a normalized schema and assert the strict-mode shape holds at
    /// every object node.
    fn assert_strict(schema: &Value) {
        let Some(map) = schema.as_object() else {
            return;
        };
        if is_object_node(map) {
            assert_eq!(
                map.get("additionalProperties"),
                Some(&Value::Bool(false)),
                "open object in {schema}"
            );
            if let Some(props) = map.get("properties").and_then(Value::as_object) {
                let required: Vec<&str> = map
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|arr| arr.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                for name in props.keys() {
                    assert!(required.contains(&name.as_str()), "{name} not required");
                }
            }
        }
        for value in map.values() {
            match value {
                Value::Object(_) => assert_strict(value),
                Value::Array(items) => items.iter().for_each(assert_strict),
                _ => {}
            }
        }
    }

    #[test]
    fn optional_property_becomes_required_and_nullable() {
        let input = json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {"type": "string"},
                "offset": {"type": "number"},
            }
        });
        let out = normalize_strict(&input).unwrap();
        assert_eq!(out["additionalProperties"], json!(false));
        let mut required: Vec<&str> = out["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        required.sort_unstable();
        assert_eq!(required, vec!["offset", "path"]);
        // Required property keeps its singular type; optional widens.
        assert_eq!(out["properties"]["path"]["type"], json!("string"));
        assert_eq!(out["properties"]["offset"]["type"], json!(["number", "null"]));
        assert_strict(&out);
    }

    #[test]
    fn missing_root_type_is_inferred_from_properties() {
        let input = json!({
            "properties": {"q": {"type": "string"}}
        });
        let out = normalize_strict(&input).unwrap();
        assert_eq!(out["type"], json!("object"));
        assert_strict(&out);
    }

    #[test]
    fn nested_objects_normalize_recursively() {
        let input = json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "object",
                    "properties": {
                        "field": {"type": "string"},
                        "values": {"type": "array", "items": {"type": "string"}},
                    }
                }
            }
        });
        let out = normalize_strict(&input).unwrap();
        assert_strict(&out);
        assert_eq!(
            out["properties"]["filter"]["additionalProperties"],
            json!(false)
        );
        let inner: Vec<&str> = out["properties"]["filter"]["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(inner.contains(&"field") && inner.contains(&"values"));
    }

    #[test]
    fn union_object_variant_is_normalized() {
        let input = json!({
            "type": "object",
            "properties": {
                "target": {
                    "anyOf": [
                        {"type": "object", "properties": {"id": {"type": "string"}}},
                        {"type": "string"},
                    ]
                }
            }
        });
        let out = normalize_strict(&input).unwrap();
        assert_eq!(
            out["properties"]["target"]["anyOf"][0]["additionalProperties"],
            json!(false)
        );
        assert_strict(&out);
    }

    #[test]
    fn nullable_object_in_type_union_closes() {
        let input = json!({
            "type": "object",
            "properties": {
                "meta": {
                    "type": ["object", "null"],
                    "properties": {"k": {"type": "string"}}
                }
            },
            "required": ["meta"]
        });
        let out = normalize_strict(&input).unwrap();
        assert_eq!(out["properties"]["meta"]["additionalProperties"], json!(false));
        assert_strict(&out);
    }

    #[test]
    fn already_nullable_type_does_not_double_null() {
        let input = json!({
            "type": "object",
            "properties": {"v": {"type": ["string", "null"]}}
        });
        let out = normalize_strict(&input).unwrap();
        assert_eq!(out["properties"]["v"]["type"], json!(["string", "null"]));
    }

    #[test]
    fn arrays_only_descend_into_items() {
        let input = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        });
        let out = normalize_strict(&input).unwrap();
        let tags = &out["properties"]["tags"];
        // The array node itself gains no object keywords.
        assert!(tags.get("additionalProperties").is_none());
        assert_eq!(tags["type"], json!(["array", "null"]));
    }

    #[test]
    fn null_parameters_become_empty_object_schema() {
        let out = normalize_strict(&Value::Null).unwrap();
        assert_eq!(out["type"], json!("object"));
        assert_eq!(out["additionalProperties"], json!(false));
    }

    #[test]
    fn non_object_parameters_are_rejected() {
        assert!(normalize_strict(&json!("not a schema")).is_none());
        assert!(normalize_strict(&json!([1, 2])).is_none());
    }
}
