//! JSON-Schema sanitization for Gemini tool declarations.
//!
//! Gemini's v1internal surface accepts a narrow schema dialect: no `$ref`,
//! no combinators, single lowercase `type`, string-only enums. Validation
//! keywords it rejects are folded into the `description` so the model still
//! sees them. The traversal is post-order so children are cleaned before
//! their parent collects constraints.

use serde_json::{Map, Value, json};

/// Validation keywords migrated into the description, with their labels.
/// Only simple (non-object, non-array) values migrate: an object under
/// "pattern" is almost certainly a property named `pattern`, not a keyword.
const MIGRATED: [(&str, &str); 11] = [
    ("pattern", "pattern"),
    ("minLength", "minLen"),
    ("maxLength", "maxLen"),
    ("minimum", "min"),
    ("maximum", "max"),
    ("minItems", "minItems"),
    ("maxItems", "maxItems"),
    ("exclusiveMinimum", "exclMin"),
    ("exclusiveMaximum", "exclMax"),
    ("multipleOf", "multipleOf"),
    ("format", "format"),
];

const HARD_REMOVED: [&str; 26] = [
    "$schema",
    "$id",
    "additionalProperties",
    "enumCaseInsensitive",
    "enumNormalizeWhitespace",
    "uniqueItems",
    "default",
    "const",
    "examples",
    "propertyNames",
    "anyOf",
    "oneOf",
    "allOf",
    "not",
    "if",
    "then",
    "else",
    "dependencies",
    "dependentSchemas",
    "dependentRequired",
    "cache_control",
    "contentEncoding",
    "contentMediaType",
    "deprecated",
    "readOnly",
    "writeOnly",
];

// "title" is also dropped; it rides along in clean_node.

/// Clean a tool input schema in place. Idempotent:
/// `clean_schema(clean_schema(s)) == clean_schema(s)`.
pub fn clean_schema(schema: &mut Value) {
    if let Value::Object(map) = schema {
        let mut defs = Map::new();
        for key in ["$defs", "definitions"] {
            if let Some(Value::Object(extracted)) = map.remove(key) {
                defs.extend(extracted);
            }
        }
        if !defs.is_empty() {
            flatten_refs(map, &defs);
        }
    }
    clean_node(schema);
}

/// Convenience for tool declarations: missing or non-object schemas become an
/// empty object schema.
pub fn clean_tool_schema(schema: Option<Value>) -> Value {
    match schema {
        Some(mut value @ Value::Object(_)) => {
            clean_schema(&mut value);
            value
        }
        _ => json!({ "type": "object", "properties": {} }),
    }
}

fn flatten_refs(map: &mut Map<String, Value>, defs: &Map<String, Value>) {
    if let Some(Value::String(path)) = map.remove("$ref") {
        let name = path.rsplit('/').next().unwrap_or(&path);
        if let Some(Value::Object(definition)) = defs.get(name) {
            for (key, value) in definition {
                // Inline without overriding keys the site already sets.
                map.entry(key.clone()).or_insert_with(|| value.clone());
            }
            // The inlined definition may itself hold refs.
            flatten_refs(map, defs);
        }
    }

    for value in map.values_mut() {
        flatten_refs_value(value, defs);
    }
}

fn flatten_refs_value(value: &mut Value, defs: &Map<String, Value>) {
    match value {
        Value::Object(map) => flatten_refs(map, defs),
        Value::Array(items) => {
            for item in items {
                flatten_refs_value(item, defs);
            }
        }
        _ => {}
    }
}

fn clean_node(value: &mut Value) {
    let map = match value {
        Value::Object(map) => map,
        Value::Array(items) => {
            for item in items {
                clean_node(item);
            }
            return;
        }
        _ => return,
    };

    // Children first; the parent then sees already-clean subschemas.
    for child in map.values_mut() {
        clean_node(child);
    }

    let mut constraints = Vec::new();
    for (field, label) in MIGRATED {
        let migrate = matches!(
            map.get(field),
            Some(Value::String(_) | Value::Number(_) | Value::Bool(_))
        );
        if migrate && let Some(value) = map.remove(field) {
            let rendered = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            constraints.push(format!("{label}: {rendered}"));
        }
    }
    if !constraints.is_empty() {
        let suffix = format!(" [Constraint: {}]", constraints.join(", "));
        match map.get_mut("description") {
            Some(Value::String(description)) => description.push_str(&suffix),
            _ => {
                map.insert("description".to_string(), Value::String(suffix));
            }
        }
    }

    // A missing `type` may be recoverable from a union before it is removed.
    if !map.contains_key("type") {
        for union in ["anyOf", "oneOf"] {
            if let Some(Value::Array(options)) = map.get(union)
                && let Some(inferred) = first_non_null_type(options)
            {
                map.insert("type".to_string(), Value::String(inferred));
                break;
            }
        }
    }

    for field in HARD_REMOVED {
        map.remove(field);
    }
    map.remove("title");

    // Gemini wants exactly the fields named in `required` to exist.
    let known: Vec<String> = match map.get("properties") {
        Some(Value::Object(properties)) => properties.keys().cloned().collect(),
        _ => Vec::new(),
    };
    if let Some(Value::Array(required)) = map.get_mut("required") {
        required.retain(|item| {
            item.as_str()
                .map(|name| known.iter().any(|key| key == name))
                .unwrap_or(false)
        });
    }

    let union_type = match map.get_mut("type") {
        Some(Value::String(name)) => {
            *name = name.to_ascii_lowercase();
            None
        }
        // Union type: keep the first non-null member.
        Some(Value::Array(options)) => Some(
            options
                .iter()
                .filter_map(Value::as_str)
                .find(|name| *name != "null")
                .unwrap_or("string")
                .to_ascii_lowercase(),
        ),
        _ => None,
    };
    if let Some(chosen) = union_type {
        map.insert("type".to_string(), Value::String(chosen));
    }

    if let Some(Value::Array(options)) = map.get_mut("enum") {
        for option in options {
            if !option.is_string() {
                let rendered = match option {
                    Value::Null => "null".to_string(),
                    ref other => other.to_string(),
                };
                *option = Value::String(rendered);
            }
        }
    }
}

fn first_non_null_type(options: &[Value]) -> Option<String> {
    options.iter().find_map(|option| {
        option
            .get("type")
            .and_then(Value::as_str)
            .filter(|name| *name != "null")
            .map(|name| name.to_ascii_lowercase())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrates_constraints_into_description() {
        let mut schema = json!({
            "type": "string",
            "description": "a name",
            "pattern": "^[a-z]+$",
            "minLength": 1,
            "maxLength": 10
        });
        clean_schema(&mut schema);
        assert_eq!(
            schema,
            json!({
                "type": "string",
                "description": "a name [Constraint: pattern: ^[a-z]+$, minLen: 1, maxLen: 10]"
            })
        );
    }

    #[test]
    fn keeps_properties_that_shadow_keyword_names() {
        let mut schema = json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "format": { "type": "string" }
            }
        });
        clean_schema(&mut schema);
        let properties = schema["properties"].as_object().unwrap();
        assert!(properties.contains_key("pattern"));
        assert!(properties.contains_key("format"));
    }

    #[test]
    fn flattens_refs_and_removes_defs() {
        let mut schema = json!({
            "type": "object",
            "properties": { "who": { "$ref": "#/$defs/Person" } },
            "$defs": {
                "Person": { "type": "object", "properties": { "name": { "type": "string" } } }
            }
        });
        clean_schema(&mut schema);
        assert!(schema.get("$defs").is_none());
        assert_eq!(schema["properties"]["who"]["type"], "object");
        assert_eq!(
            schema["properties"]["who"]["properties"]["name"]["type"],
            "string"
        );
    }

    #[test]
    fn recovers_type_from_any_of_before_dropping_it() {
        let mut schema = json!({
            "anyOf": [{ "type": "integer" }, { "type": "null" }]
        });
        clean_schema(&mut schema);
        assert_eq!(schema, json!({ "type": "integer" }));
    }

    #[test]
    fn union_type_arrays_reduce_to_first_non_null() {
        let mut schema = json!({ "type": ["null", "String"] });
        clean_schema(&mut schema);
        assert_eq!(schema, json!({ "type": "string" }));
    }

    #[test]
    fn enums_become_strings_and_required_is_pruned() {
        let mut schema = json!({
            "type": "object",
            "properties": { "n": { "type": "integer", "enum": [1, 2, true, null] } },
            "required": ["n", "ghost"]
        });
        clean_schema(&mut schema);
        assert_eq!(
            schema["properties"]["n"]["enum"],
            json!(["1", "2", "true", "null"])
        );
        assert_eq!(schema["required"], json!(["n"]));
    }

    #[test]
    fn cleaning_is_a_fixed_point() {
        let mut once = json!({
            "type": ["string", "null"],
            "title": "T",
            "pattern": "x+",
            "additionalProperties": false,
            "properties": { "a": { "anyOf": [{ "type": "number" }], "default": 3 } },
            "required": ["a", "b"],
            "enum": [1, "a"]
        });
        clean_schema(&mut once);
        let mut twice = once.clone();
        clean_schema(&mut twice);
        assert_eq!(once, twice);
    }
}
