//! Helpers for extracting values from KDL nodes.

use jobgraph_core::Attributes;
use kdl::{KdlDocument, KdlNode, KdlValue};
use serde_json::{Map, Number, Value};

use crate::{ConfigError, ConfigResult};

pub(crate) fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

pub(crate) fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

pub(crate) fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// First positional argument as an unsigned integer.
pub(crate) fn get_usize_arg(node: &KdlNode, field: &str) -> ConfigResult<usize> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: "expected a non-negative integer".to_string(),
        })
}

pub(crate) fn require_name(node: &KdlNode, what: &str) -> ConfigResult<String> {
    get_first_string_arg(node)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingField(format!("{} name", what)))
}

/// Convert the children of a node into a JSON object.
///
/// Each child becomes one key. A child with children becomes a nested object,
/// a child with one argument a scalar, and a child with several arguments a
/// list. Repeating a key appends to a list, so `script "a"` followed by
/// `script "b"` yields `["a", "b"]`.
pub(crate) fn children_to_attributes(doc: Option<&KdlDocument>) -> Attributes {
    let mut attributes = Attributes::new();
    let Some(doc) = doc else {
        return attributes;
    };
    for child in doc.nodes() {
        let key = child.name().value().to_string();
        let value = node_to_value(child);
        match attributes.remove(&key) {
            None => {
                attributes.insert(key, value);
            }
            Some(Value::Array(mut items)) => {
                push_flat(&mut items, value);
                attributes.insert(key, Value::Array(items));
            }
            Some(existing) => {
                let mut items = vec![existing];
                push_flat(&mut items, value);
                attributes.insert(key, Value::Array(items));
            }
        }
    }
    attributes
}

fn push_flat(items: &mut Vec<Value>, value: Value) {
    match value {
        Value::Array(more) => items.extend(more),
        other => items.push(other),
    }
}

/// Convert one node (ignoring its name) into a JSON value.
pub(crate) fn node_to_value(node: &KdlNode) -> Value {
    let mut props = Map::new();
    let mut args = Vec::new();
    for entry in node.entries() {
        match entry.name() {
            Some(name) => {
                props.insert(name.value().to_string(), kdl_to_json(entry.value()));
            }
            None => args.push(kdl_to_json(entry.value())),
        }
    }

    if let Some(children) = node.children() {
        let mut object: Map<String, Value> =
            children_to_attributes(Some(children)).into_iter().collect();
        object.extend(props);
        return Value::Object(object);
    }
    if !props.is_empty() {
        return Value::Object(props);
    }
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

pub(crate) fn kdl_to_json(value: &KdlValue) -> Value {
    if let Some(s) = value.as_string() {
        Value::String(s.to_string())
    } else if let Some(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Some(n) = value.as_integer() {
        i64::try_from(n)
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(n.to_string()))
    } else if let Some(f) = value.as_float() {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(kdl: &str) -> KdlDocument {
        kdl.parse().unwrap()
    }

    #[test]
    fn test_children_to_attributes() {
        let doc = parse(
            r#"
            image "rust:1.85"
            script "cargo build"
            script "cargo test"
            tags "docker" "linux"
            retries 2
            allow_failure #true
            variables {
                RUST_LOG "debug"
            }
            artifacts expire_in="1 week" {
                paths "target/release"
            }
            "#,
        );
        let attrs = children_to_attributes(Some(&doc));
        assert_eq!(attrs["image"], json!("rust:1.85"));
        assert_eq!(attrs["script"], json!(["cargo build", "cargo test"]));
        assert_eq!(attrs["tags"], json!(["docker", "linux"]));
        assert_eq!(attrs["retries"], json!(2));
        assert_eq!(attrs["allow_failure"], json!(true));
        assert_eq!(attrs["variables"], json!({"RUST_LOG": "debug"}));
        assert_eq!(
            attrs["artifacts"],
            json!({"paths": "target/release", "expire_in": "1 week"})
        );
    }

    #[test]
    fn test_get_usize_arg() {
        let doc = parse("limit 50\nbad -1");
        let nodes = doc.nodes();
        assert_eq!(get_usize_arg(&nodes[0], "limit").unwrap(), 50);
        assert!(get_usize_arg(&nodes[1], "bad").is_err());
    }
}
