//! Dot-path access into JSON records.
//!
//! Paths look like `metadata.category` or `scores.0`. Numeric segments index
//! into arrays. Any missing or non-container intermediate ends the walk.

use serde_json::{Map, Value};

/// Walk `path` from `root`. An empty path returns the root itself.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(root);
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Like [`lookup`], but returns an owned value with `null` for anything missing.
pub fn get(root: &Value, path: &str) -> Value {
    lookup(root, path).cloned().unwrap_or(Value::Null)
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Numeric segments write into existing arrays, padding with `null` past the
/// end. Any other intermediate that is not an object (scalars, `null`, arrays
/// addressed by a non-numeric segment) is replaced by an empty object.
pub fn assign(root: &mut Value, path: &str, value: Value) {
    let mut current = root;
    for segment in path.split('.') {
        current = child_mut(current, segment);
    }
    *current = value;
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = segment.parse::<usize>().ok().filter(|_| node.is_array());
    match (node, index) {
        (Value::Array(items), Some(index)) => {
            if items.len() <= index {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        (node, _) => as_object_mut(node)
            .entry(segment.to_string())
            .or_insert(Value::Null),
    }
}

fn as_object_mut(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

/// Split a path into its first segment and the remainder, if any.
pub fn split_head(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}
