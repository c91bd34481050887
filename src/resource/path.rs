//! Dotted-path access into decoded resources

use serde_json::Value;

/// Look up a value using a dot-notation path. Numeric segments index arrays.
/// An empty path returns the value itself.
pub fn lookup<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(item);
    }

    let mut current = item;
    for part in path.split('.') {
        current = match current {
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            Value::Object(map) => map.get(part)?,
            _ => return None,
        };
    }

    match current {
        Value::Null => None,
        v => Some(v),
    }
}

/// Render a scalar as a stable key component. Objects and arrays are not keys.
pub fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
