//! Canonical key casing for server JSON.
//!
//! The drop-in endpoints answer with PascalCase, snake_case or spinal-case
//! keys depending on the server version. Everything handed to listeners is
//! normalized to camelCase first.

use serde_json::{Map, Value};

/// Convert `PascalCase`, `snake_case` and `spinal-case` to `camelCase`.
#[must_use]
pub fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();

    if let Some(first) = chars.next() {
        out.extend(first.to_lowercase());
    }

    while let Some(c) = chars.next() {
        if matches!(c, '_' | '-') {
            match chars.peek() {
                Some(next) if next.is_ascii_alphabetic() => {
                    out.push(next.to_ascii_uppercase());
                    chars.next();
                }
                _ => out.push(c),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Recursively rewrite object keys to camelCase. Arrays are walked; scalars
/// are returned unchanged.
#[must_use]
pub fn keys_to_camel_case(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (to_camel_case(&k), keys_to_camel_case(v)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(keys_to_camel_case).collect()),
        other => other,
    }
}
