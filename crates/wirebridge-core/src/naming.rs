//! Key-case conversion at the wire boundary.
//!
//! Clients use `camelCase` keys; the transport and the handlers use
//! `snake_case`. Conversion touches object keys only, recursively through
//! nested objects and arrays, never string values.
//!
//! Only conventionally cased ASCII identifiers round-trip. Keys that already
//! mix underscores and capitals (`user_Id`, `__private`) convert, but the
//! result of converting them back is unspecified.

use serde_json::Value;

/// Convert a client-case key to transport case (`userId` -> `user_id`).
pub fn to_transport_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert a transport-case key to client case (`user_id` -> `userId`).
pub fn to_client_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_'
            && let Some(&next) = chars.peek()
            && next.is_ascii_lowercase()
        {
            out.push(next.to_ascii_uppercase());
            chars.next();
        } else {
            out.push(c);
        }
    }
    out
}

/// `chat_room` -> `ChatRoom`. Used for generated type names.
pub fn to_pascal_case(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Rewrite every object key in `value` to transport case.
pub fn to_transport_case(value: Value) -> Value {
    convert_keys(value, &to_transport_key)
}

/// Rewrite every object key in `value` to client case.
pub fn to_client_case(value: Value) -> Value {
    convert_keys(value, &to_client_key)
}

fn convert_keys(value: Value, convert: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (convert(&key), convert_keys(value, convert)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert_keys(item, convert))
                .collect(),
        ),
        other => other,
    }
}
