//! Decoding of client frames and bus payloads.

use serde_json::{Map, Value};

/// Key used to wrap a bus payload that is not valid JSON.
pub const FALLBACK_KEY: &str = "text";

/// Extract the notification text from a client frame.
///
/// JSON objects contribute their `message` field (or the whole object when
/// absent). If that is itself an object, its `message` or `text` field wins,
/// falling back to the object's JSON rendering. Anything that is not JSON is
/// taken verbatim.
pub fn extract_client_text(raw: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(raw) else {
        return raw.to_owned();
    };
    let content = match parsed {
        Value::Object(mut map) => map.remove("message").unwrap_or(Value::Object(map)),
        other => other,
    };
    match content {
        Value::Object(map) => nested_text(&map),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn nested_text(map: &Map<String, Value>) -> String {
    ["message", "text"]
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|v| is_truthy(v))
        .map_or_else(
            || Value::Object(map.clone()).to_string(),
            |v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        )
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Decode a bus payload, wrapping non-JSON text as `{"text": raw}`.
pub fn decode_bus_payload(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| {
        let mut map = Map::new();
        let _ = map.insert(FALLBACK_KEY.to_owned(), Value::String(raw.to_owned()));
        Value::Object(map)
    })
}
