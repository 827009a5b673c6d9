use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::time::SystemTime;

pub(crate) fn time_to_timestamp(time: SystemTime) -> i64 {
    DateTime::<Utc>::from(time).timestamp()
}

/// Merge `other` into `base`. Objects are merged key by key, recursively; for every other kind
/// of value `other` wins.
pub(crate) fn deep_merge(base: &mut Map<String, Value>, other: Map<String, Value>) {
    for (key, value) in other {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Whether a value counts as absent: null, false, an empty string, array or object.
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(_) => false,
    }
}

/// String form used to compare ids: strings as they are, everything else as JSON text.
pub(crate) fn value_to_id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
