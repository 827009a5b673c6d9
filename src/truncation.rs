//! Shrinks payloads that exceed the byte budget, one strategy at a time.

use crate::{
    models::{map_strings, truncate_chars, truncate_with_ellipsis},
    Error,
};
use serde_json::{json, Map, Value};
use std::fmt;

const FRAMES_RANGE: usize = 150;
const STRING_THRESHOLDS: [usize; 3] = [1024, 512, 256];
const MIN_BODY_MESSAGE_CHARS: usize = 255;
const TITLE_MAX_CHARS: usize = 255;
const REMOVED_KEYS_MESSAGE: &str =
    "Payload keys removed due to oversized payload. See diagnostic key";

/// Keys of the `data` section that are never removed.
const ESSENTIAL_DATA_KEYS: &[&str] = &[
    "body",
    "level",
    "environment",
    "timestamp",
    "language",
    "notifier",
    "uuid",
    "framework",
];

/// A way to make a payload smaller. Strategies run in the order of the variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The payload as built.
    Raw,
    /// Keep only the first and last 150 frames of every trace.
    Frames,
    /// Cut strings longer than the threshold in bytes.
    Strings(usize),
    /// Drop descriptions, cap exception messages and keep only the first and last frame.
    MinBody,
    /// Drop the `request` section.
    RemoveRequest,
    /// Drop the `extra` of the body.
    RemoveExtra,
    /// Drop unknown root keys and the largest non-essential `data` keys.
    RemoveAnyKey,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Raw => f.write_str("raw"),
            Strategy::Frames => f.write_str("frames"),
            Strategy::Strings(threshold) => write!(f, "strings_{}", threshold),
            Strategy::MinBody => f.write_str("min_body"),
            Strategy::RemoveRequest => f.write_str("remove_request"),
            Strategy::RemoveExtra => f.write_str("remove_extra"),
            Strategy::RemoveAnyKey => f.write_str("remove_any_key"),
        }
    }
}

/// A strategy that ran and the payload size in bytes after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// The strategy.
    pub strategy: Strategy,
    /// Size of the serialized payload after the strategy ran.
    pub size: usize,
}

impl fmt::Display for Attempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.strategy, self.size)
    }
}

/// A payload that fits the byte budget.
#[derive(Debug)]
pub(crate) struct Truncated {
    pub(crate) bytes: Vec<u8>,
    pub(crate) attempts: Vec<Attempt>,
}

pub(crate) fn needs_truncation(bytes: &[u8], max_size: usize) -> bool {
    bytes.len() > max_size
}

/// Serialize `payload`, applying strategies cumulatively until it fits `max_size` bytes.
pub(crate) fn truncate(
    payload: &Value,
    max_size: usize,
    remove_any_key: bool,
) -> Result<Truncated, Error> {
    let mut attempts = Vec::new();
    let mut bytes = serde_json::to_vec(payload).map_err(Error::SerializePayload)?;
    let original_size = bytes.len();
    attempts.push(Attempt {
        strategy: Strategy::Raw,
        size: original_size,
    });
    if !needs_truncation(&bytes, max_size) {
        return Ok(Truncated { bytes, attempts });
    }

    let mut strategies = vec![Strategy::Frames];
    strategies.extend(STRING_THRESHOLDS.iter().map(|&t| Strategy::Strings(t)));
    strategies.extend([
        Strategy::MinBody,
        Strategy::RemoveRequest,
        Strategy::RemoveExtra,
    ]);
    if remove_any_key {
        strategies.push(Strategy::RemoveAnyKey);
    }

    let mut working = payload.clone();
    for strategy in strategies {
        apply(strategy, &mut working, max_size, original_size);
        bytes = serde_json::to_vec(&working).map_err(Error::SerializePayload)?;
        attempts.push(Attempt {
            strategy,
            size: bytes.len(),
        });
        if !needs_truncation(&bytes, max_size) {
            return Ok(Truncated { bytes, attempts });
        }
    }

    Err(Error::PayloadTooLarge {
        original_size,
        final_size: bytes.len(),
        attempts,
    })
}

fn apply(strategy: Strategy, payload: &mut Value, max_size: usize, original_size: usize) {
    match strategy {
        Strategy::Raw => {}
        Strategy::Frames => for_each_trace(payload, |trace| limit_frames(trace, FRAMES_RANGE)),
        Strategy::Strings(threshold) => map_strings(payload, &mut |s| {
            if s.len() > threshold {
                let truncated = truncate_with_ellipsis(s, threshold);
                // Multibyte text can be over the byte threshold but under it in chars.
                if truncated.len() < s.len() {
                    *s = truncated;
                }
            }
        }),
        Strategy::MinBody => for_each_trace(payload, |trace| {
            if let Some(Value::Object(exception)) = trace.get_mut("exception") {
                exception.remove("description");
                if let Some(Value::String(message)) = exception.get_mut("message") {
                    *message = truncate_chars(message, MIN_BODY_MESSAGE_CHARS);
                }
            }
            limit_frames(trace, 1);
        }),
        Strategy::RemoveRequest => {
            if let Some(data) = data_mut(payload) {
                data.remove("request");
            }
        }
        Strategy::RemoveExtra => {
            if let Some(Value::Object(body)) = data_mut(payload).and_then(|d| d.get_mut("body")) {
                if let Some(Value::Object(message)) = body.get_mut("message") {
                    message.remove("extra");
                }
            }
            for_each_trace(payload, |trace| {
                trace.remove("extra");
            });
        }
        Strategy::RemoveAnyKey => remove_any_key(payload, max_size, original_size),
    }
}

fn data_mut(payload: &mut Value) -> Option<&mut Map<String, Value>> {
    payload.get_mut("data").and_then(Value::as_object_mut)
}

fn for_each_trace(payload: &mut Value, mut f: impl FnMut(&mut Map<String, Value>)) {
    let Some(Value::Object(body)) = data_mut(payload).and_then(|d| d.get_mut("body")) else {
        return;
    };
    if let Some(Value::Object(trace)) = body.get_mut("trace") {
        f(trace);
    }
    if let Some(Value::Array(chain)) = body.get_mut("trace_chain") {
        for trace in chain.iter_mut().filter_map(Value::as_object_mut) {
            f(trace);
        }
    }
}

/// Keep the first and the last `range` frames.
fn limit_frames(trace: &mut Map<String, Value>, range: usize) {
    if let Some(Value::Array(frames)) = trace.get_mut("frames") {
        if frames.len() > range * 2 {
            let tail_start = frames.len() - range;
            frames.drain(range..tail_start);
        }
    }
}

fn serialized_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

fn remove_any_key(payload: &mut Value, max_size: usize, original_size: usize) {
    let mut removed = Map::new();

    if let Value::Object(root) = &mut *payload {
        let unknown: Vec<String> = root
            .keys()
            .filter(|key| *key != "access_token" && *key != "data")
            .cloned()
            .collect();
        for key in unknown {
            if let Some(value) = root.remove(&key) {
                removed.insert(key, serialized_size(&value).into());
            }
        }
    }

    let title = extract_title(payload);
    while serialized_size(payload) > max_size {
        let Some(data) = data_mut(payload) else {
            break;
        };
        let largest = data
            .iter()
            .filter(|(key, _)| !ESSENTIAL_DATA_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), serialized_size(value)))
            .max_by_key(|(_, size)| *size);
        let Some((key, size)) = largest else {
            break;
        };
        data.remove(&key);
        removed.insert(format!("data.{}", key), size.into());
    }

    if removed.is_empty() {
        return;
    }
    let Some(data) = data_mut(payload) else {
        return;
    };
    data.insert(
        "body".into(),
        json!({"message": {"body": REMOVED_KEYS_MESSAGE}}),
    );
    if let Some(title) = title {
        data.entry("title").or_insert(Value::String(title));
    }
    let diagnostic = json!({
        "truncation": {
            "original_size": original_size,
            "removed_keys": removed,
        }
    });
    if let Some(Value::Object(notifier)) = data.get_mut("notifier") {
        notifier.insert("diagnostic".into(), diagnostic);
    }
}

/// A short title for the report, from the exception or the message of the body.
fn extract_title(payload: &Value) -> Option<String> {
    let body = payload.get("data")?.get("body")?;
    let trace = body
        .get("trace")
        .or_else(|| body.get("trace_chain").and_then(|chain| chain.get(0)));
    let title = match trace {
        Some(trace) => {
            let exception = trace.get("exception")?;
            format!(
                "{}: {}",
                exception.get("class")?.as_str()?,
                exception.get("message")?.as_str()?
            )
        }
        None => body.get("message")?.get("body")?.as_str()?.to_string(),
    };
    Some(truncate_chars(&title, TITLE_MAX_CHARS))
}
