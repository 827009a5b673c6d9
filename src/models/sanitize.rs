use serde_json::Value;

const ELLIPSIS: &str = "...";

/// Keep the first `max_chars - 3` characters of `value` and append `"..."`, so the result is
/// `max_chars` characters long.
pub(crate) fn truncate_with_ellipsis(value: &str, max_chars: usize) -> String {
    let mut truncated = truncate_chars(value, max_chars.saturating_sub(ELLIPSIS.len()));
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Cut `value` to its first `max_chars` characters without any marker.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_owned(),
        None => value.to_owned(),
    }
}

/// Apply `f` to every string in the tree, including strings nested in arrays. Object keys are
/// left alone.
pub(crate) fn map_strings(value: &mut Value, f: &mut impl FnMut(&mut String)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => {
            for item in items {
                map_strings(item, f);
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                map_strings(item, f);
            }
        }
        _ => {}
    }
}
