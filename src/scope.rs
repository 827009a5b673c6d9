//! Data attached to every report of a notifier: request, person, context and anything else.

use crate::encoding::enforce_valid_utf8;
use once_cell::sync::OnceCell;
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

type Thunk = Box<dyn FnOnce() -> Value + Send>;

/// A scope value that is computed on first use and cached afterwards.
///
/// Clones share the cache, so the function runs at most once no matter how many notifiers
/// hold the value.
#[derive(Clone)]
pub struct LazyValue {
    cell: Arc<OnceCell<Value>>,
    thunk: Arc<Mutex<Option<Thunk>>>,
}

impl LazyValue {
    /// A value computed by `f` on first use.
    pub fn new(f: impl FnOnce() -> Value + Send + 'static) -> Self {
        LazyValue {
            cell: Arc::new(OnceCell::new()),
            thunk: Arc::new(Mutex::new(Some(Box::new(f)))),
        }
    }

    /// A value that is already known.
    pub fn ready(value: Value) -> Self {
        LazyValue {
            cell: Arc::new(OnceCell::with_value(value)),
            thunk: Arc::new(Mutex::new(None)),
        }
    }

    /// The value, computing it if this is the first use.
    pub fn get(&self) -> &Value {
        self.cell.get_or_init(|| {
            let thunk = self
                .thunk
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            thunk.map(|f| f()).unwrap_or(Value::Null)
        })
    }

    /// Whether the value was computed already.
    pub fn is_evaluated(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for LazyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(value) => f.debug_tuple("LazyValue").field(value).finish(),
            None => f.write_str("LazyValue(<pending>)"),
        }
    }
}

/// Key value data merged into the `data` section of every report.
///
/// ```
/// use faultline::Scope;
/// use serde_json::json;
///
/// let scope = Scope::new()
///     .with_value("person", json!({"id": 7, "username": "ada"}))
///     .with_lazy("context", || json!("orders#create"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Scope {
    values: BTreeMap<String, LazyValue>,
}

impl Scope {
    /// An empty scope.
    pub fn new() -> Self {
        Scope::default()
    }

    /// Set `key` to a JSON value.
    pub fn with_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.values.insert(key.into(), LazyValue::ready(value));
        self
    }

    /// Set `key` to anything serializable. See [`to_value`].
    pub fn with<T: Serialize + ?Sized>(self, key: impl Into<String>, value: &T) -> Self {
        self.with_value(key, to_value(value))
    }

    /// Set `key` to a value computed when the first report is built.
    pub fn with_lazy(
        mut self,
        key: impl Into<String>,
        f: impl FnOnce() -> Value + Send + 'static,
    ) -> Self {
        self.values.insert(key.into(), LazyValue::new(f));
        self
    }

    /// Set `key` to raw bytes, decoded as UTF-8 with invalid sequences dropped.
    pub fn with_bytes(self, key: impl Into<String>, bytes: &[u8]) -> Self {
        let decoded = enforce_valid_utf8(bytes).into_owned();
        self.with_value(key, Value::String(decoded))
    }

    /// A new scope with the entries of `self` and `other`. Entries of `other` win.
    pub fn merge(&self, other: &Scope) -> Scope {
        let mut values = self.values.clone();
        values.extend(
            other
                .values
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        Scope { values }
    }

    /// Whether the scope has no entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Evaluate every entry.
    pub(crate) fn resolve(&self) -> Map<String, Value> {
        self.values
            .iter()
            .map(|(key, value)| (key.clone(), value.get().clone()))
            .collect()
    }
}

/// Convert `value` to JSON. Values that fail to serialize are replaced by a placeholder naming
/// their type, so one bad value never loses the whole report.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|_| {
        Value::String(format!(
            "Skipped value of class '{}'",
            std::any::type_name::<T>()
        ))
    })
}

/// Metadata of a file uploaded in a request. The content is never reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedFile {
    /// MIME type sent by the client.
    pub content_type: Option<String>,
    /// File name sent by the client.
    pub original_filename: Option<String>,
    /// Size in bytes.
    pub size: Option<u64>,
}

impl Serialize for UploadedFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.content_type.is_none() && self.original_filename.is_none() && self.size.is_none()
        {
            return serializer.serialize_str("Uploaded file");
        }
        json!({
            "content_type": self.content_type,
            "original_filename": self.original_filename,
            "size": self.size,
        })
        .serialize(serializer)
    }
}

/// Build the `request` scope entry from the head of an HTTP request.
///
/// Relative request targets are made absolute with the `Host` header, so URL scrubbing can
/// parse them.
pub fn request_from_http(parts: &http::request::Parts) -> Value {
    let mut headers = Map::new();
    for name in parts.headers.keys() {
        let values: Vec<String> = parts
            .headers
            .get_all(name)
            .iter()
            .map(|value| enforce_valid_utf8(value.as_bytes()).into_owned())
            .collect();
        headers.insert(name.as_str().to_string(), Value::String(values.join(", ")));
    }

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = match (parts.uri.authority(), header_str(parts, http::header::HOST)) {
        (Some(_), _) => parts.uri.to_string(),
        (None, Some(host)) => format!(
            "{}://{}{}",
            parts.uri.scheme_str().unwrap_or("http"),
            host,
            path_and_query
        ),
        (None, None) => path_and_query.to_string(),
    };

    let get: Map<String, Value> = parts
        .uri
        .query()
        .map(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .map(|(key, value)| (key, Value::String(value)))
                .collect()
        })
        .unwrap_or_default();

    let mut request = Map::new();
    request.insert("url".into(), Value::String(url));
    request.insert("method".into(), Value::String(parts.method.to_string()));
    request.insert("headers".into(), Value::Object(headers));
    request.insert("GET".into(), Value::Object(get));
    if let Some(ip) = user_ip(parts) {
        request.insert("user_ip".into(), Value::String(ip));
    }
    Value::Object(request)
}

fn header_str(parts: &http::request::Parts, name: http::header::HeaderName) -> Option<String> {
    parts
        .headers
        .get(name)
        .map(|value| enforce_valid_utf8(value.as_bytes()).into_owned())
}

fn user_ip(parts: &http::request::Parts) -> Option<String> {
    let forwarded_for = http::header::HeaderName::from_static("x-forwarded-for");
    if let Some(forwarded) = header_str(parts, forwarded_for) {
        let first = forwarded.split(',').next().unwrap_or_default().trim();
        if !first.is_empty() {
            return Some(first.to_string());
        }
    }
    header_str(parts, http::header::HeaderName::from_static("x-real-ip"))
}
