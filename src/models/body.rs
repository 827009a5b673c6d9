use crate::models::Frame;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Main content of a report. Exactly one of the variants is present on the wire:
///
/// ```json
/// {"message": {...}} | {"trace": {...}} | {"trace_chain": [{...}, ...]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Body {
    Message(MessageBody),
    Trace(Trace),
    TraceChain(Vec<Trace>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct MessageBody {
    pub(crate) body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) extra: Option<Map<String, Value>>,
}

/// Frames and exception details of one error in a cause chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Trace {
    pub(crate) frames: Vec<Frame>,
    pub(crate) exception: ExceptionInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) extra: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExceptionInfo {
    pub(crate) class: String,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
}
