use serde::{Deserialize, Serialize};

/// One stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Frame {
    pub(crate) filename: String,
    pub(crate) lineno: u32,
    pub(crate) method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) context: Option<SourceContext>,
}

/// Source lines around the line of a frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SourceContext {
    pub(crate) pre: Vec<String>,
    pub(crate) post: Vec<String>,
}

impl Frame {
    pub(crate) fn unknown(line: &str) -> Self {
        Frame {
            filename: "<unknown>".into(),
            lineno: 0,
            method: Some(line.into()),
            code: None,
            context: None,
        }
    }
}
