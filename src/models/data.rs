use crate::models::{Body, Level};
use serde::{Deserialize, Serialize};

/// The `data` section of a payload.
///
/// Everything the scope or the payload options add on top of these fields (`request`,
/// `person`, `context`, `custom`, ...) is merged in after serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Data {
    pub(crate) timestamp: i64,
    pub(crate) environment: String,
    pub(crate) level: Level,
    pub(crate) language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) framework: Option<String>,
    pub(crate) server: Server,
    pub(crate) notifier: NotifierInfo,
    pub(crate) body: Body,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) uuid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) project_package_paths: Option<Vec<String>>,
}

/// The machine the report was created on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Server {
    pub(crate) host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) branch: Option<String>,
    pub(crate) pid: u32,
}

/// Name and version of this library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NotifierInfo {
    pub(crate) name: String,
    pub(crate) version: String,
}

impl NotifierInfo {
    pub(crate) fn current() -> Self {
        NotifierInfo {
            name: NOTIFIER_NAME.into(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

pub(crate) const NOTIFIER_NAME: &str = "faultline";
