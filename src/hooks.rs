//! Callbacks the host application can register on a [`Config`](crate::Config).

use crate::{exception::Reportable, Error, Level};
use bytes::Bytes;
use serde_json::{Map, Value};
use std::{error::Error as StdError, fmt, sync::Arc};

/// Error returned by a hook. It is logged; it never reaches the caller of the report API.
pub type HookError = Box<dyn StdError + Send + Sync + 'static>;

/// Returns custom data that is merged into the `extra` of every report. Keys in the report's
/// own `extra` win on conflicts.
pub type CustomDataFn =
    Arc<dyn Fn(&CustomDataContext<'_>) -> Result<Map<String, Value>, HookError> + Send + Sync>;

/// Mutates the built payload. Runs after the payload is complete; the first failing hook
/// stops the remaining ones.
pub type TransformFn =
    Arc<dyn Fn(&mut TransformOptions<'_>) -> Result<(), HookError> + Send + Sync>;

/// Runs before an item is built and may ask to drop the report.
pub type BeforeProcessFn =
    Arc<dyn Fn(&ProcessOptions<'_>) -> Result<BeforeProcess, HookError> + Send + Sync>;

/// Called with the raw response whenever the API answers with something other than 200.
pub type ErrorResponseFn = Arc<dyn Fn(&http::Response<Bytes>) + Send + Sync>;

/// Called when the library reports one of its own errors.
pub type InternalErrorFn = Arc<dyn Fn(&Error) + Send + Sync>;

/// Input of a [`CustomDataFn`].
pub struct CustomDataContext<'a> {
    /// Message of the report, if any.
    pub message: Option<&'a str>,
    /// Error of the report, if any.
    pub exception: Option<&'a dyn Reportable>,
    /// The resolved scope.
    pub scope: &'a Map<String, Value>,
}

/// Input of a [`TransformFn`].
pub struct TransformOptions<'a> {
    /// Level of the report.
    pub level: Level,
    /// The resolved scope.
    pub scope: &'a Map<String, Value>,
    /// Error of the report, if any.
    pub exception: Option<&'a dyn Reportable>,
    /// Message of the report, if any.
    pub message: Option<&'a str>,
    /// Extra data passed to the report call.
    pub extra: Option<&'a Map<String, Value>>,
    /// The payload about to be sent.
    pub payload: &'a mut Value,
}

/// Input of a [`BeforeProcessFn`].
pub struct ProcessOptions<'a> {
    /// Level of the report.
    pub level: Level,
    /// The resolved scope.
    pub scope: &'a Map<String, Value>,
    /// Error of the report, if any.
    pub exception: Option<&'a dyn Reportable>,
    /// Message of the report, if any.
    pub message: Option<&'a str>,
    /// Extra data passed to the report call.
    pub extra: Option<&'a Map<String, Value>>,
}

/// Decision of a [`BeforeProcessFn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeforeProcess {
    /// Build and send the report.
    Continue,
    /// Drop the report. The report call returns
    /// [`ReportStatus::Ignored`](crate::ReportStatus::Ignored).
    Ignore,
}

macro_rules! opaque_debug {
    ($($name:ident),*) => {
        $(
            impl fmt::Debug for $name<'_> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.debug_struct(stringify!($name))
                        .field("message", &self.message)
                        .field("exception", &self.exception.map(|e| e.class_name()))
                        .finish_non_exhaustive()
                }
            }
        )*
    };
}

opaque_debug!(CustomDataContext, TransformOptions, ProcessOptions);
