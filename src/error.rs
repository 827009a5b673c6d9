use crate::{handler::HandlerError, http_client::HttpError, truncation::Attempt};
use std::time::Duration;

/// Errors that occurred while building or delivering a report.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The payload failed to serialize to JSON. Reporting failed because of this.
    ///
    /// Note: This is an error in this crate. If you spot this, please open an issue.
    #[error("serializing payload failed with {0}")]
    SerializePayload(serde_json::Error),

    /// A payload handed over by an async handler could not be parsed.
    #[error("deserializing payload failed with {0}")]
    DeserializePayload(serde_json::Error),

    /// The payload was still larger than the byte budget after every truncation strategy ran.
    /// It was not sent.
    #[error(
        "payload too large after truncating attempts (original size: {original_size}, final size: {final_size})"
    )]
    PayloadTooLarge {
        /// Size of the untruncated payload in bytes.
        original_size: usize,
        /// Size of the payload after the last strategy in bytes.
        final_size: usize,
        /// Every strategy that ran, with its resulting size.
        attempts: Vec<Attempt>,
    },

    /// Could not complete the HTTP request to the collection API.
    #[error("sending item failed with {0}")]
    Connection(HttpError),

    /// The async handler and every failover handler rejected the item.
    #[error("async handler failed with {0}")]
    AsyncHandler(HandlerError),

    /// Appending the payload to the configured file failed.
    #[error("writing item to file failed with {0}")]
    WriteToFile(std::io::Error),

    /// Worker threads did not finish before the shutdown deadline.
    #[error("async workers did not finish within {0:?}")]
    ShutdownTimeout(Duration),

    /// The configured endpoint is not a valid URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),

    /// The HTTP client could not be built from the configuration.
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    #[error("building http client failed with {0}")]
    BuildClient(reqwest::Error),

    /// The deploy API answered with a body that could not be understood.
    #[error("deploy request failed with status {status_code}: {body}")]
    Deploy {
        /// HTTP status returned by the deploy API.
        status_code: u16,
        /// Raw response body.
        body: String,
    },
}

impl Error {
    /// Whether the error is a timeout-class network error, the only kind that is retried.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Connection(err) => crate::http_client::is_timeout(err.as_ref()),
            _ => false,
        }
    }
}
