//! An error monitoring client. It turns errors and messages from your application into
//! reports, scrubs secrets out of them, keeps them below the collection API's size limit and
//! delivers them synchronously, on background workers or to a file.
//!
//! # Usage
//!
//! Create a [`Notifier`] once and share it (it is cheap to clone):
//!
//! ```rust,no_run
//! use faultline::{CapturedError, Config, Notifier, Report};
//!
//! let config = Config::new("POST_SERVER_ITEM_TOKEN")
//!     .with_environment("production")
//!     .with_code_version("4f2a9c1");
//! let notifier = Notifier::from_config(config).unwrap();
//!
//! notifier.info("worker started");
//!
//! if let Err(err) = std::fs::read_to_string("/etc/app.toml") {
//!     let err = CapturedError::from_error(&err).with_current_backtrace();
//!     notifier.error(Report::exception(&err).with_message("loading configuration"));
//! }
//! ```
//!
//! Report calls never fail. They return a [`ReportStatus`] and log problems with [tracing].
//!
//! [tracing]: https://docs.rs/tracing
//!
//! # Scopes
//!
//! A [`Scope`] carries context such as the current request or person. Values may be computed
//! lazily; they are evaluated only when a report is actually built.
//!
//! ```rust,no_run
//! use faultline::{Config, Notifier, Scope};
//! use serde_json::json;
//!
//! let notifier = Notifier::from_config(Config::new("POST_SERVER_ITEM_TOKEN")).unwrap();
//! let notifier = notifier.scope(
//!     Scope::new()
//!         .with_value("person", json!({"id": 42, "username": "ada"}))
//!         .with_lazy("request", || json!({"url": "https://example.com/checkout"})),
//! );
//! notifier.warning("cart was empty");
//! ```
//!
//! # Delivery
//!
//! By default items are sent on the calling thread with a blocking HTTP client. Configure an
//! [`AsyncHandler`] such as [`ThreadHandler`] to deliver them on background workers, or
//! [`Config::with_write_to_file`] to append them to a file instead.
//!
//! # HTTP client
//!
//! Any type implementing [`HttpClient`] can deliver items. The `reqwest-client` feature
//! (enabled by default) implements it for `reqwest::blocking::Client`. Use the
//! `reqwest-client-vendored-tls` or `reqwest-client-rustls` features to change the TLS backend.
//!
//! # Payload processing
//!
//! Every payload goes through these steps before it is sent:
//!
//! - Fields named in [`Config::with_scrub_fields`] are masked with `*` in the extra data, the
//!   request parameters, headers and URL query strings.
//! - Invalid UTF-8 is replaced, see [`enforce_valid_utf8`].
//! - Payloads larger than [`Config::with_max_payload_size`] are truncated with the
//!   [`Strategy`] list, from dropping frames to shortening strings and removing keys. If
//!   that does not help, a small failsafe item is sent in their place.
#![doc(html_root_url = "https://docs.rs/faultline/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs, unreachable_pub, missing_debug_implementations)]
#![cfg_attr(test, deny(warnings))]

mod backtrace;
mod config;
mod convert;
mod deploy;
mod encoding;
mod error;
mod exception;
mod file_sink;
mod handler;
pub mod hooks;
mod http_client;
mod item;
mod models;
mod notifier;
mod scope;
mod scrub;
mod truncation;
mod uploader;

pub use config::{Config, FrameContext, LevelFilter, ProxyConfig, SCRUB_ALL};
pub use deploy::{DeployClient, DeployOptions, DeployResult, DeployStatus};
pub use encoding::enforce_valid_utf8;
pub use error::Error;
pub use exception::{CapturedError, Reportable};
pub use handler::{
    AsyncHandler, AsyncJob, AsyncPayload, HandlerError, ThreadHandler, DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use http_client::{HttpClient, HttpError};
pub use models::{Level, ParseLevelError};
pub use notifier::{Notifier, Report, ReportStatus};
pub use scope::{request_from_http, to_value, LazyValue, Scope, UploadedFile};
pub use scrub::Scrubber;
pub use truncation::{Attempt, Strategy};
