use crate::{
    config::LevelFilter,
    file_sink::FileSink,
    handler::{dispatch, AsyncJob, AsyncPayload, Deliver},
    hooks::{BeforeProcess, ProcessOptions},
    item::Item,
    truncation, uploader, CapturedError, Config, Error, HttpClient, Level, Reportable, Scope,
    Scrubber,
};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use tracing::{debug, error};

/// What one report call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// Reporting is disabled; nothing was built.
    Disabled,
    /// A level filter, a before-process hook or the person ignore list dropped the report.
    Ignored,
    /// The report was sent, written or handed to the async handler.
    Reported {
        /// Id of the report, searchable in the web app.
        uuid: String,
    },
    /// Building or delivering the report failed. The failure was logged.
    Error,
}

impl ReportStatus {
    /// Id of the report, if it was reported.
    pub fn uuid(&self) -> Option<&str> {
        match self {
            ReportStatus::Reported { uuid } => Some(uuid),
            _ => None,
        }
    }
}

/// Input of a report call: a message, an error, or both, plus extra data.
///
/// ```
/// use faultline::{CapturedError, Report};
/// use serde_json::{json, Map};
///
/// let err = CapturedError::new("PaymentDeclined", "card expired");
/// let mut extra = Map::new();
/// extra.insert("order_id".into(), json!(1234));
/// let report = Report::exception(&err)
///     .with_message("while charging")
///     .with_extra(extra);
/// ```
#[derive(Default)]
pub struct Report<'a> {
    message: Option<&'a str>,
    exception: Option<&'a dyn Reportable>,
    extra: Option<Map<String, Value>>,
}

impl<'a> Report<'a> {
    /// A report with only a message.
    pub fn message(message: &'a str) -> Self {
        Report {
            message: Some(message),
            ..Default::default()
        }
    }

    /// A report for an error.
    pub fn exception(exception: &'a dyn Reportable) -> Self {
        Report {
            exception: Some(exception),
            ..Default::default()
        }
    }

    /// Set the message. Together with an error, it becomes the description of the trace.
    pub fn with_message(mut self, message: &'a str) -> Self {
        self.message = Some(message);
        self
    }

    /// Set the error.
    pub fn with_exception(mut self, exception: &'a dyn Reportable) -> Self {
        self.exception = Some(exception);
        self
    }

    /// Set extra data. It wins over the output of the custom data hook.
    pub fn with_extra(mut self, extra: Map<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }
}

impl fmt::Debug for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Report")
            .field("message", &self.message)
            .field("exception", &self.exception.map(|e| e.class_name()))
            .field("extra", &self.extra)
            .finish()
    }
}

impl<'a> From<&'a str> for Report<'a> {
    fn from(message: &'a str) -> Self {
        Report::message(message)
    }
}

impl<'a> From<&'a CapturedError> for Report<'a> {
    fn from(exception: &'a CapturedError) -> Self {
        Report::exception(exception)
    }
}

/// Builds reports and delivers them.
///
/// Clones share the configuration and the HTTP client. [`Notifier::scope`] creates a child
/// notifier with additional scope data.
///
/// ```no_run
/// use faultline::{CapturedError, Config, Notifier, Report, Scope};
/// use serde_json::json;
///
/// let config = Config::new("POST_SERVER_ITEM_TOKEN").with_environment("production");
/// let notifier = Notifier::new(config, reqwest::blocking::Client::new());
///
/// let request_notifier = notifier.scope(Scope::new().with_value("person", json!({"id": 7})));
/// if let Err(err) = "12a".parse::<u32>() {
///     let err = CapturedError::from_error(&err);
///     request_notifier.error(Report::exception(&err).with_message("parsing quantity"));
/// }
/// ```
pub struct Notifier<C> {
    inner: Arc<Inner<C>>,
    scope: Scope,
    reporting_internal_error: bool,
}

struct Inner<C> {
    config: Config,
    client: C,
    scrubber: Scrubber,
    file_sink: Option<FileSink>,
}

impl<C> Clone for Notifier<C> {
    fn clone(&self) -> Self {
        Notifier {
            inner: self.inner.clone(),
            scope: self.scope.clone(),
            reporting_internal_error: self.reporting_internal_error,
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Notifier<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("client", &self.inner.client)
            .field("config", &self.inner.config)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(feature = "reqwest")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
impl Notifier<reqwest::blocking::Client> {
    /// Create a notifier with a reqwest client built from the configuration.
    pub fn from_config(config: Config) -> Result<Self, Error> {
        let client = config.build_http_client()?;
        Ok(Notifier::new(config, client))
    }
}

impl<C: HttpClient + 'static> Notifier<C> {
    /// Create a notifier.
    pub fn new(config: Config, client: C) -> Self {
        let scrubber = Scrubber::from_config(&config);
        let file_sink = match (&config.write_to_file, &config.filepath) {
            (true, Some(path)) => Some(FileSink::new(path)),
            _ => None,
        };
        Notifier {
            inner: Arc::new(Inner {
                config,
                client,
                scrubber,
                file_sink,
            }),
            scope: Scope::new(),
            reporting_internal_error: false,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// A notifier whose reports also carry `scope`. Entries of `scope` win over the entries
    /// of this notifier.
    pub fn scope(&self, scope: Scope) -> Self {
        Notifier {
            inner: self.inner.clone(),
            scope: self.scope.merge(&scope),
            reporting_internal_error: self.reporting_internal_error,
        }
    }

    /// Report with a debug level.
    pub fn debug<'a>(&self, report: impl Into<Report<'a>>) -> ReportStatus {
        self.log(Level::Debug, report)
    }

    /// Report with an info level.
    pub fn info<'a>(&self, report: impl Into<Report<'a>>) -> ReportStatus {
        self.log(Level::Info, report)
    }

    /// Report with a warning level.
    pub fn warning<'a>(&self, report: impl Into<Report<'a>>) -> ReportStatus {
        self.log(Level::Warning, report)
    }

    /// Report with an error level.
    pub fn error<'a>(&self, report: impl Into<Report<'a>>) -> ReportStatus {
        self.log(Level::Error, report)
    }

    /// Report with a critical level.
    pub fn critical<'a>(&self, report: impl Into<Report<'a>>) -> ReportStatus {
        self.log(Level::Critical, report)
    }

    /// Report with the given level.
    ///
    /// Level filters of the error's class name may change the level or drop the report. The
    /// call never fails; failures are logged and reported as internal errors.
    pub fn log<'a>(&self, level: Level, report: impl Into<Report<'a>>) -> ReportStatus {
        let report = report.into();
        let config = &self.inner.config;
        if !config.is_enabled() {
            return ReportStatus::Disabled;
        }

        let mut level = level;
        if let Some(exception) = report.exception {
            match config.level_filter(&exception.class_name()) {
                Some(LevelFilter::Ignore) => return ReportStatus::Ignored,
                Some(LevelFilter::Level(filtered)) => level = filtered,
                None => {}
            }
        }

        if self.before_process_ignores(level, &report) {
            return ReportStatus::Ignored;
        }

        match self.report(level, &report) {
            Ok(status) => status,
            Err(err) => {
                error!("[faultline] Error reporting item: {}", err);
                if !matches!(err, Error::PayloadTooLarge { .. } | Error::AsyncHandler(_)) {
                    self.report_internal_error(&err);
                }
                ReportStatus::Error
            }
        }
    }

    /// Deliver a payload an async handler took out of its queue.
    ///
    /// `json` is the output of [`AsyncJob::to_json`]. If it cannot be delivered, a failsafe
    /// report is sent instead.
    pub fn process_from_async_handler(&self, json: &str) -> Result<(), Error> {
        self.inner.deliver_json(json)
    }

    fn before_process_ignores(&self, level: Level, report: &Report<'_>) -> bool {
        let hooks = &self.inner.config.before_process;
        if hooks.is_empty() {
            return false;
        }
        let scope = self.scope.resolve();
        let options = ProcessOptions {
            level,
            scope: &scope,
            exception: report.exception,
            message: report.message,
            extra: report.extra.as_ref(),
        };
        for hook in hooks {
            match hook(&options) {
                Ok(BeforeProcess::Continue) => {}
                Ok(BeforeProcess::Ignore) => return true,
                Err(err) => {
                    error!("[faultline] Error calling the before_process hook: {}", err);
                    break;
                }
            }
        }
        false
    }

    fn report(&self, level: Level, report: &Report<'_>) -> Result<ReportStatus, Error> {
        let inner = &self.inner;
        let item = Item::new(
            level,
            report.message,
            report.exception,
            report.extra.as_ref(),
            &self.scope,
            &inner.config,
            &inner.scrubber,
        );
        if item.ignored()? {
            return Ok(ReportStatus::Ignored);
        }
        let uuid = item.uuid()?.to_string();
        let payload = item.payload()?;

        match &inner.config.async_handler {
            Some(handler) => {
                let job_payload = if inner.config.async_json_payload {
                    let bytes = inner.truncate(payload)?;
                    AsyncPayload::Json(String::from_utf8_lossy(&bytes).into_owned())
                } else {
                    AsyncPayload::Value(payload.clone())
                };
                let job = AsyncJob::new(job_payload, inner.clone());
                dispatch(handler.as_ref(), &inner.config.failover_handlers, job)?;
            }
            None => inner.process(payload)?,
        }
        Ok(ReportStatus::Reported { uuid })
    }

    /// Report one of this library's own errors. Errors while doing so are only logged.
    fn report_internal_error(&self, err: &Error) {
        if let Some(hook) = &self.inner.config.on_report_internal_error {
            hook(err);
        }
        if self.reporting_internal_error {
            return;
        }

        let internal = Notifier {
            inner: self.inner.clone(),
            scope: self.scope.clone(),
            reporting_internal_error: true,
        };
        let captured = CapturedError::from_error(err);
        let mut extra = Map::new();
        extra.insert("internal".into(), Value::Bool(true));
        let report = Report::exception(&captured).with_extra(extra);
        if let Err(internal_err) = internal.report(Level::Error, &report) {
            error!(
                "[faultline] Error reporting internal error: {}. Original error: {}",
                internal_err, err
            );
        }
    }
}

impl<C: HttpClient> Inner<C> {
    /// Truncate and transmit a payload.
    fn process(&self, payload: &Value) -> Result<(), Error> {
        let bytes = self.truncate(payload)?;
        self.transmit(bytes)
    }

    /// Serialize `payload` within the byte budget. If that is impossible, a failsafe report is
    /// sent in its place.
    fn truncate(&self, payload: &Value) -> Result<Vec<u8>, Error> {
        match truncation::truncate(
            payload,
            self.config.max_payload_size,
            self.config.truncation_remove_any_key,
        ) {
            Ok(truncated) => {
                if truncated.attempts.len() > 1 {
                    debug!(
                        "[faultline] Truncated payload: {}",
                        join_attempts(&truncated.attempts)
                    );
                }
                Ok(truncated.bytes)
            }
            Err(Error::PayloadTooLarge {
                original_size,
                final_size,
                attempts,
            }) => {
                let (uuid, host) = original_ids(payload);
                let reason = format!(
                    "Could not send payload due to it being too large after truncating attempts. Original size: {} Attempts: {} Uuid: {} Host: {}",
                    original_size,
                    join_attempts(&attempts),
                    uuid.unwrap_or_default(),
                    host.unwrap_or_default()
                );
                self.send_failsafe(&reason, uuid, host);
                error!(
                    "[faultline] Payload too large to be sent for UUID {}: {}",
                    uuid.unwrap_or_default(),
                    payload
                );
                Err(Error::PayloadTooLarge {
                    original_size,
                    final_size,
                    attempts,
                })
            }
            Err(err) => Err(err),
        }
    }

    fn transmit(&self, bytes: Vec<u8>) -> Result<(), Error> {
        match &self.file_sink {
            Some(sink) => sink.write(&bytes),
            None => {
                debug!("[faultline] Sending item");
                uploader::send(&self.client, &self.config, bytes)
            }
        }
    }

    fn send_failsafe(&self, reason: &str, uuid: Option<&str>, host: Option<&str>) {
        let payload = uploader::failsafe_payload(&self.config, reason, uuid, host);
        let result = serde_json::to_vec(&payload)
            .map_err(Error::SerializePayload)
            .and_then(|bytes| self.transmit(bytes));
        if let Err(err) = result {
            error!("[faultline] Error sending failsafe: {}", err);
        }
    }
}

impl<C: HttpClient> Deliver for Inner<C> {
    fn deliver(&self, payload: &Value) -> Result<(), Error> {
        let result = self.process(payload);
        match &result {
            Err(Error::PayloadTooLarge { .. }) | Ok(()) => {}
            Err(err) => {
                error!("[faultline] Error processing the item: {}", err);
                let (uuid, host) = original_ids(payload);
                self.send_failsafe(
                    &format!("error in process_from_async_handler: {}", err),
                    uuid,
                    host,
                );
            }
        }
        result
    }

    fn deliver_json(&self, json: &str) -> Result<(), Error> {
        match serde_json::from_str::<Value>(json) {
            Ok(payload) => self.deliver(&payload),
            Err(err) => {
                error!("[faultline] Could not parse payload from async handler: {}", err);
                self.send_failsafe(
                    &format!("error in process_from_async_handler: {}", err),
                    None,
                    None,
                );
                Err(Error::DeserializePayload(err))
            }
        }
    }
}

fn original_ids(payload: &Value) -> (Option<&str>, Option<&str>) {
    let data = payload.get("data");
    (
        data.and_then(|d| d.get("uuid")).and_then(Value::as_str),
        data.and_then(|d| d.get("server"))
            .and_then(|s| s.get("host"))
            .and_then(Value::as_str),
    )
}

fn join_attempts(attempts: &[truncation::Attempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{hooks::HookError, HttpError};
    use bytes::Bytes;
    use http::{Request, Response};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Recording {
        bodies: Mutex<Vec<Value>>,
    }

    impl HttpClient for Recording {
        fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
            self.bodies
                .lock()
                .unwrap()
                .push(serde_json::from_slice(request.body())?);
            Ok(Response::builder()
                .status(200)
                .body(Bytes::from_static(b"{\"err\":0,\"result\":{\"uuid\":\"x\"}}"))?)
        }
    }

    fn notifier(config: Config) -> (Notifier<Arc<Recording>>, Arc<Recording>) {
        let client = Arc::new(Recording::default());
        (Notifier::new(config, client.clone()), client)
    }

    #[test]
    fn disabled_notifier_sends_nothing() {
        let (notifier, client) = notifier(Config::new("token").with_enabled(false));
        assert_eq!(ReportStatus::Disabled, notifier.error("boom"));
        assert!(client.bodies.lock().unwrap().is_empty());
    }

    #[test]
    fn reported_uuid_matches_payload() {
        let (notifier, client) = notifier(Config::new("token"));
        let status = notifier.info("hello");
        let bodies = client.bodies.lock().unwrap();
        assert_eq!(1, bodies.len());
        assert_eq!(json!(status.uuid().unwrap()), bodies[0]["data"]["uuid"]);
    }

    #[test]
    fn level_filters() {
        let config = Config::new("token")
            .with_exception_level_filter("NotFound", LevelFilter::Ignore)
            .with_exception_level_filter("Timeout", LevelFilter::Level(Level::Warning));
        let (notifier, client) = notifier(config);

        let not_found = CapturedError::new("NotFound", "missing");
        assert_eq!(ReportStatus::Ignored, notifier.error(&not_found));

        let timeout = CapturedError::new("Timeout", "slow");
        notifier.critical(&timeout);
        let bodies = client.bodies.lock().unwrap();
        assert_eq!(1, bodies.len());
        assert_eq!(json!("warning"), bodies[0]["data"]["level"]);
    }

    #[test]
    fn before_process_can_ignore() {
        let config = Config::new("token").with_before_process(Arc::new(
            |options: &ProcessOptions<'_>| -> Result<BeforeProcess, HookError> {
                if options.message == Some("noise") {
                    Ok(BeforeProcess::Ignore)
                } else {
                    Ok(BeforeProcess::Continue)
                }
            },
        ));
        let (notifier, client) = notifier(config);
        assert_eq!(ReportStatus::Ignored, notifier.info("noise"));
        assert!(notifier.info("signal").uuid().is_some());
        assert_eq!(1, client.bodies.lock().unwrap().len());
    }

    #[test]
    fn failing_before_process_does_not_stop_the_report() {
        let config = Config::new("token").with_before_process(Arc::new(
            |_: &ProcessOptions<'_>| -> Result<BeforeProcess, HookError> { Err("broken".into()) },
        ));
        let (notifier, _) = notifier(config);
        assert!(notifier.info("still sent").uuid().is_some());
    }

    #[test]
    fn scoped_notifier_adds_data() {
        let (notifier, client) = notifier(Config::new("token"));
        let scoped = notifier.scope(Scope::new().with_value("context", json!("checkout")));
        scoped.info("in scope");
        notifier.info("outside");
        let bodies = client.bodies.lock().unwrap();
        assert_eq!(json!("checkout"), bodies[0]["data"]["context"]);
        assert!(bodies[1]["data"].get("context").is_none());
    }

    #[test]
    fn write_to_file_skips_http() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.json");
        let (notifier, client) = notifier(Config::new("token").with_write_to_file(&path));
        notifier.info("to file");
        assert!(client.bodies.lock().unwrap().is_empty());
        let line = std::fs::read_to_string(&path).unwrap();
        let payload: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(json!("to file"), payload["data"]["body"]["message"]["body"]);
    }

    #[test]
    fn process_from_async_handler_delivers_json() {
        let (notifier, client) = notifier(Config::new("token"));
        notifier
            .process_from_async_handler("{\"data\":{\"level\":\"info\"}}")
            .unwrap();
        assert_eq!(1, client.bodies.lock().unwrap().len());
    }

    #[test]
    fn unparsable_async_payload_sends_failsafe() {
        let (notifier, client) = notifier(Config::new("token"));
        assert!(notifier.process_from_async_handler("{").is_err());
        let bodies = client.bodies.lock().unwrap();
        assert_eq!(1, bodies.len());
        assert_eq!(json!(true), bodies[0]["data"]["failsafe"]);
    }
}
