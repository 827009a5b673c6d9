use crate::{
    handler::AsyncHandler,
    hooks::{BeforeProcessFn, CustomDataFn, ErrorResponseFn, InternalErrorFn, TransformFn},
    Level,
};
use serde_json::{Map, Value};
use std::{
    collections::HashMap,
    env,
    fmt,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

pub(crate) const DEFAULT_ENDPOINT: &str = "https://api.faultline.dev/api/1/item/";
pub(crate) const DEFAULT_MAX_PAYLOAD_SIZE: usize = 512 * 1024;
pub(crate) const DEFAULT_NET_RETRIES: usize = 3;
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub(crate) const DEFAULT_SCRUB_FIELDS: &[&str] = &[
    "passwd",
    "password",
    "password_confirmation",
    "secret",
    "confirm_password",
    "secret_token",
    "api_key",
    "access_token",
    "accessToken",
    "session_id",
];
pub(crate) const DEFAULT_SCRUB_HEADERS: &[&str] = &["Authorization"];

/// Field name that turns on scrubbing of every value.
pub const SCRUB_ALL: &str = "scrub_all";

const ENV_ACCESS_TOKEN: &str = "FAULTLINE_ACCESS_TOKEN";
const ENV_ENDPOINT: &str = "FAULTLINE_ENDPOINT";
const ENV_ENVIRONMENT: &str = "FAULTLINE_ENVIRONMENT";
const ENV_CODE_VERSION: &str = "FAULTLINE_CODE_VERSION";

/// What to do with errors of a certain type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelFilter {
    /// Report the error with this level instead of the requested one.
    Level(Level),
    /// Do not report the error at all.
    Ignore,
}

impl FromStr for LevelFilter {
    type Err = crate::models::ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ignore") {
            Ok(LevelFilter::Ignore)
        } else {
            s.parse().map(LevelFilter::Level)
        }
    }
}

/// Which frames get source code and context lines attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameContext {
    /// No frame gets source context.
    #[default]
    None,
    /// Only frames of files in the project root or the project package paths, and outside the
    /// library paths.
    App,
    /// Every frame whose file is readable.
    All,
}

/// Explicit HTTP proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Proxy URL, e.g. `http://proxy.internal:3128`.
    pub url: String,
    /// Basic auth user.
    pub user: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
}

/// Client configuration.
///
/// ```
/// use faultline::{Config, Level, LevelFilter};
///
/// let config = Config::new("POST_SERVER_ITEM_TOKEN")
///     .with_environment("production")
///     .with_code_version(env!("CARGO_PKG_VERSION"))
///     .with_exception_level_filter("NotFound", LevelFilter::Ignore)
///     .with_exception_level_filter("Timeout", LevelFilter::Level(Level::Warning));
/// ```
#[derive(Clone)]
pub struct Config {
    pub(crate) enabled: bool,
    pub(crate) access_token: Option<String>,
    pub(crate) access_token_in_payload: bool,
    pub(crate) endpoint: String,
    pub(crate) environment: Option<String>,
    pub(crate) framework: Option<String>,
    pub(crate) code_version: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) root: Option<String>,
    pub(crate) branch: Option<String>,
    pub(crate) project_package_paths: Vec<String>,
    pub(crate) library_paths: Vec<String>,
    pub(crate) exception_level_filters: HashMap<String, LevelFilter>,
    pub(crate) scrub_fields: Vec<String>,
    pub(crate) scrub_whitelist: Vec<String>,
    pub(crate) scrub_headers: Vec<String>,
    pub(crate) scrub_user: bool,
    pub(crate) scrub_password: bool,
    pub(crate) randomize_scrub_length: bool,
    pub(crate) max_payload_size: usize,
    pub(crate) truncation_remove_any_key: bool,
    pub(crate) open_timeout: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) net_retries: usize,
    pub(crate) proxy: Option<ProxyConfig>,
    pub(crate) verify_tls: bool,
    pub(crate) write_to_file: bool,
    pub(crate) filepath: Option<PathBuf>,
    pub(crate) async_handler: Option<Arc<dyn AsyncHandler>>,
    pub(crate) async_json_payload: bool,
    pub(crate) failover_handlers: Vec<Arc<dyn AsyncHandler>>,
    pub(crate) custom_data_method: Option<CustomDataFn>,
    pub(crate) transform: Vec<TransformFn>,
    pub(crate) before_process: Vec<BeforeProcessFn>,
    pub(crate) on_error_response: Option<ErrorResponseFn>,
    pub(crate) on_report_internal_error: Option<InternalErrorFn>,
    pub(crate) person_id_field: String,
    pub(crate) ignored_person_ids: Vec<String>,
    pub(crate) frame_context: FrameContext,
    pub(crate) populate_empty_backtraces: bool,
    pub(crate) payload_options: Map<String, Value>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("enabled", &self.enabled)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("endpoint", &self.endpoint)
            .field("environment", &self.environment)
            .field("code_version", &self.code_version)
            .field("max_payload_size", &self.max_payload_size)
            .field("net_retries", &self.net_retries)
            .field("write_to_file", &self.write_to_file)
            .field("async_handler", &self.async_handler)
            .field("failover_handlers", &self.failover_handlers.len())
            .field("transform", &self.transform.len())
            .field("before_process", &self.before_process.len())
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Create a configuration that reports with the given project access token.
    pub fn new(access_token: impl Into<String>) -> Self {
        Config {
            enabled: true,
            access_token: Some(access_token.into()).filter(|t: &String| !t.trim().is_empty()),
            access_token_in_payload: true,
            endpoint: DEFAULT_ENDPOINT.into(),
            environment: None,
            framework: None,
            code_version: None,
            host: None,
            root: None,
            branch: None,
            project_package_paths: Vec::new(),
            library_paths: default_library_paths(),
            exception_level_filters: HashMap::new(),
            scrub_fields: DEFAULT_SCRUB_FIELDS.iter().map(|&f| f.into()).collect(),
            scrub_whitelist: Vec::new(),
            scrub_headers: DEFAULT_SCRUB_HEADERS.iter().map(|&h| h.into()).collect(),
            scrub_user: true,
            scrub_password: true,
            randomize_scrub_length: false,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            truncation_remove_any_key: true,
            open_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            net_retries: DEFAULT_NET_RETRIES,
            proxy: None,
            verify_tls: true,
            write_to_file: false,
            filepath: None,
            async_handler: None,
            async_json_payload: false,
            failover_handlers: Vec::new(),
            custom_data_method: None,
            transform: Vec::new(),
            before_process: Vec::new(),
            on_error_response: None,
            on_report_internal_error: None,
            person_id_field: "id".into(),
            ignored_person_ids: Vec::new(),
            frame_context: FrameContext::None,
            populate_empty_backtraces: false,
            payload_options: Map::new(),
        }
    }

    /// Create a configuration from the environment.
    ///
    /// Reads the access token from `FAULTLINE_ACCESS_TOKEN` and, if present, the endpoint,
    /// environment and code version from `FAULTLINE_ENDPOINT`, `FAULTLINE_ENVIRONMENT` and
    /// `FAULTLINE_CODE_VERSION`.
    pub fn from_env() -> Result<Self, env::VarError> {
        let mut config = Config::new(env::var(ENV_ACCESS_TOKEN)?);
        if let Ok(endpoint) = env::var(ENV_ENDPOINT) {
            config = config.with_endpoint(endpoint);
        }
        if let Ok(environment) = env::var(ENV_ENVIRONMENT) {
            config = config.with_environment(environment);
        }
        if let Ok(code_version) = env::var(ENV_CODE_VERSION) {
            config = config.with_code_version(code_version);
        }
        Ok(config)
    }

    /// Whether reports are built and delivered at all.
    ///
    /// Reporting is disabled when explicitly turned off, or when there is no access token and
    /// reports are not written to a file.
    pub fn is_enabled(&self) -> bool {
        self.enabled && (self.access_token.is_some() || self.write_to_file)
    }

    /// Enable or disable reporting.
    ///
    /// Default: true
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Send the access token in the `X-Faultline-Access-Token` header instead of the payload
    /// root.
    pub fn with_access_token_header(mut self, use_header: bool) -> Self {
        self.access_token_in_payload = !use_header;
        self
    }

    /// Set the item endpoint.
    ///
    /// Default: `https://api.faultline.dev/api/1/item/`
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim().to_string();
        self
    }

    /// Set the environment name. A blank name is reported as `"unspecified"`.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    /// Set the framework name reported with every item.
    pub fn with_framework(mut self, framework: impl Into<String>) -> Self {
        self.framework = Some(framework.into());
        self
    }

    /// Set the version of the application, e.g. a git SHA.
    pub fn with_code_version(mut self, code_version: impl Into<String>) -> Self {
        self.code_version = Some(code_version.into());
        self
    }

    /// Override the host name. Defaults to the machine's host name.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set the project root. Used to decide which frames belong to the application.
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Set the branch the application was deployed from.
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Add a path outside of the project root whose frames belong to the application.
    pub fn with_project_package_path(mut self, path: impl Into<String>) -> Self {
        self.project_package_paths.push(path.into());
        self
    }

    /// Replace the paths of globally installed libraries.
    ///
    /// Default: the Cargo registry and the rustc source prefix.
    pub fn with_library_paths(mut self, paths: Vec<String>) -> Self {
        self.library_paths = paths;
        self
    }

    /// Report errors with the given class name with a different level or not at all.
    pub fn with_exception_level_filter(
        mut self,
        class_name: impl Into<String>,
        filter: LevelFilter,
    ) -> Self {
        self.exception_level_filters
            .insert(class_name.into(), filter);
        self
    }

    /// Add field names whose values are masked. Matching is case-insensitive and on substrings.
    ///
    /// Adding [`SCRUB_ALL`] masks every value that is not whitelisted.
    pub fn with_scrub_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scrub_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Mask every value that is not whitelisted.
    pub fn with_scrub_all(self) -> Self {
        self.with_scrub_fields([SCRUB_ALL])
    }

    /// Add field names that are never masked.
    pub fn with_scrub_whitelist<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scrub_whitelist
            .extend(fields.into_iter().map(Into::into));
        self
    }

    /// Add header names whose values are masked.
    pub fn with_scrub_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scrub_headers.extend(headers.into_iter().map(Into::into));
        self
    }

    /// Whether the user and password parts of URLs are masked.
    ///
    /// Default: true, true
    pub fn with_scrub_credentials(mut self, user: bool, password: bool) -> Self {
        self.scrub_user = user;
        self.scrub_password = password;
        self
    }

    /// Use masks of random length instead of the length of the masked value.
    pub fn with_randomize_scrub_length(mut self, randomize: bool) -> Self {
        self.randomize_scrub_length = randomize;
        self
    }

    /// Set the maximum payload size in bytes.
    ///
    /// Default: 512 KiB
    pub fn with_max_payload_size(mut self, bytes: usize) -> Self {
        self.max_payload_size = bytes;
        self
    }

    /// Whether the last truncation strategy may drop whole keys of the payload.
    ///
    /// Default: true
    pub fn with_truncation_remove_any_key(mut self, enabled: bool) -> Self {
        self.truncation_remove_any_key = enabled;
        self
    }

    /// Set the connect and read timeouts of the HTTP client.
    ///
    /// Default: 3s, 3s
    pub fn with_timeouts(mut self, open_timeout: Duration, read_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self.read_timeout = read_timeout;
        self
    }

    /// Set the total number of attempts for requests that time out.
    ///
    /// Default: 3
    pub fn with_net_retries(mut self, net_retries: usize) -> Self {
        self.net_retries = net_retries;
        self
    }

    /// Use an explicit HTTP proxy. Without one, the proxy is taken from the environment.
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Whether TLS certificates of the endpoint are verified.
    ///
    /// Default: true
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Append payloads to a file, one JSON document per line, instead of sending them.
    pub fn with_write_to_file(mut self, filepath: impl Into<PathBuf>) -> Self {
        self.write_to_file = true;
        self.filepath = Some(filepath.into());
        self
    }

    /// Hand payloads to an async handler instead of sending them on the calling thread.
    pub fn with_async_handler(mut self, handler: Arc<dyn AsyncHandler>) -> Self {
        self.async_handler = Some(handler);
        self
    }

    /// Hand the truncated JSON string to the async handler instead of the payload value.
    pub fn with_async_json_payload(mut self, json: bool) -> Self {
        self.async_json_payload = json;
        self
    }

    /// Add a handler that is tried when the async handler fails.
    pub fn with_failover_handler(mut self, handler: Arc<dyn AsyncHandler>) -> Self {
        self.failover_handlers.push(handler);
        self
    }

    /// Set the custom data hook.
    pub fn with_custom_data_method(mut self, f: CustomDataFn) -> Self {
        self.custom_data_method = Some(f);
        self
    }

    /// Add a transform hook. Hooks run in the order they were added.
    pub fn with_transform(mut self, f: TransformFn) -> Self {
        self.transform.push(f);
        self
    }

    /// Add a before-process hook. Hooks run in the order they were added.
    pub fn with_before_process(mut self, f: BeforeProcessFn) -> Self {
        self.before_process.push(f);
        self
    }

    /// Set the hook called with non-200 responses.
    pub fn with_on_error_response(mut self, f: ErrorResponseFn) -> Self {
        self.on_error_response = Some(f);
        self
    }

    /// Set the hook called when the library reports one of its own errors.
    pub fn with_on_report_internal_error(mut self, f: InternalErrorFn) -> Self {
        self.on_report_internal_error = Some(f);
        self
    }

    /// Set the key of the person object holding the id.
    ///
    /// Default: `"id"`
    pub fn with_person_id_field(mut self, field: impl Into<String>) -> Self {
        self.person_id_field = field.into();
        self
    }

    /// Add person ids whose reports are dropped.
    pub fn with_ignored_person_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_person_ids
            .extend(ids.into_iter().map(Into::into));
        self
    }

    /// Set which frames get source code and context lines.
    ///
    /// Default: [`FrameContext::None`]
    pub fn with_frame_context(mut self, frame_context: FrameContext) -> Self {
        self.frame_context = frame_context;
        self
    }

    /// Use the current call stack for errors that carry no backtrace.
    pub fn with_populate_empty_backtraces(mut self, populate: bool) -> Self {
        self.populate_empty_backtraces = populate;
        self
    }

    /// Data deep-merged into the `data` section of every payload.
    pub fn with_payload_options(mut self, options: Map<String, Value>) -> Self {
        self.payload_options = options;
        self
    }

    /// Build a blocking reqwest client honoring the timeouts, proxy and TLS settings.
    #[cfg(feature = "reqwest")]
    #[cfg_attr(docsrs, doc(cfg(feature = "reqwest")))]
    pub fn build_http_client(&self) -> Result<reqwest::blocking::Client, crate::Error> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(self.open_timeout)
            .timeout(self.read_timeout)
            .danger_accept_invalid_certs(!self.verify_tls);
        if let Some(proxy_config) = &self.proxy {
            let mut proxy =
                reqwest::Proxy::all(&proxy_config.url).map_err(crate::Error::BuildClient)?;
            if let (Some(user), Some(password)) = (&proxy_config.user, &proxy_config.password) {
                proxy = proxy.basic_auth(user, password);
            }
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(crate::Error::BuildClient)
    }

    pub(crate) fn level_filter(&self, class_name: &str) -> Option<LevelFilter> {
        self.exception_level_filters.get(class_name).copied()
    }
}

fn default_library_paths() -> Vec<String> {
    let cargo_home = env::var("CARGO_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| env::var("HOME").ok().map(|home| PathBuf::from(home).join(".cargo")));
    let mut paths = Vec::with_capacity(2);
    if let Some(cargo_home) = cargo_home {
        paths.push(cargo_home.join("registry").to_string_lossy().into_owned());
    }
    paths.push("/rustc/".into());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("ignore", LevelFilter::Ignore ; "ignore")]
    #[test_case("IGNORE", LevelFilter::Ignore ; "ignore uppercase")]
    #[test_case("warning", LevelFilter::Level(Level::Warning) ; "level")]
    fn parse_level_filter(input: &str, expected: LevelFilter) {
        assert_eq!(expected, input.parse().unwrap());
    }

    #[test]
    fn blank_token_disables_reporting() {
        assert!(!Config::new("  ").is_enabled());
        assert!(Config::new("token").is_enabled());
        assert!(!Config::new("token").with_enabled(false).is_enabled());
    }

    #[test]
    fn write_to_file_does_not_need_a_token() {
        assert!(Config::new("").with_write_to_file("/tmp/items.json").is_enabled());
    }

    #[test]
    fn level_filters_are_looked_up_by_class_name() {
        let config =
            Config::new("token").with_exception_level_filter("NotFound", LevelFilter::Ignore);
        assert_eq!(Some(LevelFilter::Ignore), config.level_filter("NotFound"));
        assert_eq!(None, config.level_filter("Other"));
    }

    #[test]
    fn debug_redacts_access_token() {
        let debug = format!("{:?}", Config::new("secret-token"));
        assert!(!debug.contains("secret-token"));
    }
}
