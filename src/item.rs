use crate::{
    backtrace,
    config::Config,
    convert::{deep_merge, is_blank, time_to_timestamp, value_to_id_string},
    exception::Reportable,
    hooks::{CustomDataContext, TransformOptions},
    models::{Body, Data, Level, MessageBody, NotifierInfo, Server},
    scope::Scope,
    scrub::Scrubber,
    Error,
};
use once_cell::unsync::OnceCell;
use serde_json::{Map, Value};
use std::time::SystemTime;
use tracing::error;
use uuid::Uuid;

const LANGUAGE: &str = "rust";
const EMPTY_MESSAGE: &str = "Empty message";
const UNSPECIFIED_ENVIRONMENT: &str = "unspecified";

/// One report, built into a payload at most once.
pub(crate) struct Item<'a> {
    pub(crate) level: Level,
    pub(crate) message: Option<&'a str>,
    pub(crate) exception: Option<&'a dyn Reportable>,
    pub(crate) extra: Option<&'a Map<String, Value>>,
    pub(crate) scope: &'a Scope,
    pub(crate) config: &'a Config,
    pub(crate) scrubber: &'a Scrubber,
    built: OnceCell<Built>,
}

#[derive(Debug)]
struct Built {
    payload: Value,
    uuid: String,
    ignored: bool,
}

impl<'a> Item<'a> {
    pub(crate) fn new(
        level: Level,
        message: Option<&'a str>,
        exception: Option<&'a dyn Reportable>,
        extra: Option<&'a Map<String, Value>>,
        scope: &'a Scope,
        config: &'a Config,
        scrubber: &'a Scrubber,
    ) -> Self {
        Item {
            level,
            message,
            exception,
            extra,
            scope,
            config,
            scrubber,
            built: OnceCell::new(),
        }
    }

    /// The payload. Building runs on first access; later calls return the same payload.
    pub(crate) fn payload(&self) -> Result<&Value, Error> {
        self.built().map(|built| &built.payload)
    }

    pub(crate) fn uuid(&self) -> Result<&str, Error> {
        self.built().map(|built| built.uuid.as_str())
    }

    /// Whether the report belongs to an ignored person and must not be sent.
    pub(crate) fn ignored(&self) -> Result<bool, Error> {
        self.built().map(|built| built.ignored)
    }

    fn built(&self) -> Result<&Built, Error> {
        self.built.get_or_try_init(|| self.build())
    }

    fn build(&self) -> Result<Built, Error> {
        let config = self.config;
        let scope = self.scope.resolve();
        let uuid = Uuid::new_v4().to_string();

        let extra = self.build_extra(&scope, &uuid);
        let body = match self.exception {
            Some(exception) => backtrace::build(exception, self.message, extra, config),
            None => Body::Message(MessageBody {
                body: self
                    .message
                    .filter(|message| !message.is_empty())
                    .unwrap_or(EMPTY_MESSAGE)
                    .to_string(),
                extra,
            }),
        };

        let data = Data {
            timestamp: time_to_timestamp(SystemTime::now()),
            environment: environment(config),
            level: self.level,
            language: LANGUAGE.into(),
            framework: config.framework.clone(),
            server: Server {
                host: config
                    .host
                    .clone()
                    .or_else(sysinfo::System::host_name)
                    .unwrap_or_default(),
                root: config.root.clone(),
                branch: config.branch.clone(),
                pid: std::process::id(),
            },
            notifier: NotifierInfo::current(),
            body,
            uuid: Some(uuid.clone()),
            code_version: config.code_version.clone(),
            project_package_paths: Some(config.project_package_paths.clone())
                .filter(|paths| !paths.is_empty()),
        };
        let mut data = match serde_json::to_value(data).map_err(Error::SerializePayload)? {
            Value::Object(data) => data,
            _ => Map::new(),
        };

        deep_merge(&mut data, config.payload_options.clone());
        deep_merge(&mut data, scope.clone());
        if data.get("context").is_some_and(is_blank) {
            data.remove("context");
        }
        if let Some(request) = data.get_mut("request") {
            self.scrubber.scrub_request(request);
        }
        let ignored = self.is_ignored_person(&data);

        let mut payload = Map::new();
        if config.access_token_in_payload {
            if let Some(token) = &config.access_token {
                payload.insert("access_token".into(), Value::String(token.clone()));
            }
        }
        payload.insert("data".into(), Value::Object(data));
        let mut payload = Value::Object(payload);

        for transform in &config.transform {
            let mut options = TransformOptions {
                level: self.level,
                scope: &scope,
                exception: self.exception,
                message: self.message,
                extra: self.extra,
                payload: &mut payload,
            };
            if let Err(err) = transform(&mut options) {
                error!("[faultline] Error in transform hook: {}", err);
                break;
            }
        }

        Ok(Built {
            payload,
            uuid,
            ignored,
        })
    }

    /// Scrubbed custom data merged with the scrubbed `extra` of the report. `extra` wins.
    fn build_extra(&self, scope: &Map<String, Value>, uuid: &str) -> Option<Map<String, Value>> {
        let mut merged = Map::new();
        if let Some(custom_data_method) = &self.config.custom_data_method {
            let context = CustomDataContext {
                message: self.message,
                exception: self.exception,
                scope,
            };
            match custom_data_method(&context) {
                Ok(custom_data) => merged = self.scrubber.scrub_map(&custom_data),
                Err(err) => {
                    error!(
                        "[faultline] Error in custom data method: {} (item uuid: {})",
                        err, uuid
                    );
                    merged.insert(
                        "_error_in_custom_data_method".into(),
                        Value::String(uuid.to_string()),
                    );
                }
            }
        }
        if let Some(extra) = self.extra {
            deep_merge(&mut merged, self.scrubber.scrub_map(extra));
        }
        Some(merged).filter(|merged| !merged.is_empty())
    }

    fn is_ignored_person(&self, data: &Map<String, Value>) -> bool {
        if self.config.ignored_person_ids.is_empty() {
            return false;
        }
        let Some(id) = data
            .get("person")
            .and_then(|person| person.get(&self.config.person_id_field))
        else {
            return false;
        };
        let id = value_to_id_string(id);
        self.config.ignored_person_ids.iter().any(|ignored| *ignored == id)
    }
}

fn environment(config: &Config) -> String {
    config
        .environment
        .as_deref()
        .map(str::trim)
        .filter(|environment| !environment.is_empty())
        .unwrap_or(UNSPECIFIED_ENVIRONMENT)
        .to_string()
}
