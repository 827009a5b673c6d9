use crate::{config::Config, models::NotifierInfo, Error, HttpClient};
use backon::{BlockingRetryable, ConstantBuilder};
use bytes::Bytes;
use http::{Request, Response, Uri};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{info, warn};

pub(crate) const ACCESS_TOKEN_HEADER: &str = "X-Faultline-Access-Token";

const STATUS_OK: u16 = 200;

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    result: Option<ApiResult>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    uuid: Option<String>,
}

/// Send a serialized payload. Requests that time out are retried right away until
/// `net_retries` attempts are used up.
pub(crate) fn send<C: HttpClient + ?Sized>(
    client: &C,
    config: &Config,
    body: Vec<u8>,
) -> Result<(), Error> {
    let endpoint = Uri::try_from(config.endpoint.as_str()).map_err(Error::InvalidEndpoint)?;
    let retries = config.net_retries.saturating_sub(1);

    let response = (|| send_once(client, config, &endpoint, body.clone()))
        .retry(
            ConstantBuilder::default()
                .with_delay(Duration::ZERO)
                .with_max_times(retries),
        )
        .when(Error::is_timeout)
        .notify(|err, _| warn!("[faultline] Timeout sending item, retrying: {}", err))
        .call()?;
    handle_response(response, config);
    Ok(())
}

fn send_once<C: HttpClient + ?Sized>(
    client: &C,
    config: &Config,
    endpoint: &Uri,
    body: Vec<u8>,
) -> Result<Response<Bytes>, Error> {
    let mut request = Request::post(endpoint)
        .header(http::header::CONTENT_TYPE, "application/json");
    if !config.access_token_in_payload {
        if let Some(token) = &config.access_token {
            request = request.header(ACCESS_TOKEN_HEADER, token.as_str());
        }
    }
    let request = request
        .body(body)
        .map_err(|err| Error::Connection(err.into()))?;
    client.send(request).map_err(Error::Connection)
}

/// Log the outcome and call the error response hook for anything but 200.
fn handle_response(response: Response<Bytes>, config: &Config) {
    let status = response.status().as_u16();
    let parsed: Option<ApiResponse> = serde_json::from_slice(response.body()).ok();
    if status == STATUS_OK {
        let uuid = parsed
            .and_then(|content| content.result)
            .and_then(|result| result.uuid)
            .unwrap_or_default();
        info!("[faultline] Success (uuid: {})", uuid);
        return;
    }

    let message = parsed
        .and_then(|content| content.message)
        .unwrap_or_else(|| String::from_utf8_lossy(response.body()).into_owned());
    warn!(
        "[faultline] Got unexpected status code from the API: {}. Response: {}",
        status, message
    );
    if let Some(on_error_response) = &config.on_error_response {
        on_error_response(&response);
    }
}

/// Minimal payload sent in place of one that could not be delivered.
pub(crate) fn failsafe_payload(
    config: &Config,
    reason: &str,
    original_uuid: Option<&str>,
    original_host: Option<&str>,
) -> Value {
    let environment = config
        .environment
        .as_deref()
        .filter(|environment| !environment.trim().is_empty())
        .unwrap_or("unspecified");
    let mut payload = json!({
        "data": {
            "level": "error",
            "environment": environment,
            "body": {"message": {"body": format!("Failsafe from faultline. {}", reason)}},
            "notifier": NotifierInfo::current(),
            "custom": {"orig_uuid": original_uuid, "orig_host": original_host},
            "internal": true,
            "failsafe": true,
        }
    });
    if config.access_token_in_payload {
        if let (Some(token), Value::Object(root)) = (&config.access_token, &mut payload) {
            root.insert("access_token".into(), Value::String(token.clone()));
        }
    }
    payload
}
