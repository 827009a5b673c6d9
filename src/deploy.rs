//! Deploy notifications, so reports can be grouped by the release that caused them.

use crate::{Error, HttpClient};
use bytes::Bytes;
use http::{Method, Request, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, warn};

const DEFAULT_DEPLOY_ENDPOINT: &str = "https://api.faultline.dev/api/1/deploy/";

/// State of a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    /// The deploy began.
    Started,
    /// The deploy finished.
    Succeeded,
    /// The deploy failed.
    Failed,
    /// The deploy did not finish in time.
    TimedOut,
}

/// Optional fields of a deploy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Name of the user who deployed.
    pub local_username: Option<String>,
    /// Free text, e.g. the release notes.
    pub comment: Option<String>,
}

/// Outcome of a deploy API call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeployResult {
    /// Id assigned by the API. Needed to update the deploy later.
    pub deploy_id: Option<u64>,
    /// Whether the API accepted the call.
    pub success: bool,
    /// Whether the call was skipped because no access token is configured.
    pub skipped: bool,
    /// Method, URL and body of the request. Set for dry runs.
    pub request_info: Option<String>,
    /// Parsed response body.
    pub response: Option<Value>,
}

impl DeployResult {
    /// Result of a call that was not made.
    pub fn skipped() -> Self {
        DeployResult {
            skipped: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    #[serde(default)]
    data: Option<DeployData>,
}

#[derive(Debug, Deserialize)]
struct DeployData {
    #[serde(default)]
    deploy_id: Option<u64>,
}

/// Reports deploys to the deploy API.
///
/// ```no_run
/// use faultline::{DeployClient, DeployOptions, DeployStatus};
///
/// let deploys = DeployClient::new("POST_SERVER_ITEM_TOKEN", reqwest::blocking::Client::new());
/// let started = deploys
///     .report_started("production", "4f2a9c1", DeployOptions::default())
///     .unwrap();
/// if let Some(deploy_id) = started.deploy_id {
///     deploys
///         .update(deploy_id, DeployStatus::Succeeded, Some("all green"))
///         .unwrap();
/// }
/// ```
pub struct DeployClient<C> {
    client: C,
    access_token: Option<String>,
    endpoint: String,
    dry_run: bool,
}

impl<C: fmt::Debug> fmt::Debug for DeployClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployClient")
            .field("client", &self.client)
            .field("endpoint", &self.endpoint)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl<C: HttpClient> DeployClient<C> {
    /// Create a client. A blank access token turns every call into a skipped one.
    pub fn new(access_token: impl Into<String>, client: C) -> Self {
        DeployClient {
            client,
            access_token: Some(access_token.into()).filter(|t: &String| !t.trim().is_empty()),
            endpoint: DEFAULT_DEPLOY_ENDPOINT.into(),
            dry_run: false,
        }
    }

    /// Set the deploy endpoint.
    ///
    /// Default: `https://api.faultline.dev/api/1/deploy/`
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Build requests without sending them.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Report that a deploy of `revision` to `environment` started.
    pub fn report_started(
        &self,
        environment: &str,
        revision: &str,
        options: DeployOptions,
    ) -> Result<DeployResult, Error> {
        let Some(access_token) = &self.access_token else {
            return Ok(DeployResult::skipped());
        };
        let mut body = json!({
            "access_token": access_token,
            "environment": environment,
            "revision": revision,
            "status": DeployStatus::Started,
        });
        if let Value::Object(map) = &mut body {
            if let Some(local_username) = options.local_username {
                map.insert("local_username".into(), Value::String(local_username));
            }
            if let Some(comment) = options.comment {
                map.insert("comment".into(), Value::String(comment));
            }
        }
        self.execute(Method::POST, self.endpoint.clone(), &body)
    }

    /// Change the status of a deploy.
    pub fn update(
        &self,
        deploy_id: u64,
        status: DeployStatus,
        comment: Option<&str>,
    ) -> Result<DeployResult, Error> {
        let Some(access_token) = &self.access_token else {
            return Ok(DeployResult::skipped());
        };
        let token: String = url::form_urlencoded::byte_serialize(access_token.as_bytes()).collect();
        let url = format!("{}{}?access_token={}", self.endpoint, deploy_id, token);
        let mut body = json!({ "status": status });
        if let (Some(comment), Value::Object(map)) = (comment, &mut body) {
            map.insert("comment".into(), Value::String(comment.into()));
        }
        self.execute(Method::PATCH, url, &body)
    }

    fn execute(&self, method: Method, url: String, body: &Value) -> Result<DeployResult, Error> {
        let serialized = serde_json::to_vec(body).map_err(Error::SerializePayload)?;
        if self.dry_run {
            return Ok(DeployResult {
                success: true,
                request_info: Some(format!(
                    "{} {}: {}",
                    method,
                    redact_token(&url),
                    String::from_utf8_lossy(&serialized)
                )),
                ..Default::default()
            });
        }

        let request = Request::builder()
            .method(method)
            .uri(url.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(serialized)
            .map_err(|err| Error::Connection(err.into()))?;
        let response = self.client.send(request).map_err(Error::Connection)?;
        handle_response(response)
    }
}

fn handle_response(response: Response<Bytes>) -> Result<DeployResult, Error> {
    let status = response.status();
    let parsed: Value = serde_json::from_slice(response.body()).map_err(|_| Error::Deploy {
        status_code: status.as_u16(),
        body: String::from_utf8_lossy(response.body()).into_owned(),
    })?;
    if !status.is_success() {
        warn!(
            "[faultline] Deploy API answered with status {}: {}",
            status, parsed
        );
        return Ok(DeployResult {
            response: Some(parsed),
            ..Default::default()
        });
    }

    let deploy_id = serde_json::from_value::<DeployResponse>(parsed.clone())
        .ok()
        .and_then(|content| content.data)
        .and_then(|data| data.deploy_id);
    info!("[faultline] Deploy reported (id: {:?})", deploy_id);
    Ok(DeployResult {
        deploy_id,
        success: true,
        response: Some(parsed),
        ..Default::default()
    })
}

fn redact_token(url: &str) -> String {
    match url.split_once("access_token=") {
        Some((head, _)) => format!("{}access_token=<redacted>", head),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpError;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Canned {
        status: u16,
        body: &'static str,
        requests: Mutex<Vec<(Method, String, Value)>>,
    }

    impl Canned {
        fn new(status: u16, body: &'static str) -> Self {
            Canned {
                status,
                body,
                requests: Mutex::default(),
            }
        }
    }

    impl HttpClient for Canned {
        fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Bytes>, HttpError> {
            self.requests.lock().unwrap().push((
                request.method().clone(),
                request.uri().to_string(),
                serde_json::from_slice(request.body())?,
            ));
            Ok(Response::builder()
                .status(self.status)
                .body(Bytes::from_static(self.body.as_bytes()))?)
        }
    }

    #[test]
    fn report_started_posts_deploy() {
        let client = Canned::new(200, "{\"data\":{\"deploy_id\":42}}");
        let deploys = DeployClient::new("token", client);
        let options = DeployOptions {
            local_username: Some("ada".into()),
            comment: None,
        };
        let result = deploys.report_started("production", "abc", options).unwrap();

        assert_eq!(Some(42), result.deploy_id);
        assert!(result.success);
        let requests = deploys.client.requests.lock().unwrap();
        let (method, uri, body) = &requests[0];
        assert_eq!(Method::POST, *method);
        assert_eq!(DEFAULT_DEPLOY_ENDPOINT, uri);
        assert_eq!(
            json!({
                "access_token": "token",
                "environment": "production",
                "revision": "abc",
                "status": "started",
                "local_username": "ada",
            }),
            *body
        );
    }

    #[test]
    fn update_patches_deploy() {
        let deploys = DeployClient::new("token", Canned::new(200, "{\"data\":{}}"));
        deploys
            .update(42, DeployStatus::Succeeded, Some("done"))
            .unwrap();
        let requests = deploys.client.requests.lock().unwrap();
        let (method, uri, body) = &requests[0];
        assert_eq!(Method::PATCH, *method);
        assert_eq!(
            "https://api.faultline.dev/api/1/deploy/42?access_token=token",
            uri
        );
        assert_eq!(json!({"status": "succeeded", "comment": "done"}), *body);
    }

    #[test]
    fn missing_token_skips() {
        let deploys = DeployClient::new("", Canned::new(200, "{}"));
        let result = deploys
            .report_started("production", "abc", DeployOptions::default())
            .unwrap();
        assert_eq!(DeployResult::skipped(), result);
        assert!(deploys.client.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn dry_run_does_not_send() {
        let deploys = DeployClient::new("token", Canned::new(200, "{}")).with_dry_run(true);
        let result = deploys.update(7, DeployStatus::Failed, None).unwrap();
        assert_eq!(
            Some("PATCH https://api.faultline.dev/api/1/deploy/7?access_token=<redacted>: {\"status\":\"failed\"}"),
            result.request_info.as_deref()
        );
        assert!(deploys.client.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn rejected_deploy() {
        let deploys = DeployClient::new(
            "token",
            Canned::new(403, "{\"err\":1,\"message\":\"bad token\"}"),
        );
        let result = deploys
            .report_started("production", "abc", DeployOptions::default())
            .unwrap();
        assert!(!result.success);
        assert_eq!(Some(json!("bad token")), result.response.map(|r| r["message"].clone()));
    }

    #[test]
    fn unreadable_response_is_an_error() {
        let deploys = DeployClient::new("token", Canned::new(502, "<html>bad gateway</html>"));
        assert!(matches!(
            deploys.report_started("production", "abc", DeployOptions::default()),
            Err(Error::Deploy { status_code: 502, .. })
        ));
    }
}
