//! Remote LMS web service boundary.
//!
//! Everything a site needs from its server goes through [`RemoteService`]:
//! authenticated web service calls, the public configuration and the check
//! for the extended mobile service plugin. [`HttpRemote`] talks to a real
//! server over HTTP; [`ScriptedRemote`] answers from canned responses.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use campus_types::SitePublicConfig;
use serde_json::{json, Value};

/// Path of the REST web service endpoint.
pub const REST_PATH: &str = "webservice/rest/server.php";

/// Path of the AJAX endpoint used for calls that need no token.
pub const AJAX_PATH: &str = "lib/ajax/service.php";

/// Path of the extended mobile service plugin check.
pub const EXTENDED_SERVICE_CHECK_PATH: &str = "local/mobile/check.php";

/// Errors raised at the remote boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The server could not be reached or answered with an HTTP error.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the call.
    #[error("{errorcode}: {message}")]
    Ws { errorcode: String, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Whether the token used for the call is no longer accepted.
    pub fn is_invalid_token(&self) -> bool {
        match self {
            RemoteError::Ws { errorcode, message } => {
                errorcode == "invalidtoken"
                    || (errorcode == "accessexception"
                        && message.contains("Invalid token - token expired"))
            }
            _ => false,
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, RemoteError::Network(_))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RemoteError::InvalidResponse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::InvalidResponse(err.to_string())
    }
}

/// Calls against an LMS server.
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// Call a web service function with the user's token.
    async fn call(
        &self,
        site_url: &str,
        token: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, RemoteError>;

    /// Configuration readable without a token.
    async fn public_config(&self, site_url: &str) -> Result<SitePublicConfig, RemoteError>;

    /// Whether the extended mobile service plugin is installed for `service`.
    async fn check_extended_service(&self, site_url: &str, service: &str)
        -> Result<bool, RemoteError>;
}

/// [`RemoteService`] over HTTP.
#[derive(Clone, Debug)]
pub struct HttpRemote {
    http_client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, RemoteError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()?;
        Ok(Self { http_client })
    }

    async fn post_form(&self, url: String, form: &[(String, String)]) -> Result<Value, RemoteError> {
        let response = self.http_client.post(&url).form(form).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            tracing::warn!(status, url = %url, "Site returned HTTP error");
            return Err(RemoteError::Network(format!("HTTP {status}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RemoteService for HttpRemote {
    async fn call(
        &self,
        site_url: &str,
        token: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, RemoteError> {
        let url = format!(
            "{}/{REST_PATH}?moodlewsrestformat=json&wsfunction={method}",
            site_url.trim_end_matches('/')
        );
        let mut form = vec![
            ("wstoken".to_string(), token.to_string()),
            ("wsfunction".to_string(), method.to_string()),
            ("moodlewsrestformat".to_string(), "json".to_string()),
        ];
        form.extend(flatten_params(params));

        tracing::debug!(method, site_url, "Web service call");
        let data = self.post_form(url, &form).await?;
        match ws_error(&data) {
            Some(err) => Err(err),
            None => Ok(data),
        }
    }

    async fn public_config(&self, site_url: &str) -> Result<SitePublicConfig, RemoteError> {
        let method = "tool_mobile_get_public_config";
        let url = format!(
            "{}/{AJAX_PATH}?info={method}&nosessionupdate=true",
            site_url.trim_end_matches('/')
        );
        let body = json!([{ "index": 0, "methodname": method, "args": {} }]);

        let response = self.http_client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(RemoteError::Network(format!(
                "HTTP {}",
                response.status().as_u16()
            )));
        }
        let data: Value = response.json().await?;
        let data = ajax_result(data)?;
        Ok(serde_json::from_value(data)?)
    }

    async fn check_extended_service(
        &self,
        site_url: &str,
        service: &str,
    ) -> Result<bool, RemoteError> {
        let url = format!(
            "{}/{EXTENDED_SERVICE_CHECK_PATH}",
            site_url.trim_end_matches('/')
        );
        let form = [("service".to_string(), service.to_string())];
        match self.post_form(url, &form).await {
            Ok(data) => Ok(extended_service_installed(&data)),
            // Sites without the plugin answer 404.
            Err(RemoteError::Network(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Flatten call parameters into form fields (`a[0][b]=c`).
pub fn flatten_params(params: &Value) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    if let Value::Object(map) = params {
        for (name, value) in map {
            flatten_into(name.clone(), value, &mut fields);
        }
    }
    fields
}

fn flatten_into(prefix: String, value: &Value, fields: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => fields.push((prefix, if *b { "1" } else { "0" }.to_string())),
        Value::Number(n) => fields.push((prefix, n.to_string())),
        Value::String(s) => fields.push((prefix, s.clone())),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_into(format!("{prefix}[{i}]"), item, fields);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                flatten_into(format!("{prefix}[{key}]"), item, fields);
            }
        }
    }
}

/// Error carried in a web service response body, if any.
pub fn ws_error(data: &Value) -> Option<RemoteError> {
    let object = data.as_object()?;
    if !object.contains_key("exception") && !object.contains_key("errorcode") {
        return None;
    }
    let text = |name: &str| {
        object
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    Some(RemoteError::Ws {
        errorcode: text("errorcode"),
        message: text("message"),
    })
}

fn ajax_result(data: Value) -> Result<Value, RemoteError> {
    let Some(first) = data.as_array().and_then(|items| items.first()) else {
        return Err(RemoteError::InvalidResponse("empty ajax response".into()));
    };
    if first.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let exception = first.get("exception").cloned().unwrap_or_default();
        return Err(ws_error(&exception).unwrap_or(RemoteError::Ws {
            errorcode: "unknown".into(),
            message: exception.to_string(),
        }));
    }
    first
        .get("data")
        .cloned()
        .ok_or_else(|| RemoteError::InvalidResponse("ajax response without data".into()))
}

fn extended_service_installed(data: &Value) -> bool {
    let failed = match data.get("error") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Null) | None => false,
        Some(_) => true,
    };
    !failed && data.get("code").is_some()
}

/// In-process [`RemoteService`] answering from canned responses.
///
/// Used by tests in place of a live server. Unscripted methods fail with
/// [`RemoteError::InvalidResponse`].
#[derive(Default)]
pub struct ScriptedRemote {
    responses: Mutex<HashMap<String, Result<Value, RemoteError>>>,
    calls: Mutex<Vec<ScriptedCall>>,
    public_config: Mutex<SitePublicConfig>,
    extended_service: Mutex<bool>,
    offline: Mutex<bool>,
}

/// A call received by [`ScriptedRemote`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedCall {
    pub site_url: String,
    pub token: String,
    pub method: String,
    pub params: Value,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method` with `data` from now on.
    pub fn respond(&self, method: &str, data: Value) {
        lock(&self.responses).insert(method.to_string(), Ok(data));
    }

    /// Fail `method` with `err` from now on.
    pub fn fail(&self, method: &str, err: RemoteError) {
        lock(&self.responses).insert(method.to_string(), Err(err));
    }

    pub fn set_public_config(&self, config: SitePublicConfig) {
        *lock(&self.public_config) = config;
    }

    pub fn set_extended_service_installed(&self, installed: bool) {
        *lock(&self.extended_service) = installed;
    }

    /// While offline every request fails with [`RemoteError::Network`].
    pub fn set_offline(&self, offline: bool) {
        *lock(&self.offline) = offline;
    }

    /// Number of calls received for `method`.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.method == method).count()
    }

    /// Most recent call received for `method`.
    pub fn last_call(&self, method: &str) -> Option<ScriptedCall> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|c| c.method == method)
            .cloned()
    }

    fn ensure_online(&self) -> Result<(), RemoteError> {
        if *lock(&self.offline) {
            return Err(RemoteError::Network("offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteService for ScriptedRemote {
    async fn call(
        &self,
        site_url: &str,
        token: &str,
        method: &str,
        params: &Value,
    ) -> Result<Value, RemoteError> {
        lock(&self.calls).push(ScriptedCall {
            site_url: site_url.to_string(),
            token: token.to_string(),
            method: method.to_string(),
            params: params.clone(),
        });
        self.ensure_online()?;
        lock(&self.responses)
            .get(method)
            .cloned()
            .unwrap_or_else(|| {
                Err(RemoteError::InvalidResponse(format!(
                    "no scripted response for {method}"
                )))
            })
    }

    async fn public_config(&self, _site_url: &str) -> Result<SitePublicConfig, RemoteError> {
        self.ensure_online()?;
        Ok(lock(&self.public_config).clone())
    }

    async fn check_extended_service(
        &self,
        _site_url: &str,
        _service: &str,
    ) -> Result<bool, RemoteError> {
        self.ensure_online()?;
        Ok(*lock(&self.extended_service))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
