//! Conduit HTTP transport.
//!
//! Every Conduit method is a `POST <base>/api/<method>` with two form fields:
//! `params`, the JSON-encoded arguments including the `__conduit__` token,
//! and `output=json`. The response envelope is
//! `{"result": ..., "error_code": ..., "error_info": ...}`.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::error::ConduitError;

/// Timeout applied to every Conduit request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_info: Option<String>,
}

/// A Conduit API client bound to one Phabricator instance.
#[derive(Clone)]
pub struct ConduitClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl ConduitClient {
    /// Creates a client for the instance at `base_url`.
    ///
    /// Both `https://phab.example.com` and `https://phab.example.com/api/`
    /// are accepted.
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, ConduitError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("try-push/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ConduitError::Client)?;
        Ok(ConduitClient {
            http,
            api_url: api_url(base_url)?,
            token: token.into(),
        })
    }

    /// Calls `method` with `params` and decodes its `result`.
    #[instrument(skip(self, params))]
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ConduitError> {
        let result = self.call_raw(method, params).await?;
        serde_json::from_value(result).map_err(|e| ConduitError::malformed(method, e))
    }

    async fn call_raw(&self, method: &str, params: Value) -> Result<Value, ConduitError> {
        let mut params = match params {
            Value::Object(map) => map,
            other => {
                return Err(ConduitError::malformed(
                    method,
                    format!("params must be an object, got {}", other),
                ));
            }
        };
        params.insert("__conduit__".to_string(), json!({ "token": self.token }));
        let params = Value::Object(params).to_string();

        let url = format!("{}{}", self.api_url, method);
        debug!(%url, "Calling Conduit");

        let http_error = |source| ConduitError::Http {
            method: method.to_string(),
            source,
        };
        let response = self
            .http
            .post(&url)
            .form(&[("params", params.as_str()), ("output", "json")])
            .send()
            .await
            .map_err(http_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConduitError::Status {
                method: method.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: Envelope = response.json().await.map_err(http_error)?;
        if let Some(code) = envelope.error_code {
            return Err(ConduitError::Api {
                method: method.to_string(),
                code,
                info: envelope.error_info.unwrap_or_default(),
            });
        }
        Ok(envelope.result)
    }
}

impl std::fmt::Debug for ConduitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConduitClient")
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

fn api_url(base_url: &str) -> Result<String, ConduitError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConduitError::InvalidUrl(base_url.to_string()));
    }
    let root = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    Ok(format!("{}/api/", root))
}
