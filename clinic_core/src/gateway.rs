//! Authenticated HTTP access to the dashboard backend.
//!
//! The gateway issues exactly one request per call. It never retries and
//! never touches session or slice state; failures come back as typed
//! [`HttpError`] values for the caller to interpret.

use crate::config::ApiConfig;
use crate::credentials::CredentialStore;
use crate::{Error, HttpError, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// HTTP verbs the dashboard uses
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Backend client that reads the bearer token from the credential store
pub struct HttpGateway {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl HttpGateway {
    /// Build a gateway for the configured backend
    pub fn new(config: &ApiConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue one request and decode the JSON answer.
    ///
    /// A bearer header is attached only when `requires_auth` is set and a
    /// token is currently stored. Empty 2xx bodies decode as `Value::Null`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        requires_auth: bool,
    ) -> std::result::Result<Value, HttpError> {
        let url = format!("{}{}", self.base_url, path);

        let mut request_builder = self
            .http
            .request(method.into(), &url)
            .header("accept", "application/json");

        if requires_auth {
            if let Some(token) = self.credentials.token() {
                request_builder =
                    request_builder.header("Authorization", format!("Bearer {}", token));
            }
        }

        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }

        tracing::debug!("{} {}", method, path);

        let response = request_builder
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_reqwest_error)?;

        if !status.is_success() {
            tracing::debug!("{} {} answered {}", method, path, status.as_u16());
            return Err(HttpError::Status {
                code: status.as_u16(),
                server_message: extract_server_message(&text),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&text).map_err(|e| HttpError::Decode {
            cause: e.to_string(),
        })
    }
}

/// Classifies a reqwest error into an HttpError.
fn classify_reqwest_error(e: reqwest::Error) -> HttpError {
    let cause = if e.is_timeout() {
        format!("Request timed out: {}", e)
    } else if e.is_connect() {
        format!("Connection failed: {}", e)
    } else if e.is_decode() || e.is_body() {
        return HttpError::Decode {
            cause: e.to_string(),
        };
    } else {
        e.to_string()
    };
    HttpError::Transport { cause }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"message": ..}`, `{"error": ".."}` and
/// `{"error": {"message": ..}}`; falls back to short plain-text bodies.
fn extract_server_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| json.get("error").and_then(Value::as_str))
            .or_else(|| {
                json.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
            })
            .map(str::to_owned),
        Err(_) if body.len() <= 200 && !body.starts_with('<') => Some(body.to_owned()),
        Err(_) => None,
    }
}
