//! Request helpers shared by the Personalize, CMS and Delivery clients.
//!
//! Every non-2xx response is classified into a [`ClientError`]. Nothing in
//! here retries; retry and resume decisions belong to the orchestrator.

use crate::metrics_defs::UPSTREAM_ERROR;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::counter;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ClientError {
    #[error("upstream rejected credentials ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("upstream resource not found: {0}")]
    NotFound(String),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ClientError::Auth { .. })
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Builds the HTTP client shared by all upstream clients.
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("challenge-pro-activation/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Joins `path` onto a base URL without dropping the base's own path segments.
pub(crate) fn endpoint(base: &url::Url, path: &str) -> String {
    format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

pub(crate) fn classify(status: StatusCode, resource: &str, body: String) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Auth {
            status: status.as_u16(),
            body,
        },
        StatusCode::NOT_FOUND => ClientError::NotFound(resource.to_string()),
        _ => ClientError::Upstream {
            status: status.as_u16(),
            body,
        },
    }
}

/// Passes successful responses through and turns everything else into a `ClientError`.
pub(crate) async fn check_status(
    response: Response,
    resource: &str,
) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    counter!(UPSTREAM_ERROR, "status" => status.as_u16().to_string()).increment(1);
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(%status, resource, body = %body, "upstream request failed");
    Err(classify(status, resource, body))
}

pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    resource: &str,
) -> Result<T, ClientError> {
    let response = check_status(request.send().await?, resource).await?;
    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| ClientError::InvalidResponse(format!("{resource}: {e}")))
}

pub(crate) async fn send_empty(request: RequestBuilder, resource: &str) -> Result<(), ClientError> {
    check_status(request.send().await?, resource).await?;
    Ok(())
}
