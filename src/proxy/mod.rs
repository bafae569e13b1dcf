//! Upstream request forwarding.
//!
//! Resolves a model group, picks one backend through the group's balancer,
//! rewrites the `model` field and relays the call. The upstream response is
//! returned as-is (status, headers, raw body); interpreting it is left to
//! the caller.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;

use crate::balancer::ModelGroupRegistry;

pub use self::types::{ChatMessage, ChatRequest, MessageContent};

/// User agent sent when the caller did not supply one.
pub const USER_AGENT: &str = concat!("janus/", env!("CARGO_PKG_VERSION"));

/// Connection establishment timeout. The overall request timeout is
/// configurable and off by default.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Headers the HTTP client manages itself; never copied from the caller.
const SKIP_REQUEST_HEADERS: [HeaderName; 5] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::ACCEPT_ENCODING,
];

/// Framing headers recomputed by the server when relaying the response.
const SKIP_RESPONSE_HEADERS: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
];

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Model group '{0}' not found")]
    GroupNotFound(String),

    #[error("No backend available in model group '{0}'")]
    NoBackendAvailable(String),

    #[error("Upstream '{backend}' unreachable: {message}")]
    UpstreamUnreachable { backend: String, message: String },

    #[error("Failed to encode upstream request: {0}")]
    Encode(String),
}

/// Verbatim upstream response plus the routing facts the caller needs for
/// billing.
#[derive(Debug)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub model_group: String,
    pub backend: String,
    /// The request as received, before the model rewrite.
    pub request: ChatRequest,
}

/// Build the shared upstream client. `timeout` of `None` means requests may
/// take as long as the backend needs.
pub fn build_http_client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

#[derive(Debug, Clone)]
pub struct RequestForwarder {
    registry: Arc<ModelGroupRegistry>,
    client: reqwest::Client,
}

impl RequestForwarder {
    pub fn new(registry: Arc<ModelGroupRegistry>, client: reqwest::Client) -> Self {
        Self { registry, client }
    }

    pub fn registry(&self) -> &Arc<ModelGroupRegistry> {
        &self.registry
    }

    /// Relay `request` to one backend of `group_name`.
    ///
    /// Exactly one upstream attempt is made. Any HTTP response, including
    /// 4xx/5xx, is a success at this level.
    pub async fn forward(
        &self,
        group_name: &str,
        request: ChatRequest,
        path: &str,
        inbound_headers: &HeaderMap,
    ) -> Result<ForwardedResponse, ForwardError> {
        let balancer = self
            .registry
            .resolve(group_name)
            .ok_or_else(|| ForwardError::GroupNotFound(group_name.to_string()))?;
        let backend = balancer
            .next()
            .ok_or_else(|| ForwardError::NoBackendAvailable(group_name.to_string()))?;

        let mut outbound = request.clone();
        outbound.model = backend.name.clone();
        let body = serde_json::to_vec(&outbound).map_err(|e| ForwardError::Encode(e.to_string()))?;

        let url = format!("{}{}", backend.base_url.trim_end_matches('/'), path);
        let headers = outbound_headers(inbound_headers, &backend.api_key)?;

        tracing::debug!(
            group = %group_name,
            backend = %backend.name,
            url = %url,
            stream = request.stream,
            "Forwarding chat request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| unreachable(&backend.name, &e))?;

        let status = response.status();
        let headers = relay_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| unreachable(&backend.name, &e))?;

        tracing::info!(
            group = %group_name,
            backend = %backend.name,
            status = status.as_u16(),
            bytes = body.len(),
            "Upstream responded"
        );

        Ok(ForwardedResponse {
            status,
            headers,
            body,
            model_group: group_name.to_string(),
            backend: backend.name.clone(),
            request,
        })
    }
}

fn unreachable(backend: &str, err: &reqwest::Error) -> ForwardError {
    tracing::warn!(backend = %backend, error = %err, "Upstream request failed");
    ForwardError::UpstreamUnreachable {
        backend: backend.to_string(),
        message: err.to_string(),
    }
}

/// Caller headers minus transport-managed ones, with JSON content
/// negotiation forced and the backend credential applied.
fn outbound_headers(inbound: &HeaderMap, api_key: &str) -> Result<HeaderMap, ForwardError> {
    let mut headers = HeaderMap::with_capacity(inbound.len() + 2);
    for (name, value) in inbound {
        if !SKIP_REQUEST_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let json = HeaderValue::from_static("application/json");
    headers.insert(header::CONTENT_TYPE, json.clone());
    headers.insert(header::ACCEPT, json);

    if !api_key.is_empty() {
        let bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| ForwardError::Encode(format!("invalid backend credential: {e}")))?;
        headers.insert(header::AUTHORIZATION, bearer);
    }
    Ok(headers)
}

fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !SKIP_RESPONSE_HEADERS.contains(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}
