//! Outbound transport.
//!
//! # Responsibilities
//! - Issue one GET against the upstream API, nothing more
//! - Map every failure onto the [`UpstreamError`] taxonomy
//!
//! Pacing, retries and breaker bookkeeping happen in the client; a transport
//! attempt is a single request with its own deadline.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::schema::UpstreamConfig;
use crate::upstream::error::{TransientKind, UpstreamError};

pub const JSON_API: &str = "application/vnd.api+json";

/// One upstream GET.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    /// Path below the base URL, starting with '/'.
    pub path: String,
    pub params: Vec<(String, String)>,
    pub timeout: Duration,
}

impl UpstreamRequest {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            timeout,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }
}

/// A successful (2xx) upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// reqwest-backed transport for the live API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &UpstreamConfig) -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(JSON_API));
        if let Some(key) = &config.api_key {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }
        if let Ok(agent) = HeaderValue::from_str(&config.user_agent) {
            headers.insert(USER_AGENT, agent);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = format!("{}{}", self.base_url, request.path);
        let response = self
            .client
            .get(&url)
            .query(&request.params)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, request.timeout))?;

        if !status.is_success() {
            return Err(UpstreamError::from_status(
                status.as_u16(),
                error_detail(status, &text),
                retry_after,
            ));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| UpstreamError::InvalidResponse {
                detail: format!("body is not JSON: {}", e),
            })?
        };

        Ok(UpstreamResponse {
            status: status.as_u16(),
            body,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// `Retry-After` in delta-seconds form.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefer the JSON:API `errors[0].detail`, then `title`, then the raw body.
pub fn error_detail(status: StatusCode, body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        let first = v.pointer("/errors/0")?;
        first
            .get("detail")
            .or_else(|| first.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(detail) => detail,
        None if body.trim().is_empty() => status.canonical_reason().unwrap_or("no detail").to_string(),
        None => body.chars().take(200).collect(),
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout: Duration) -> UpstreamError {
    if error.is_timeout() {
        return UpstreamError::timeout(timeout);
    }
    let chain = source_chain(&error);
    if error.is_connect() {
        let lowered = chain.to_ascii_lowercase();
        if lowered.contains("dns") || lowered.contains("lookup") || lowered.contains("certificate") {
            return UpstreamError::Unrecoverable { detail: chain };
        }
        return UpstreamError::Transient {
            kind: TransientKind::Connect,
            detail: chain,
        };
    }
    if error.is_decode() {
        return UpstreamError::InvalidResponse { detail: chain };
    }
    if error.is_builder() {
        return UpstreamError::Unrecoverable { detail: chain };
    }
    UpstreamError::Transient {
        kind: TransientKind::ConnectionReset,
        detail: chain,
    }
}

fn source_chain(error: &reqwest::Error) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
