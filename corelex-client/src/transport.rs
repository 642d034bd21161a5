//! Transport collaborator
//!
//! The signing core hands fully-built requests to a `Transport` and gets back
//! `{status, body}`. Network failures are `ClientError::Transport`; every HTTP
//! status, including 4xx/5xx, is a successful `TransportResponse` so callers
//! can tell the two apart.

use async_trait::async_trait;
use corelex_types::{ApiErrorResponse, ApiResponse};
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    fn to_reqwest(self) -> Method {
        match self {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    /// Path plus optional query string, relative to the base URL
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request body parsed as JSON (`None` when there is no body)
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_ref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }
}

#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server error message from an `{"error": {...}}` body, if any
    pub fn error_message(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        let error = value.get("error")?;
        match error {
            serde_json::Value::String(s) => Some(s.clone()),
            other => other.get("error").and_then(|e| e.as_str()).map(str::to_string),
        }
    }

    /// Decode the body into a tagged `ApiResponse`.
    ///
    /// A non-2xx status is always `ApiResponse::Error`: the body's error when
    /// it has one, otherwise the status. A 2xx with an unreadable body is a
    /// transport error.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<ApiResponse<T>> {
        match serde_json::from_slice::<ApiResponse<T>>(&self.body) {
            Ok(ApiResponse::Success(_)) if !self.is_success() => Ok(ApiResponse::Error(self.status_error())),
            Ok(resp) => Ok(resp),
            Err(e) if self.is_success() => Err(ClientError::Transport(format!(
                "Malformed response body (status {}): {}",
                self.status, e
            ))),
            Err(_) => Ok(ApiResponse::Error(self.status_error())),
        }
    }

    /// Decode a response whose success carries no data (e.g. DELETE)
    pub fn decode_ack(&self) -> Result<ApiResponse<()>> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return Ok(if self.is_success() {
                ApiResponse::Success(())
            } else {
                ApiResponse::Error(self.status_error())
            });
        }

        let value: serde_json::Value = match serde_json::from_slice(&self.body) {
            Ok(v) => v,
            Err(_) if self.is_success() => return Ok(ApiResponse::Success(())),
            Err(_) => return Ok(ApiResponse::Error(self.status_error())),
        };

        if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
            let parsed = serde_json::from_value::<ApiErrorResponse>(error.clone())
                .unwrap_or_else(|_| ApiErrorResponse {
                    error: error.to_string(),
                    details: None,
                });
            return Ok(ApiResponse::Error(parsed));
        }

        Ok(if self.is_success() {
            ApiResponse::Success(())
        } else {
            ApiResponse::Error(self.status_error())
        })
    }

    fn status_error(&self) -> ApiErrorResponse {
        let body = String::from_utf8_lossy(&self.body).trim().to_string();
        ApiErrorResponse {
            error: format!("HTTP {}", self.status),
            details: if body.is_empty() {
                None
            } else {
                Some(serde_json::Value::String(body))
            },
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse>;
}

/// reqwest-backed transport bound to one base URL
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self
            .client
            .request(request.method.to_reqwest(), &url)
            .header(header::ACCEPT, "application/json");
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::Transport(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(format!("Failed to read response from {}: {}", url, e)))?;

        log::debug!("[Transport] {} {} -> {}", request.method, request.path, status);

        Ok(TransportResponse {
            status,
            body: body.to_vec(),
        })
    }
}
