//! Error taxonomy for the signed request pipeline.
//!
//! Every failure reaches the caller as a `ClientError` value. Server-reported
//! errors on ordinary calls are NOT errors here: they come back as
//! `ApiResponse::Error` so callers can branch on them without unwinding.

use corelex_types::ApiErrorResponse;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// `Clone` is required because one authorization outcome is shared by every
/// caller waiting on the same service.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Payload cannot be canonically encoded. Local, never retried.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Key material or signature primitive failure. Local, never retried.
    #[error("signing error: {0}")]
    Signing(String),

    /// The service refused, expired or timed out our authorization.
    #[error("authorization failed for service {service_id}: {reason}")]
    Authorization { service_id: String, reason: String },

    /// Network-level failure, or a success status with an unreadable body.
    #[error("transport error: {0}")]
    Transport(String),

    /// Server error collapsed out of an `ApiResponse`.
    #[error("api error: {0}")]
    Api(ApiErrorResponse),

    /// Invalid client configuration. Aborts construction.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn authorization(service_id: &str, reason: impl Into<String>) -> Self {
        ClientError::Authorization {
            service_id: service_id.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<ApiErrorResponse> for ClientError {
    fn from(err: ApiErrorResponse) -> Self {
        ClientError::Api(err)
    }
}
