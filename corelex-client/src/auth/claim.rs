//! Authorization claims

use chrono::Utc;
use corelex_types::Authorization;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::canonical;
use crate::error::Result;
use crate::signer::RequestSigner;

/// Per-broker nonce source: `"{unix_millis}-{counter}"`, counter strictly increasing
#[derive(Debug, Default)]
pub struct NonceSource {
    counter: AtomicU64,
}

impl NonceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", Utc::now().timestamp_millis(), n)
    }
}

/// Unsigned claim of entitlement to `service_id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationClaim {
    pub service_id: String,
    pub requester: String,
    pub nonce: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl AuthorizationClaim {
    pub fn new(service_id: &str, requester: String, nonce: String) -> Self {
        Self {
            service_id: service_id.to_string(),
            requester,
            nonce,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Canonical bytes the claim signature covers
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        canonical::encode(&json!({
            "nonce": self.nonce,
            "requester": self.requester,
            "service_id": self.service_id,
            "timestamp": self.timestamp,
        }))
    }

    pub fn sign(self, signer: &dyn RequestSigner) -> Result<Authorization> {
        let signature = signer.sign(&self.signing_bytes()?)?;
        Ok(Authorization {
            service_id: self.service_id,
            signature: signature.to_wire(),
            requester: self.requester,
            nonce: self.nonce,
            timestamp: self.timestamp,
        })
    }
}
