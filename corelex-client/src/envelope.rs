//! Request envelopes
//!
//! An envelope is the wire unit for one call: the canonical body, the
//! signature over exactly those bytes, and the service auth token when the
//! call targets a paid service.
//!
//! Wire layout of the JSON body:
//! `{ ...body fields, "signedPayload": "<sig>", "auth_token": "<tok>" }`.
//! The signature covers the body fields only. `auth_token` is also sent as
//! the `X-Auth-Token` header.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::auth::AuthorizationBroker;
use crate::canonical;
use crate::error::{ClientError, Result};
use crate::signer::{RequestSigner, Signature, SignatureScheme};
use crate::transport::{HttpMethod, TransportRequest};

pub const SIGNATURE_FIELD: &str = "signedPayload";
pub const AUTH_TOKEN_FIELD: &str = "auth_token";
/// Key a non-object body is wrapped under before signing
pub const WRAPPED_BODY_FIELD: &str = "data";

pub const SIGNATURE_SCHEME_HEADER: &str = "X-Signature-Scheme";
pub const SIGNER_HEADER: &str = "X-Signer";
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
pub const CONTENT_DIGEST_HEADER: &str = "Content-Digest";
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

#[derive(Debug, Clone)]
pub struct Envelope {
    body: Option<Map<String, Value>>,
    signature: Option<Signature>,
    auth_token: Option<String>,
    scheme: SignatureScheme,
    signer: String,
}

/// Canonically encode and sign `body` without any authorization step.
///
/// Fails if the body already uses a reserved envelope field, since that
/// field would be overwritten after signing.
pub fn seal(body: Option<&Value>, signer: &dyn RequestSigner) -> Result<Envelope> {
    let body = body.map(normalize_body).transpose()?;

    let signature = match body {
        Some(ref fields) => {
            let bytes = canonical::encode(&Value::Object(fields.clone()))?;
            Some(signer.sign(&bytes)?)
        }
        None => None,
    };

    Ok(Envelope {
        body,
        signature,
        auth_token: None,
        scheme: signer.scheme(),
        signer: signer.identity(),
    })
}

fn normalize_body(body: &Value) -> Result<Map<String, Value>> {
    let fields = match body {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = Map::new();
            map.insert(WRAPPED_BODY_FIELD.to_string(), other.clone());
            map
        }
    };

    for reserved in [SIGNATURE_FIELD, AUTH_TOKEN_FIELD] {
        if fields.contains_key(reserved) {
            return Err(ClientError::Encoding(format!(
                "body must not contain reserved field '{}'",
                reserved
            )));
        }
    }
    Ok(fields)
}

impl Envelope {
    pub fn body(&self) -> Option<&Map<String, Value>> {
        self.body.as_ref()
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref()
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn signer(&self) -> &str {
        &self.signer
    }

    fn with_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// The exact bytes the signature covers
    pub fn signed_bytes(&self) -> Result<Option<Vec<u8>>> {
        self.body
            .as_ref()
            .map(|fields| canonical::encode(&Value::Object(fields.clone())))
            .transpose()
    }

    /// JSON body sent over the wire (`None` for body-less calls)
    pub fn wire_body(&self) -> Option<Value> {
        let mut fields = self.body.clone()?;
        if let Some(ref signature) = self.signature {
            fields.insert(SIGNATURE_FIELD.to_string(), Value::String(signature.to_wire()));
        }
        if let Some(ref token) = self.auth_token {
            fields.insert(AUTH_TOKEN_FIELD.to_string(), Value::String(token.clone()));
        }
        Some(Value::Object(fields))
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (SIGNATURE_SCHEME_HEADER.to_string(), self.scheme.as_str().to_string()),
            (SIGNER_HEADER.to_string(), self.signer.clone()),
        ];
        if let Some(ref token) = self.auth_token {
            headers.push((AUTH_TOKEN_HEADER.to_string(), token.clone()));
        }
        headers
    }

    /// Turn the envelope into a transport request for `method path`
    pub fn to_request(&self, method: HttpMethod, path: &str) -> Result<TransportRequest> {
        let body = self.wire_body().map(|v| canonical::encode(&v)).transpose()?;

        let mut headers = self.headers();
        if let Some(ref bytes) = body {
            headers.push((CONTENT_DIGEST_HEADER.to_string(), content_digest_sha256(bytes)));
        }
        headers.push((REQUEST_ID_HEADER.to_string(), uuid::Uuid::new_v4().to_string()));

        Ok(TransportRequest {
            method,
            path: path.to_string(),
            headers,
            body,
        })
    }
}

/// Compute Content-Digest for an HTTP body using SHA-256.
/// Returns the header value in RFC 9530 format: `sha-256=:<base64>:`
pub fn content_digest_sha256(body: &[u8]) -> String {
    let hash = Sha256::digest(body);
    format!("sha-256=:{}:", STANDARD.encode(hash))
}

/// Builds envelopes, authorizing paid calls first.
pub struct EnvelopeBuilder {
    signer: Arc<dyn RequestSigner>,
    broker: Arc<AuthorizationBroker>,
}

impl EnvelopeBuilder {
    pub fn new(signer: Arc<dyn RequestSigner>, broker: Arc<AuthorizationBroker>) -> Self {
        Self { signer, broker }
    }

    /// Build the envelope for one call.
    ///
    /// With `target_service`, a valid token is obtained before anything is
    /// signed. If that fails no envelope exists, so nothing can be sent.
    pub async fn build(&self, body: Option<&Value>, target_service: Option<&str>) -> Result<Envelope> {
        let token = match target_service {
            Some(service_id) => Some(self.broker.ensure_authorized(service_id).await?),
            None => None,
        };

        let envelope = seal(body, self.signer.as_ref())?;

        log::debug!(
            "[Envelope] Sealed {} body{}",
            if envelope.body.is_some() { "signed" } else { "empty" },
            match target_service {
                Some(id) => format!(" for paid service {}", id),
                None => String::new(),
            }
        );

        Ok(match token {
            Some(token) => envelope.with_auth_token(token.token),
            None => envelope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::Ed25519Signer;
    use serde_json::json;

    fn signer() -> Ed25519Signer {
        Ed25519Signer::from_seed([7u8; 32])
    }

    #[test]
    fn test_content_digest_sha256() {
        // SHA-256 of "hello world" = base64 "uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek="
        assert_eq!(
            content_digest_sha256(b"hello world"),
            "sha-256=:uU0nuZNNPgilLlLX2n2r+sSE7+N6U4DukIj3rOLvzek=:"
        );
    }

    #[test]
    fn test_seal_signs_canonical_bytes() {
        let signer = signer();
        let body = json!({"name": "A", "description": "d", "configuration": {"prompt": "p", "model": "m"}});
        let envelope = seal(Some(&body), &signer).unwrap();

        let bytes = envelope.signed_bytes().unwrap().unwrap();
        assert_eq!(
            bytes,
            br#"{"configuration":{"model":"m","prompt":"p"},"description":"d","name":"A"}"#.to_vec()
        );
        let signature = envelope.signature().unwrap();
        assert!(!signature.as_bytes().is_empty());
        assert!(signer.verify(&bytes, signature).is_ok());
    }

    #[test]
    fn test_mutation_after_signing_breaks_binding() {
        let signer = signer();
        let envelope = seal(Some(&json!({"name": "A"})), &signer).unwrap();
        let signature = envelope.signature().unwrap().clone();

        let mut tampered = envelope.body().unwrap().clone();
        tampered.insert("name".to_string(), json!("B"));
        let tampered_bytes = canonical::encode(&Value::Object(tampered)).unwrap();

        assert!(signer.verify(&tampered_bytes, &signature).is_err());
    }

    #[test]
    fn test_wire_body_carries_signature() {
        let signer = signer();
        let envelope = seal(Some(&json!({"specification": "x"})), &signer).unwrap();
        let wire = envelope.wire_body().unwrap();

        assert_eq!(wire["specification"], json!("x"));
        assert_eq!(
            wire[SIGNATURE_FIELD],
            json!(envelope.signature().unwrap().to_wire())
        );
        assert!(wire.get(AUTH_TOKEN_FIELD).is_none());
    }

    #[test]
    fn test_reserved_fields_rejected() {
        let err = seal(Some(&json!({"signedPayload": "forged"})), &signer()).unwrap_err();
        assert!(matches!(err, ClientError::Encoding(_)));
        let err = seal(Some(&json!({"auth_token": "stolen"})), &signer()).unwrap_err();
        assert!(matches!(err, ClientError::Encoding(_)));
    }

    #[test]
    fn test_non_object_body_is_wrapped() {
        let envelope = seal(Some(&json!([1, 2])), &signer()).unwrap();
        assert_eq!(envelope.body().unwrap().get(WRAPPED_BODY_FIELD), Some(&json!([1, 2])));
    }

    #[test]
    fn test_bodyless_envelope_is_unsigned() {
        let envelope = seal(None, &signer()).unwrap();
        assert!(envelope.signature().is_none());
        let request = envelope.to_request(HttpMethod::Get, "/agents/a-1").unwrap();
        assert!(request.body.is_none());
        assert!(request.header(CONTENT_DIGEST_HEADER).is_none());
        assert_eq!(request.header(SIGNATURE_SCHEME_HEADER), Some("ed25519"));
    }

    #[test]
    fn test_request_headers() {
        let signer = signer();
        let envelope = seal(Some(&json!({"a": 1})), &signer)
            .unwrap()
            .with_auth_token("tok-123".to_string());
        let request = envelope.to_request(HttpMethod::Post, "/agents/a-1/infer").unwrap();

        assert_eq!(request.header(AUTH_TOKEN_HEADER), Some("tok-123"));
        assert_eq!(request.header(SIGNER_HEADER), Some(signer.identity().as_str()));
        assert!(request.header(REQUEST_ID_HEADER).is_some());
        let body = request.body.as_ref().unwrap();
        assert_eq!(
            request.header(CONTENT_DIGEST_HEADER),
            Some(content_digest_sha256(body).as_str())
        );
        assert_eq!(request.json_body().unwrap()[AUTH_TOKEN_FIELD], json!("tok-123"));
    }
}
