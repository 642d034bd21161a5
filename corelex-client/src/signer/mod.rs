//! Request signers
//!
//! Every outgoing body is signed by exactly one `RequestSigner`. The scheme is
//! fixed per client instance and announced to the server so its verifier can
//! match it:
//!
//! - **ed25519** (default): deterministic Ed25519 from a 32-byte seed or
//!   64-byte keypair, given as hex or base64.
//!   Wire signature is base64 of the 64 signature bytes.
//! - **eip191**: secp256k1 ECDSA over the EIP-191 personal-message hash.
//!   Wire signature is `0x`-prefixed hex of the 65 bytes `r ‖ s ‖ v`.
//!
//! Key material stays inside the signer. Nothing here logs or serializes it.

mod ed25519;
mod eip191;

pub use ed25519::Ed25519Signer;
pub use eip191::Eip191Signer;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SignatureScheme {
    #[default]
    Ed25519,
    Eip191,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::Ed25519 => "ed25519",
            SignatureScheme::Eip191 => "eip191",
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureScheme {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "ed25519" => Ok(SignatureScheme::Ed25519),
            "eip191" | "secp256k1" | "ethereum" => Ok(SignatureScheme::Eip191),
            other => Err(ClientError::Config(format!(
                "Unknown key scheme '{}'. Use 'ed25519' or 'eip191'.",
                other
            ))),
        }
    }
}

/// Signature bound to one encoded payload
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    scheme: SignatureScheme,
    bytes: Vec<u8>,
}

impl Signature {
    pub fn new(scheme: SignatureScheme, bytes: Vec<u8>) -> Self {
        Self { scheme, bytes }
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// String form carried in the `signedPayload` field
    pub fn to_wire(&self) -> String {
        match self.scheme {
            SignatureScheme::Ed25519 => BASE64.encode(&self.bytes),
            SignatureScheme::Eip191 => format!("0x{}", hex::encode(&self.bytes)),
        }
    }

    pub fn from_wire(scheme: SignatureScheme, wire: &str) -> Result<Self> {
        let bytes = match scheme {
            SignatureScheme::Ed25519 => BASE64
                .decode(wire)
                .map_err(|e| ClientError::Signing(format!("Invalid base64 signature: {}", e)))?,
            SignatureScheme::Eip191 => {
                hex::decode(wire.strip_prefix("0x").unwrap_or(wire))
                    .map_err(|e| ClientError::Signing(format!("Invalid hex signature: {}", e)))?
            }
        };
        Ok(Self { scheme, bytes })
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}, {})", self.scheme, self.to_wire())
    }
}

/// Capability to sign canonical payload bytes.
///
/// Signing is CPU-bound and synchronous; callers never await it.
pub trait RequestSigner: Send + Sync {
    fn scheme(&self) -> SignatureScheme;

    /// Public identity of the key, sent as the requester
    fn identity(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Signature>;

    /// Check a signature against this signer's public key
    fn verify(&self, message: &[u8], signature: &Signature) -> Result<()>;
}

/// Build the signer for `scheme` from a hex or base64 private key
pub fn create_signer(scheme: SignatureScheme, private_key: &str) -> Result<Arc<dyn RequestSigner>> {
    let signer: Arc<dyn RequestSigner> = match scheme {
        SignatureScheme::Ed25519 => Arc::new(Ed25519Signer::from_private_key(private_key)?),
        SignatureScheme::Eip191 => Arc::new(Eip191Signer::from_private_key(private_key)?),
    };
    log::info!(
        "[Signer] Initialized {} signer for {}",
        signer.scheme(),
        signer.identity()
    );
    Ok(signer)
}

/// Decode key text: hex (with or without `0x`) first, then standard base64
pub(crate) fn decode_key_material(private_key: &str) -> Result<Vec<u8>> {
    let trimmed = private_key.trim();
    if trimmed.is_empty() {
        return Err(ClientError::Signing("Private key is empty".to_string()));
    }

    let key_hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if key_hex.len() % 2 == 0 && key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return hex::decode(key_hex)
            .map_err(|e| ClientError::Signing(format!("Invalid private key hex: {}", e)));
    }

    BASE64
        .decode(trimmed)
        .map_err(|_| ClientError::Signing("Private key is neither hex nor base64".to_string()))
}
