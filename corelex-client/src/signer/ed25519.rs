//! Ed25519 request signer

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use ed25519_dalek::{Signer as _, SigningKey, Verifier as _};
use std::fmt;

use super::{decode_key_material, RequestSigner, Signature, SignatureScheme};
use crate::error::{ClientError, Result};

pub struct Ed25519Signer {
    signing_key: SigningKey,
    identity: String,
}

impl Ed25519Signer {
    /// Accepts a 32-byte seed or a 64-byte keypair (seed ‖ public key)
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key_bytes = decode_key_material(private_key)?;

        let signing_key = match key_bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&key_bytes);
                SigningKey::from_bytes(&seed)
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(&key_bytes);
                SigningKey::from_keypair_bytes(&pair)
                    .map_err(|e| ClientError::Signing(format!("Invalid Ed25519 keypair: {}", e)))?
            }
            n => {
                return Err(ClientError::Signing(format!(
                    "Ed25519 key must be 32 or 64 bytes, got {}",
                    n
                )))
            }
        };

        Ok(Self::from_signing_key(signing_key))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        Self::from_signing_key(SigningKey::generate(&mut csprng))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let identity = BASE64.encode(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            identity,
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl RequestSigner for Ed25519Signer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ed25519
    }

    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        let signature = self.signing_key.sign(message);
        Ok(Signature::new(
            SignatureScheme::Ed25519,
            signature.to_bytes().to_vec(),
        ))
    }

    fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        if signature.scheme() != SignatureScheme::Ed25519 {
            return Err(ClientError::Signing(format!(
                "Expected ed25519 signature, got {}",
                signature.scheme()
            )));
        }
        let parsed = ed25519_dalek::Signature::from_slice(signature.as_bytes())
            .map_err(|e| ClientError::Signing(format!("Malformed Ed25519 signature: {}", e)))?;
        self.signing_key
            .verifying_key()
            .verify(message, &parsed)
            .map_err(|_| ClientError::Signing("Signature does not match payload".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED_HEX: &str = "0x0707070707070707070707070707070707070707070707070707070707070707";

    #[test]
    fn test_sign_is_deterministic() {
        let signer = Ed25519Signer::from_private_key(SEED_HEX).unwrap();
        let a = signer.sign(b"payload").unwrap();
        let b = signer.sign(b"payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), 64);
    }

    #[test]
    fn test_hex_and_base64_keys_agree() {
        let from_hex = Ed25519Signer::from_private_key(SEED_HEX).unwrap();
        let from_b64 = Ed25519Signer::from_private_key(&BASE64.encode([7u8; 32])).unwrap();
        assert_eq!(from_hex.identity(), from_b64.identity());
    }

    #[test]
    fn test_keypair_bytes_accepted() {
        let seeded = Ed25519Signer::from_seed([7u8; 32]);
        let mut pair = [7u8; 64];
        pair[32..].copy_from_slice(&seeded.public_key_bytes());
        let from_pair = Ed25519Signer::from_private_key(&hex::encode(pair)).unwrap();
        assert_eq!(from_pair.identity(), seeded.identity());
    }

    #[test]
    fn test_mismatched_keypair_rejected() {
        let pair = [7u8; 64];
        assert!(Ed25519Signer::from_private_key(&hex::encode(pair)).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = Ed25519Signer::from_private_key("0x0102").unwrap_err();
        assert!(matches!(err, ClientError::Signing(ref m) if m.contains("32 or 64")));
    }

    #[test]
    fn test_verify_rejects_mutated_payload() {
        let signer = Ed25519Signer::generate();
        let sig = signer.sign(br#"{"name":"A"}"#).unwrap();
        assert!(signer.verify(br#"{"name":"A"}"#, &sig).is_ok());
        assert!(signer.verify(br#"{"name":"B"}"#, &sig).is_err());
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let signer = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let sig = other.sign(b"message").unwrap();
        assert!(signer.verify(b"message", &sig).is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let signer = Ed25519Signer::from_seed([7u8; 32]);
        let rendered = format!("{:?}", signer);
        assert!(!rendered.contains("0707"));
        assert!(rendered.contains(&signer.identity()));
    }
}
