//! EIP-191 (personal_sign) request signer backed by a local secp256k1 wallet

use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{LocalWallet, Signer};
use ethers::utils::hash_message;
use std::fmt;

use super::{decode_key_material, RequestSigner, Signature, SignatureScheme};
use crate::error::{ClientError, Result};

pub struct Eip191Signer {
    wallet: LocalWallet,
    address: String,
}

impl Eip191Signer {
    /// Create a signer from a 32-byte private key (hex with or without 0x prefix)
    pub fn from_private_key(private_key: &str) -> Result<Self> {
        let key_bytes = decode_key_material(private_key)?;
        if key_bytes.len() != 32 {
            return Err(ClientError::Signing(format!(
                "secp256k1 key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let signing_key = SigningKey::from_bytes(key_bytes.as_slice().into())
            .map_err(|e| ClientError::Signing(format!("Invalid private key: {}", e)))?;

        let wallet = LocalWallet::from(signing_key);
        let address = format!("{:?}", wallet.address()).to_lowercase();

        Ok(Self { wallet, address })
    }

    /// Wallet address (lowercase hex)
    pub fn address(&self) -> String {
        self.address.clone()
    }
}

impl fmt::Debug for Eip191Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Eip191Signer")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl RequestSigner for Eip191Signer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Eip191
    }

    fn identity(&self) -> String {
        self.address.clone()
    }

    fn sign(&self, message: &[u8]) -> Result<Signature> {
        // "\x19Ethereum Signed Message:\n" ‖ len ‖ message, keccak256
        let digest = hash_message(message);
        let signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| ClientError::Signing(format!("Failed to sign: {}", e)))?;
        Ok(Signature::new(SignatureScheme::Eip191, signature.to_vec()))
    }

    fn verify(&self, message: &[u8], signature: &Signature) -> Result<()> {
        if signature.scheme() != SignatureScheme::Eip191 {
            return Err(ClientError::Signing(format!(
                "Expected eip191 signature, got {}",
                signature.scheme()
            )));
        }
        let parsed = ethers::types::Signature::try_from(signature.as_bytes())
            .map_err(|e| ClientError::Signing(format!("Malformed ECDSA signature: {}", e)))?;
        parsed
            .verify(message.to_vec(), self.wallet.address())
            .map_err(|_| ClientError::Signing("Signature does not match payload".to_string()))
    }
}
