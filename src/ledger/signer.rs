//! Signer abstraction
//!
//! A signer is a capability object: it reports its public key and signs an
//! envelope hash. The key material may live anywhere; [`LocalSigner`] keeps
//! an ed25519 key in memory for channels and development.

use super::{AccountId, DecoratedSignature, Envelope};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Signing backend unavailable: {0}")]
    Unavailable(String),

    #[error("Envelope rejected by signer: {0}")]
    Rejected(String),
}

/// Async signer trait for envelopes
#[async_trait]
pub trait SignerHandle: Send + Sync {
    fn public_key(&self) -> AccountId;

    async fn sign(&self, envelope: &Envelope) -> Result<DecoratedSignature, SignerError>;
}

pub type SharedSigner = Arc<dyn SignerHandle>;

/// In-memory ed25519 signer
pub struct LocalSigner {
    key: SigningKey,
    account_id: AccountId,
}

impl LocalSigner {
    pub fn new(key: SigningKey) -> Self {
        let account_id = AccountId::from_public_key(&key.verifying_key());
        Self { key, account_id }
    }

    /// Generate a fresh random key
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(bytes))
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    /// Convenience for building signer lists
    pub fn shared(self) -> SharedSigner {
        Arc::new(self)
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SignerHandle for LocalSigner {
    fn public_key(&self) -> AccountId {
        self.account_id.clone()
    }

    async fn sign(&self, envelope: &Envelope) -> Result<DecoratedSignature, SignerError> {
        let signature = self.key.sign(&envelope.hash());
        Ok(DecoratedSignature {
            public_key: self.account_id.clone(),
            signature: STANDARD.encode(signature.to_bytes()),
        })
    }
}

/// Check a signature against the envelope hash it claims to cover
pub fn verify_signature(hash: &[u8; 32], signature: &DecoratedSignature) -> bool {
    let Some(key) = signature.public_key.public_key() else {
        return false;
    };
    let Ok(bytes) = STANDARD.decode(&signature.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };
    key.verify(hash, &signature).is_ok()
}
