//! Invocation types shared by the stages and composite pipelines

use crate::ledger::{AccountId, SharedSigner};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source account, fee bid and expiry window of an envelope to be built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub source: AccountId,
    /// Numeric string, parsed when the envelope is built
    pub fee: String,
    /// Seconds until the envelope expires; zero for no expiry
    pub timeout: u64,
}

impl EnvelopeHeader {
    pub fn new(source: AccountId, fee: impl Into<String>, timeout: u64) -> Self {
        Self {
            source,
            fee: fee.into(),
            timeout,
        }
    }
}

/// Outer envelope that pays the fees of an inner one
#[derive(Clone)]
pub struct FeeBumpHeader {
    pub header: EnvelopeHeader,
    pub signers: Vec<SharedSigner>,
}

/// Everything needed to produce and authorize one envelope
#[derive(Clone)]
pub struct TransactionInvocation {
    pub header: EnvelopeHeader,
    pub signers: Vec<SharedSigner>,
    pub fee_bump: Option<FeeBumpHeader>,
}

impl TransactionInvocation {
    pub fn new(header: EnvelopeHeader, signers: Vec<SharedSigner>) -> Self {
        Self {
            header,
            signers,
            fee_bump: None,
        }
    }

    pub fn with_fee_bump(mut self, fee_bump: FeeBumpHeader) -> Self {
        self.fee_bump = Some(fee_bump);
        self
    }

    /// Add a signer unless one with the same key is already present
    pub fn add_signer(&mut self, signer: SharedSigner) {
        let key = signer.public_key();
        if !self.signers.iter().any(|existing| existing.public_key() == key) {
            self.signers.push(signer);
        }
    }
}

fn signer_keys(signers: &[SharedSigner]) -> Vec<AccountId> {
    signers.iter().map(|signer| signer.public_key()).collect()
}

impl fmt::Debug for FeeBumpHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeeBumpHeader")
            .field("header", &self.header)
            .field("signers", &signer_keys(&self.signers))
            .finish()
    }
}

impl fmt::Debug for TransactionInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInvocation")
            .field("header", &self.header)
            .field("signers", &signer_keys(&self.signers))
            .field("fee_bump", &self.fee_bump)
            .finish()
    }
}
