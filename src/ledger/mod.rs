//! Ledger collaborators consumed by the pipeline stages
//!
//! The ledger service itself is external. This module fixes the boundary:
//! - [`AccountReader`] loads sequence state for an account
//! - [`ClassicSubmitter`] submits synchronously and returns the final result
//! - [`ContractRpc`] simulates, submits asynchronously and reports status
//! - [`SignerHandle`] produces signatures for an envelope
//!
//! [`InMemoryLedger`] implements all three service traits in process.

pub mod envelope;
pub mod memory;
pub mod signer;

pub use envelope::{
    parse_fee, DecoratedSignature, Envelope, FeeBumpTransaction, Operation, ResourceFootprint,
    Threshold, TimeBounds, Transaction, TransactionBuilder, MAX_OPERATIONS,
};
pub use memory::InMemoryLedger;
pub use signer::{LocalSigner, SharedSigner, SignerError, SignerHandle};

use crate::errors::LedgerError;
use async_trait::async_trait;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger account identifier: the base58 encoding of an ed25519 public key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(bs58::encode(key.as_bytes()).into_string())
    }

    /// Decode back to the public key, if this id encodes one
    pub fn public_key(&self) -> Option<VerifyingKey> {
        let bytes = bs58::decode(&self.0).into_vec().ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        VerifyingKey::from_bytes(&bytes).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Account state needed to build an envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub id: AccountId,
    /// Current sequence number; the next envelope uses `sequence + 1`
    pub sequence: i64,
    pub balance: u64,
}

#[async_trait]
pub trait AccountReader: Send + Sync {
    async fn load_account(&self, id: &AccountId) -> Result<AccountSnapshot, LedgerError>;
}

/// Final result of a synchronous submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub successful: bool,
    pub hash: String,
    /// Ledger result code for the whole envelope
    pub result: String,
    pub ledger: Option<u32>,
}

#[async_trait]
pub trait ClassicSubmitter: Send + Sync {
    /// A resolved but unsuccessful response is still a failed submission
    async fn submit(&self, envelope: &Envelope) -> Result<SubmitResponse, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendStatus {
    Pending,
    Duplicate,
    TryAgainLater,
    Error,
}

/// Acknowledgement of an asynchronous submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTransactionResponse {
    pub hash: String,
    pub status: SendStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    NotFound,
    Success,
    Failed,
}

impl TransactionStatus {
    /// Whether the ledger has not reached a verdict yet
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionStatus::Pending | TransactionStatus::NotFound)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionStatusResponse {
    pub hash: String,
    pub status: TransactionStatus,
    pub result: Option<String>,
    pub ledger: Option<u32>,
}

/// Outcome of a contract invocation dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub min_resource_fee: u64,
    pub resources: Option<ResourceFootprint>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub restore_required: bool,
}

#[async_trait]
pub trait ContractRpc: Send + Sync {
    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationResponse, LedgerError>;

    async fn send_transaction(
        &self,
        envelope: &Envelope,
    ) -> Result<SendTransactionResponse, LedgerError>;

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatusResponse, LedgerError>;
}
