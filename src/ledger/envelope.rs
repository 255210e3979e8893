//! Envelope data model and builder
//!
//! Envelopes are plain serde structs. The hash every signature covers is a
//! SHA-256 over the network passphrase digest and a length-prefixed
//! encoding of the envelope body without its signatures.

use super::{AccountId, AccountSnapshot};
use crate::errors::ExecutionError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum operations per envelope
pub const MAX_OPERATIONS: usize = 100;

/// Signature weight an operation demands from its source account
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Threshold {
    Low = 1,
    Medium = 2,
    High = 3,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    Payment {
        source: Option<AccountId>,
        destination: AccountId,
        amount: u64,
    },
    CreateAccount {
        source: Option<AccountId>,
        destination: AccountId,
        starting_balance: u64,
    },
    BeginSponsoring {
        source: Option<AccountId>,
        sponsored: AccountId,
    },
    EndSponsoring {
        source: Option<AccountId>,
    },
    AccountMerge {
        source: Option<AccountId>,
        destination: AccountId,
    },
    BumpSequence {
        source: Option<AccountId>,
        bump_to: i64,
    },
    InvokeContract {
        source: Option<AccountId>,
        contract_id: String,
        function: String,
        args: Vec<String>,
    },
}

impl Operation {
    pub fn payment(destination: AccountId, amount: u64) -> Self {
        Operation::Payment {
            source: None,
            destination,
            amount,
        }
    }

    pub fn invoke_contract(
        contract_id: impl Into<String>,
        function: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Operation::InvokeContract {
            source: None,
            contract_id: contract_id.into(),
            function: function.into(),
            args,
        }
    }

    /// Explicit source, if the operation overrides the envelope source
    pub fn source(&self) -> Option<&AccountId> {
        match self {
            Operation::Payment { source, .. }
            | Operation::CreateAccount { source, .. }
            | Operation::BeginSponsoring { source, .. }
            | Operation::EndSponsoring { source }
            | Operation::AccountMerge { source, .. }
            | Operation::BumpSequence { source, .. }
            | Operation::InvokeContract { source, .. } => source.as_ref(),
        }
    }

    pub fn with_source(mut self, account: AccountId) -> Self {
        match &mut self {
            Operation::Payment { source, .. }
            | Operation::CreateAccount { source, .. }
            | Operation::BeginSponsoring { source, .. }
            | Operation::EndSponsoring { source }
            | Operation::AccountMerge { source, .. }
            | Operation::BumpSequence { source, .. }
            | Operation::InvokeContract { source, .. } => *source = Some(account),
        }
        self
    }

    pub fn threshold(&self) -> Threshold {
        match self {
            Operation::BumpSequence { .. } => Threshold::Low,
            Operation::AccountMerge { .. } => Threshold::High,
            _ => Threshold::Medium,
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            Operation::Payment {
                source,
                destination,
                amount,
            } => {
                hasher.update([0u8]);
                feed_source(hasher, source);
                feed_str(hasher, destination.as_str());
                hasher.update(amount.to_be_bytes());
            }
            Operation::CreateAccount {
                source,
                destination,
                starting_balance,
            } => {
                hasher.update([1u8]);
                feed_source(hasher, source);
                feed_str(hasher, destination.as_str());
                hasher.update(starting_balance.to_be_bytes());
            }
            Operation::BeginSponsoring { source, sponsored } => {
                hasher.update([2u8]);
                feed_source(hasher, source);
                feed_str(hasher, sponsored.as_str());
            }
            Operation::EndSponsoring { source } => {
                hasher.update([3u8]);
                feed_source(hasher, source);
            }
            Operation::AccountMerge {
                source,
                destination,
            } => {
                hasher.update([4u8]);
                feed_source(hasher, source);
                feed_str(hasher, destination.as_str());
            }
            Operation::BumpSequence { source, bump_to } => {
                hasher.update([5u8]);
                feed_source(hasher, source);
                hasher.update(bump_to.to_be_bytes());
            }
            Operation::InvokeContract {
                source,
                contract_id,
                function,
                args,
            } => {
                hasher.update([6u8]);
                feed_source(hasher, source);
                feed_str(hasher, contract_id);
                feed_str(hasher, function);
                hasher.update((args.len() as u64).to_be_bytes());
                for arg in args {
                    feed_str(hasher, arg);
                }
            }
        }
    }
}

/// Validity window in unix seconds; zero means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub min_time: i64,
    pub max_time: i64,
}

/// Ledger entries and budget a contract invocation needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFootprint {
    pub read_only: Vec<String>,
    pub read_write: Vec<String>,
    pub instructions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoratedSignature {
    pub public_key: AccountId,
    /// Base64 encoded signature bytes
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub network_passphrase: String,
    pub source: AccountId,
    /// Total fee bid in stroops
    pub fee: u64,
    pub sequence: i64,
    pub time_bounds: Option<TimeBounds>,
    pub operations: Vec<Operation>,
    pub resources: Option<ResourceFootprint>,
    pub signatures: Vec<DecoratedSignature>,
}

impl Transaction {
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = network_hasher(&self.network_passphrase, b"tx");
        feed_str(&mut hasher, self.source.as_str());
        hasher.update(self.fee.to_be_bytes());
        hasher.update(self.sequence.to_be_bytes());
        match &self.time_bounds {
            Some(bounds) => {
                hasher.update([1u8]);
                hasher.update(bounds.min_time.to_be_bytes());
                hasher.update(bounds.max_time.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update((self.operations.len() as u64).to_be_bytes());
        for operation in &self.operations {
            operation.feed(&mut hasher);
        }
        match &self.resources {
            Some(resources) => {
                hasher.update([1u8]);
                feed_list(&mut hasher, &resources.read_only);
                feed_list(&mut hasher, &resources.read_write);
                hasher.update(resources.instructions.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.finalize().into()
    }
}

/// Outer envelope paying the fee for an inner transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBumpTransaction {
    pub network_passphrase: String,
    pub fee_source: AccountId,
    pub fee: u64,
    pub inner: Transaction,
    pub signatures: Vec<DecoratedSignature>,
}

impl FeeBumpTransaction {
    pub fn new(fee_source: AccountId, fee: u64, inner: Transaction) -> Self {
        Self {
            network_passphrase: inner.network_passphrase.clone(),
            fee_source,
            fee,
            inner,
            signatures: Vec::new(),
        }
    }

    /// Covers the inner envelope including its signatures
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = network_hasher(&self.network_passphrase, b"fee_bump");
        feed_str(&mut hasher, self.fee_source.as_str());
        hasher.update(self.fee.to_be_bytes());
        hasher.update(self.inner.hash());
        hasher.update((self.inner.signatures.len() as u64).to_be_bytes());
        for signature in &self.inner.signatures {
            feed_str(&mut hasher, signature.public_key.as_str());
            feed_str(&mut hasher, &signature.signature);
        }
        hasher.finalize().into()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Transaction(Transaction),
    FeeBump(FeeBumpTransaction),
}

impl Envelope {
    pub fn hash(&self) -> [u8; 32] {
        match self {
            Envelope::Transaction(tx) => tx.hash(),
            Envelope::FeeBump(fee_bump) => fee_bump.hash(),
        }
    }

    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    pub fn is_fee_bump(&self) -> bool {
        matches!(self, Envelope::FeeBump(_))
    }

    /// Account paying the fee
    pub fn source(&self) -> &AccountId {
        match self {
            Envelope::Transaction(tx) => &tx.source,
            Envelope::FeeBump(fee_bump) => &fee_bump.fee_source,
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            Envelope::Transaction(tx) => tx.fee,
            Envelope::FeeBump(fee_bump) => fee_bump.fee,
        }
    }

    /// The transaction carrying the operations
    pub fn transaction(&self) -> &Transaction {
        match self {
            Envelope::Transaction(tx) => tx,
            Envelope::FeeBump(fee_bump) => &fee_bump.inner,
        }
    }

    pub fn network_passphrase(&self) -> &str {
        match self {
            Envelope::Transaction(tx) => &tx.network_passphrase,
            Envelope::FeeBump(fee_bump) => &fee_bump.network_passphrase,
        }
    }

    /// Expiry in unix seconds, from the inner transaction for fee bumps
    pub fn max_time(&self) -> Option<i64> {
        self.transaction()
            .time_bounds
            .map(|bounds| bounds.max_time)
            .filter(|max_time| *max_time > 0)
    }

    pub fn signatures(&self) -> &[DecoratedSignature] {
        match self {
            Envelope::Transaction(tx) => &tx.signatures,
            Envelope::FeeBump(fee_bump) => &fee_bump.signatures,
        }
    }

    /// Add a signature, replacing any earlier one from the same key
    pub fn add_signature(&mut self, signature: DecoratedSignature) {
        let signatures = match self {
            Envelope::Transaction(tx) => &mut tx.signatures,
            Envelope::FeeBump(fee_bump) => &mut fee_bump.signatures,
        };
        signatures.retain(|existing| existing.public_key != signature.public_key);
        signatures.push(signature);
    }

    /// Short description for error context
    pub fn summary(&self) -> String {
        format!("source={} hash={}", self.source(), self.hash_hex())
    }
}

impl From<Transaction> for Envelope {
    fn from(tx: Transaction) -> Self {
        Envelope::Transaction(tx)
    }
}

/// Parse a numeric fee string
pub fn parse_fee(fee: &str) -> Result<u64, ExecutionError> {
    fee.trim()
        .parse::<u64>()
        .map_err(|_| ExecutionError::EnvelopeBuild(format!("invalid fee '{fee}'")))
}

/// Builds an unsigned transaction from an account snapshot
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    source: AccountSnapshot,
    fee: u64,
    network_passphrase: String,
    timeout_secs: u64,
    operations: Vec<Operation>,
    resources: Option<ResourceFootprint>,
}

impl TransactionBuilder {
    pub fn new(source: AccountSnapshot, fee: u64, network_passphrase: impl Into<String>) -> Self {
        Self {
            source,
            fee,
            network_passphrase: network_passphrase.into(),
            timeout_secs: 0,
            operations: Vec::new(),
            resources: None,
        }
    }

    /// Seconds from now until the envelope expires; zero leaves it unbounded
    pub fn set_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn add_operation(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn add_operations(mut self, operations: impl IntoIterator<Item = Operation>) -> Self {
        self.operations.extend(operations);
        self
    }

    pub fn set_resources(mut self, resources: ResourceFootprint) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn source(&self) -> &AccountSnapshot {
        &self.source
    }

    pub fn build(self) -> Result<Transaction, ExecutionError> {
        if self.operations.is_empty() {
            return Err(ExecutionError::EnvelopeBuild(
                "transaction requires at least one operation".into(),
            ));
        }
        if self.operations.len() > MAX_OPERATIONS {
            return Err(ExecutionError::EnvelopeBuild(format!(
                "transaction has {} operations, maximum is {}",
                self.operations.len(),
                MAX_OPERATIONS
            )));
        }
        if self.fee == 0 {
            return Err(ExecutionError::EnvelopeBuild("fee must be positive".into()));
        }
        let sequence = self.source.sequence.checked_add(1).ok_or_else(|| {
            ExecutionError::EnvelopeBuild(format!(
                "sequence number of {} is exhausted",
                self.source.id
            ))
        })?;

        let time_bounds = match self.timeout_secs {
            0 => None,
            timeout => {
                let max_time = i64::try_from(timeout)
                    .ok()
                    .and_then(|timeout| chrono::Utc::now().timestamp().checked_add(timeout))
                    .ok_or_else(|| {
                        ExecutionError::EnvelopeBuild(format!("timeout of {timeout}s is out of range"))
                    })?;
                Some(TimeBounds {
                    min_time: 0,
                    max_time,
                })
            }
        };

        Ok(Transaction {
            network_passphrase: self.network_passphrase,
            source: self.source.id,
            fee: self.fee,
            sequence,
            time_bounds,
            operations: self.operations,
            resources: self.resources,
            signatures: Vec::new(),
        })
    }
}

fn network_hasher(passphrase: &str, tag: &[u8]) -> Sha256 {
    let mut hasher = Sha256::new();
    hasher.update(Sha256::digest(passphrase.as_bytes()));
    hasher.update(tag);
    hasher
}

fn feed_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}

fn feed_source(hasher: &mut Sha256, source: &Option<AccountId>) {
    match source {
        Some(account) => {
            hasher.update([1u8]);
            feed_str(hasher, account.as_str());
        }
        None => hasher.update([0u8]),
    }
}

fn feed_list(hasher: &mut Sha256, values: &[String]) {
    hasher.update((values.len() as u64).to_be_bytes());
    for value in values {
        feed_str(hasher, value);
    }
}
