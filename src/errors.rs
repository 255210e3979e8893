//! Error taxonomy for transaction execution
//!
//! `ExecutionError` names what went wrong. `ProcessingError` is what every
//! conveyor belt returns: the kind plus the metadata of the belt that failed
//! and a short summary of the offending item.

use crate::pipeline::BeltMetadata;
use std::fmt;
use thiserror::Error;

/// Failure kinds raised by pipeline stages and the channel pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Failed to load account {account}: {message}")]
    AccountLoad { account: String, message: String },

    #[error("Failed to build envelope: {0}")]
    EnvelopeBuild(String),

    #[error("Failed to determine sign requirements: {0}")]
    SignRequirements(String),

    #[error("No signer provided for required key {public_key}")]
    SignerNotFound { public_key: String },

    #[error("Signer {public_key} could not sign: {message}")]
    Signing { public_key: String, message: String },

    #[error("Submission transport error: {0}")]
    SubmissionTransport(String),

    #[error("Transaction {hash} rejected by the ledger: {result}")]
    SubmissionRejected { hash: String, result: String },

    #[error("Envelope is already a fee-bump envelope")]
    AlreadyFeeBumped,

    #[error("Error building fee bump transaction: {0}")]
    FeeBumpWrap(String),

    #[error("Channel {0} not found among the locked channels")]
    ChannelNotFound(String),

    #[error("Channel {0} is locked and cannot be closed")]
    ChannelInUse(String),

    #[error("Invalid number of channels {requested}: must be between 1 and {max}")]
    InvalidChannelCount { requested: usize, max: usize },

    #[error("Failed to simulate transaction: {0}")]
    Simulation(String),

    #[error("Simulation returned an error: {0}")]
    SimulationFailed(String),

    #[error("Contract state must be restored before this invocation")]
    RestoreRequired,

    #[error("Transaction {hash} failed: {reason}")]
    TransactionFailed { hash: String, reason: String },

    #[error("Transaction {hash} not found after waiting {timeout_secs}s")]
    TransactionNotFound { hash: String, timeout_secs: u64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ExecutionError {
    /// Check if an outer caller may retry the whole execution
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::SubmissionTransport(_)
                | ExecutionError::Simulation(_)
                | ExecutionError::TransactionNotFound { .. }
        )
    }

    /// Short label for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            ExecutionError::AccountLoad { .. } => "account_load",
            ExecutionError::EnvelopeBuild(_) => "envelope_build",
            ExecutionError::SignRequirements(_) => "sign_requirements",
            ExecutionError::SignerNotFound { .. } | ExecutionError::Signing { .. } => "signing",
            ExecutionError::SubmissionTransport(_) => "submission_transport",
            ExecutionError::SubmissionRejected { .. } => "submission_rejected",
            ExecutionError::AlreadyFeeBumped | ExecutionError::FeeBumpWrap(_) => "fee_bump",
            ExecutionError::ChannelNotFound(_)
            | ExecutionError::ChannelInUse(_)
            | ExecutionError::InvalidChannelCount { .. } => "channel_pool",
            ExecutionError::Simulation(_)
            | ExecutionError::SimulationFailed(_)
            | ExecutionError::RestoreRequired => "simulation",
            ExecutionError::TransactionFailed { .. } => "transaction_failed",
            ExecutionError::TransactionNotFound { .. } => "transaction_not_found",
            ExecutionError::InvalidInput(_) => "invalid_input",
        }
    }

    pub fn account_load(account: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::AccountLoad {
            account: account.into(),
            message: message.into(),
        }
    }

    pub fn signer_not_found(public_key: impl Into<String>) -> Self {
        ExecutionError::SignerNotFound {
            public_key: public_key.into(),
        }
    }

    pub fn signing(public_key: impl Into<String>, message: impl Into<String>) -> Self {
        ExecutionError::Signing {
            public_key: public_key.into(),
            message: message.into(),
        }
    }

    pub fn rejected(hash: impl Into<String>, result: impl Into<String>) -> Self {
        ExecutionError::SubmissionRejected {
            hash: hash.into(),
            result: result.into(),
        }
    }

    pub fn transaction_failed(hash: impl Into<String>, reason: impl Into<String>) -> Self {
        ExecutionError::TransactionFailed {
            hash: hash.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by the external ledger collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),
}

/// A failed belt execution with the context needed to trace it back
#[derive(Debug, Clone)]
pub struct ProcessingError {
    pub kind: ExecutionError,
    /// Metadata of the innermost belt that failed
    pub meta: Option<BeltMetadata>,
    /// Short summary of the offending item
    pub item: Option<String>,
}

impl ProcessingError {
    pub fn new(kind: ExecutionError) -> Self {
        Self {
            kind,
            meta: None,
            item: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    /// Attach belt metadata unless an inner belt already did
    pub fn with_meta_if_missing(mut self, meta: &BeltMetadata) -> Self {
        if self.meta.is_none() {
            self.meta = Some(meta.clone());
        }
        self
    }

    pub fn kind(&self) -> &ExecutionError {
        &self.kind
    }

    pub fn belt_type(&self) -> Option<&str> {
        self.meta.as_ref().map(|meta| meta.belt_type.as_str())
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for ProcessingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.meta {
            Some(meta) => write!(f, "[{} {}] {}", meta.belt_type, meta.item_id, self.kind)?,
            None => write!(f, "{}", self.kind)?,
        }
        if let Some(item) = &self.item {
            write!(f, " ({item})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProcessingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

impl From<ExecutionError> for ProcessingError {
    fn from(kind: ExecutionError) -> Self {
        ProcessingError::new(kind)
    }
}

/// Result type for belt executions
pub type ExecutionResult<T> = Result<T, ProcessingError>;
