//! Test Utilities Module
//!
//! Deterministic stand-ins for plugins, signers and the contract RPC.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::errors::{ExecutionResult, LedgerError, ProcessingError};
use crate::ledger::{
    AccountId, ContractRpc, DecoratedSignature, Envelope, SendStatus, SendTransactionResponse,
    SignerError, SignerHandle, SimulationResponse, Transaction, TransactionStatus,
    TransactionStatusResponse,
};
use crate::pipeline::{BeltMetadata, BeltPlugin};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::time::Instant;

/// Counts hook invocations and remembers the metadata it saw
pub struct RecordingPlugin {
    name: String,
    pre_calls: AtomicU32,
    post_calls: AtomicU32,
    error_calls: AtomicU32,
    seen: Mutex<Vec<BeltMetadata>>,
}

impl RecordingPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pre_calls: AtomicU32::new(0),
            post_calls: AtomicU32::new(0),
            error_calls: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn pre_calls(&self) -> u32 {
        self.pre_calls.load(Ordering::SeqCst)
    }

    pub fn post_calls(&self) -> u32 {
        self.post_calls.load(Ordering::SeqCst)
    }

    pub fn error_calls(&self) -> u32 {
        self.error_calls.load(Ordering::SeqCst)
    }

    pub fn seen_metadata(&self) -> Vec<BeltMetadata> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl<I, O> BeltPlugin<I, O> for RecordingPlugin
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn pre_process(&self, item: I, meta: &BeltMetadata) -> ExecutionResult<I> {
        self.pre_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(meta.clone());
        Ok(item)
    }

    async fn post_process(&self, item: O, meta: &BeltMetadata) -> ExecutionResult<O> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(meta.clone());
        Ok(item)
    }

    async fn process_error(&self, error: ProcessingError, meta: &BeltMetadata) -> ProcessingError {
        self.error_calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(meta.clone());
        error
    }
}

/// Signer whose backend is always unavailable
pub struct FailingSigner {
    account_id: AccountId,
}

impl FailingSigner {
    pub fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }
}

#[async_trait]
impl SignerHandle for FailingSigner {
    fn public_key(&self) -> AccountId {
        self.account_id.clone()
    }

    async fn sign(&self, _envelope: &Envelope) -> Result<DecoratedSignature, SignerError> {
        Err(SignerError::Unavailable("hardware signer disconnected".into()))
    }
}

/// Contract RPC answering status queries from a fixed script
///
/// Once the script is exhausted every query reports pending. Each query
/// records the (tokio) instant it arrived so backoff timing can be checked
/// under a paused clock.
pub struct ScriptedRpc {
    statuses: Mutex<VecDeque<TransactionStatus>>,
    polls: Mutex<Vec<Instant>>,
    send_status: Mutex<SendStatus>,
    transport_down: AtomicBool,
}

impl ScriptedRpc {
    pub fn new(statuses: Vec<TransactionStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            polls: Mutex::new(Vec::new()),
            send_status: Mutex::new(SendStatus::Pending),
            transport_down: AtomicBool::new(false),
        }
    }

    pub fn set_send_status(&self, status: SendStatus) {
        *self.send_status.lock() = status;
    }

    pub fn fail_transport(&self, down: bool) {
        self.transport_down.store(down, Ordering::SeqCst);
    }

    pub fn poll_instants(&self) -> Vec<Instant> {
        self.polls.lock().clone()
    }

    fn check_transport(&self) -> Result<(), LedgerError> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(LedgerError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ContractRpc for ScriptedRpc {
    async fn simulate(&self, _transaction: &Transaction) -> Result<SimulationResponse, LedgerError> {
        self.check_transport()?;
        Ok(SimulationResponse {
            min_resource_fee: 0,
            resources: None,
            result: Some("ok".into()),
            error: None,
            restore_required: false,
        })
    }

    async fn send_transaction(
        &self,
        envelope: &Envelope,
    ) -> Result<SendTransactionResponse, LedgerError> {
        self.check_transport()?;
        Ok(SendTransactionResponse {
            hash: envelope.hash_hex(),
            status: *self.send_status.lock(),
            error: None,
        })
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatusResponse, LedgerError> {
        self.check_transport()?;
        self.polls.lock().push(Instant::now());
        let status = self
            .statuses
            .lock()
            .pop_front()
            .unwrap_or(TransactionStatus::Pending);
        Ok(TransactionStatusResponse {
            hash: hash.to_string(),
            status,
            result: matches!(status, TransactionStatus::Success | TransactionStatus::Failed)
                .then(|| format!("{status:?}")),
            ledger: None,
        })
    }
}
