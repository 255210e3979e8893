//! In-process ledger
//!
//! Implements the account reader, synchronous submitter and contract RPC
//! against a map of accounts. Envelopes are validated the way a real ledger
//! would: network, expiry, signatures, sequence number and fee balance.
//! Operations apply atomically; a failing operation leaves balances
//! untouched but still consumes the fee and the sequence number.

use super::signer::verify_signature;
use super::{
    AccountId, AccountReader, AccountSnapshot, ClassicSubmitter, ContractRpc, Envelope, Operation,
    ResourceFootprint, SendStatus, SendTransactionResponse, SimulationResponse, SubmitResponse,
    Transaction, TransactionStatus, TransactionStatusResponse,
};
use crate::errors::LedgerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Resource fee charged per contract invocation in a simulation
const RESOURCE_FEE_PER_INVOCATION: u64 = 100;

#[derive(Debug, Clone)]
struct LedgerAccount {
    balance: u64,
    sequence: i64,
    sponsor: Option<AccountId>,
}

#[derive(Debug)]
struct ContractRecord {
    response: TransactionStatusResponse,
    pending_polls: u32,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountId, LedgerAccount>,
    contract_transactions: HashMap<String, ContractRecord>,
    ledger_sequence: u32,
    pending_polls: u32,
    restore_required: bool,
    submissions: usize,
}

enum Outcome {
    /// Never made it into a ledger
    Rejected(&'static str),
    Applied {
        successful: bool,
        result: String,
        ledger: u32,
    },
}

pub struct InMemoryLedger {
    network_passphrase: String,
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new(network_passphrase: impl Into<String>) -> Self {
        Self {
            network_passphrase: network_passphrase.into(),
            state: Mutex::new(LedgerState {
                ledger_sequence: 1,
                ..LedgerState::default()
            }),
        }
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }

    /// Create the account if missing and credit it
    pub fn fund(&self, id: &AccountId, amount: u64) {
        let mut state = self.state.lock();
        let sequence = starting_sequence(state.ledger_sequence);
        let account = state
            .accounts
            .entry(id.clone())
            .or_insert_with(|| LedgerAccount {
                balance: 0,
                sequence,
                sponsor: None,
            });
        account.balance += amount;
    }

    pub fn balance(&self, id: &AccountId) -> Option<u64> {
        self.state.lock().accounts.get(id).map(|account| account.balance)
    }

    pub fn sequence(&self, id: &AccountId) -> Option<i64> {
        self.state.lock().accounts.get(id).map(|account| account.sequence)
    }

    pub fn exists(&self, id: &AccountId) -> bool {
        self.state.lock().accounts.contains_key(id)
    }

    pub fn sponsor_of(&self, id: &AccountId) -> Option<AccountId> {
        self.state
            .lock()
            .accounts
            .get(id)
            .and_then(|account| account.sponsor.clone())
    }

    /// Number of status queries answered with pending before a contract
    /// transaction reports its final status
    pub fn set_pending_polls(&self, polls: u32) {
        self.state.lock().pending_polls = polls;
    }

    pub fn set_restore_required(&self, required: bool) {
        self.state.lock().restore_required = required;
    }

    /// Envelopes received by either submission endpoint
    pub fn submission_count(&self) -> usize {
        self.state.lock().submissions
    }

    fn apply(&self, state: &mut LedgerState, envelope: &Envelope) -> Outcome {
        state.submissions += 1;

        if envelope.network_passphrase() != self.network_passphrase {
            return Outcome::Rejected("tx_bad_network");
        }
        if let Envelope::FeeBump(fee_bump) = envelope {
            if fee_bump.fee < fee_bump.inner.fee {
                return Outcome::Rejected("tx_insufficient_fee");
            }
        }
        if let Some(max_time) = envelope.max_time() {
            if chrono::Utc::now().timestamp() > max_time {
                return Outcome::Rejected("tx_too_late");
            }
        }
        if !is_authorized(envelope) {
            return Outcome::Rejected("tx_bad_auth");
        }

        let tx = envelope.transaction();
        match state.accounts.get(&tx.source) {
            None => return Outcome::Rejected("tx_no_source_account"),
            Some(account) if tx.sequence != account.sequence + 1 => {
                return Outcome::Rejected("tx_bad_seq")
            }
            Some(_) => {}
        }
        match state.accounts.get(envelope.source()) {
            Some(account) if account.balance >= envelope.fee() => {}
            _ => return Outcome::Rejected("tx_insufficient_balance"),
        }

        // Fee and sequence are consumed even if an operation fails
        state.ledger_sequence += 1;
        let ledger = state.ledger_sequence;
        if let Some(account) = state.accounts.get_mut(envelope.source()) {
            account.balance -= envelope.fee();
        }
        if let Some(account) = state.accounts.get_mut(&tx.source) {
            account.sequence = tx.sequence;
        }

        let mut working = state.accounts.clone();
        match apply_operations(&mut working, tx, ledger) {
            Ok(()) => {
                state.accounts = working;
                Outcome::Applied {
                    successful: true,
                    result: "tx_success".into(),
                    ledger,
                }
            }
            Err(code) => {
                debug!(hash = %envelope.hash_hex(), code, "Operation failed");
                Outcome::Applied {
                    successful: false,
                    result: format!("tx_failed: {code}"),
                    ledger,
                }
            }
        }
    }
}

#[async_trait]
impl AccountReader for InMemoryLedger {
    async fn load_account(&self, id: &AccountId) -> Result<AccountSnapshot, LedgerError> {
        let state = self.state.lock();
        let account = state
            .accounts
            .get(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))?;
        Ok(AccountSnapshot {
            id: id.clone(),
            sequence: account.sequence,
            balance: account.balance,
        })
    }
}

#[async_trait]
impl ClassicSubmitter for InMemoryLedger {
    async fn submit(&self, envelope: &Envelope) -> Result<SubmitResponse, LedgerError> {
        let hash = envelope.hash_hex();
        let mut state = self.state.lock();
        let response = match self.apply(&mut state, envelope) {
            Outcome::Rejected(code) => SubmitResponse {
                successful: false,
                hash,
                result: code.to_string(),
                ledger: None,
            },
            Outcome::Applied {
                successful,
                result,
                ledger,
            } => SubmitResponse {
                successful,
                hash,
                result,
                ledger: Some(ledger),
            },
        };
        Ok(response)
    }
}

#[async_trait]
impl ContractRpc for InMemoryLedger {
    async fn simulate(&self, transaction: &Transaction) -> Result<SimulationResponse, LedgerError> {
        let contracts: Vec<String> = transaction
            .operations
            .iter()
            .filter_map(|operation| match operation {
                Operation::InvokeContract { contract_id, .. } => Some(contract_id.clone()),
                _ => None,
            })
            .collect();

        if contracts.is_empty() {
            return Ok(SimulationResponse {
                min_resource_fee: 0,
                resources: None,
                result: None,
                error: Some("transaction contains no contract invocation".into()),
                restore_required: false,
            });
        }

        let restore_required = self.state.lock().restore_required;
        let invocations = contracts.len() as u64;
        Ok(SimulationResponse {
            min_resource_fee: RESOURCE_FEE_PER_INVOCATION * invocations,
            resources: Some(ResourceFootprint {
                read_only: Vec::new(),
                read_write: contracts,
                instructions: 1_000_000 * invocations,
            }),
            result: Some("ok".into()),
            error: None,
            restore_required,
        })
    }

    async fn send_transaction(
        &self,
        envelope: &Envelope,
    ) -> Result<SendTransactionResponse, LedgerError> {
        let hash = envelope.hash_hex();
        let mut state = self.state.lock();
        match self.apply(&mut state, envelope) {
            Outcome::Rejected(code) => Ok(SendTransactionResponse {
                hash,
                status: SendStatus::Error,
                error: Some(code.to_string()),
            }),
            Outcome::Applied {
                successful,
                result,
                ledger,
            } => {
                let status = if successful {
                    TransactionStatus::Success
                } else {
                    TransactionStatus::Failed
                };
                let pending_polls = state.pending_polls;
                state.contract_transactions.insert(
                    hash.clone(),
                    ContractRecord {
                        response: TransactionStatusResponse {
                            hash: hash.clone(),
                            status,
                            result: Some(result),
                            ledger: Some(ledger),
                        },
                        pending_polls,
                    },
                );
                Ok(SendTransactionResponse {
                    hash,
                    status: SendStatus::Pending,
                    error: None,
                })
            }
        }
    }

    async fn get_transaction(&self, hash: &str) -> Result<TransactionStatusResponse, LedgerError> {
        let mut state = self.state.lock();
        let Some(record) = state.contract_transactions.get_mut(hash) else {
            return Ok(TransactionStatusResponse {
                hash: hash.to_string(),
                status: TransactionStatus::NotFound,
                result: None,
                ledger: None,
            });
        };
        if record.pending_polls > 0 {
            record.pending_polls -= 1;
            return Ok(TransactionStatusResponse {
                hash: hash.to_string(),
                status: TransactionStatus::Pending,
                result: None,
                ledger: None,
            });
        }
        Ok(record.response.clone())
    }
}

fn starting_sequence(ledger_sequence: u32) -> i64 {
    (ledger_sequence as i64) << 32
}

/// Keys that must have signed the envelope itself
fn required_keys(envelope: &Envelope) -> BTreeSet<&AccountId> {
    match envelope {
        Envelope::FeeBump(fee_bump) => BTreeSet::from([&fee_bump.fee_source]),
        Envelope::Transaction(tx) => std::iter::once(&tx.source)
            .chain(tx.operations.iter().filter_map(Operation::source))
            .collect(),
    }
}

fn is_authorized(envelope: &Envelope) -> bool {
    let hash = envelope.hash();
    let signed = required_keys(envelope).into_iter().all(|key| {
        envelope
            .signatures()
            .iter()
            .any(|signature| &signature.public_key == key && verify_signature(&hash, signature))
    });

    match envelope {
        Envelope::FeeBump(fee_bump) => {
            signed && is_authorized(&Envelope::Transaction(fee_bump.inner.clone()))
        }
        Envelope::Transaction(_) => signed,
    }
}

fn debit(
    accounts: &mut HashMap<AccountId, LedgerAccount>,
    id: &AccountId,
    amount: u64,
) -> Result<(), &'static str> {
    let account = accounts.get_mut(id).ok_or("op_no_account")?;
    if account.balance < amount {
        return Err("op_underfunded");
    }
    account.balance -= amount;
    Ok(())
}

fn credit(
    accounts: &mut HashMap<AccountId, LedgerAccount>,
    id: &AccountId,
    amount: u64,
) -> Result<(), &'static str> {
    let account = accounts.get_mut(id).ok_or("op_no_destination")?;
    account.balance = account.balance.checked_add(amount).ok_or("op_line_full")?;
    Ok(())
}

fn apply_operations(
    accounts: &mut HashMap<AccountId, LedgerAccount>,
    tx: &Transaction,
    ledger: u32,
) -> Result<(), &'static str> {
    // sponsored account -> sponsor
    let mut sponsoring: HashMap<AccountId, AccountId> = HashMap::new();

    for operation in &tx.operations {
        let source = operation.source().unwrap_or(&tx.source).clone();
        match operation {
            Operation::Payment {
                destination,
                amount,
                ..
            } => {
                if !accounts.contains_key(destination) {
                    return Err("op_no_destination");
                }
                debit(accounts, &source, *amount)?;
                credit(accounts, destination, *amount)?;
            }
            Operation::CreateAccount {
                destination,
                starting_balance,
                ..
            } => {
                if accounts.contains_key(destination) {
                    return Err("op_already_exists");
                }
                debit(accounts, &source, *starting_balance)?;
                accounts.insert(
                    destination.clone(),
                    LedgerAccount {
                        balance: *starting_balance,
                        sequence: starting_sequence(ledger),
                        sponsor: sponsoring.get(destination).cloned(),
                    },
                );
            }
            Operation::BeginSponsoring { sponsored, .. } => {
                if sponsoring.contains_key(sponsored) {
                    return Err("op_already_sponsored");
                }
                sponsoring.insert(sponsored.clone(), source);
            }
            Operation::EndSponsoring { .. } => {
                if sponsoring.remove(&source).is_none() {
                    return Err("op_not_sponsored");
                }
            }
            Operation::AccountMerge { destination, .. } => {
                if &source == destination {
                    return Err("op_malformed");
                }
                if !accounts.contains_key(destination) {
                    return Err("op_no_account");
                }
                let merged = accounts.remove(&source).ok_or("op_no_account")?;
                credit(accounts, destination, merged.balance)?;
            }
            Operation::BumpSequence { bump_to, .. } => {
                let account = accounts.get_mut(&source).ok_or("op_no_account")?;
                account.sequence = account.sequence.max(*bump_to);
            }
            // Contract execution itself happens outside this ledger model
            Operation::InvokeContract { .. } => {}
        }
    }

    if !sponsoring.is_empty() {
        return Err("tx_bad_sponsorship");
    }
    Ok(())
}
