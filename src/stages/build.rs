use crate::errors::{ExecutionError, ExecutionResult, LedgerError, ProcessingError};
use crate::ledger::{parse_fee, AccountReader, Operation, Transaction, TransactionBuilder};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use crate::types::EnvelopeHeader;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct BuildInput {
    pub header: EnvelopeHeader,
    pub operations: Vec<Operation>,
}

/// Loads the source account and builds an unsigned transaction
pub struct BuildStage {
    accounts: Arc<dyn AccountReader>,
    network_passphrase: String,
}

pub type BuildPipeline = ConveyorBelt<BuildStage>;

impl BuildStage {
    pub fn new(accounts: Arc<dyn AccountReader>, network_passphrase: impl Into<String>) -> Self {
        Self {
            accounts,
            network_passphrase: network_passphrase.into(),
        }
    }
}

#[async_trait]
impl BeltProcess for BuildStage {
    type Input = BuildInput;
    type Output = Transaction;

    fn belt_type(&self) -> &str {
        "BuildTransaction"
    }

    #[instrument(skip_all, fields(source = %item.header.source))]
    async fn process(&self, item: BuildInput, _meta: &BeltMetadata) -> ExecutionResult<Transaction> {
        let summary = format!("source={}", item.header.source);
        let fee = parse_fee(&item.header.fee)
            .map_err(|e| ProcessingError::new(e).with_item(summary.clone()))?;

        let account = self
            .accounts
            .load_account(&item.header.source)
            .await
            .map_err(|e| {
                let message = match e {
                    LedgerError::AccountNotFound(_) => "account does not exist".to_string(),
                    other => other.to_string(),
                };
                ProcessingError::new(ExecutionError::account_load(
                    item.header.source.to_string(),
                    message,
                ))
                .with_item(summary.clone())
            })?;

        let tx = TransactionBuilder::new(account, fee, self.network_passphrase.clone())
            .set_timeout(item.header.timeout)
            .add_operations(item.operations)
            .build()
            .map_err(|e| ProcessingError::new(e).with_item(summary))?;

        debug!(sequence = tx.sequence, operations = tx.operations.len(), "Transaction built");
        Ok(tx)
    }
}
