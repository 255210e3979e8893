use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{
    ClassicSubmitter, ContractRpc, Envelope, SendStatus, SendTransactionResponse, SubmitResponse,
};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Submission endpoint, chosen once when a pipeline is configured
#[derive(Clone)]
pub enum SubmitTransport {
    /// Blocks until the ledger accepts or rejects the envelope
    Classic(Arc<dyn ClassicSubmitter>),
    /// Acknowledges receipt; finality has to be polled
    Contract(Arc<dyn ContractRpc>),
}

#[derive(Debug, Clone)]
pub struct SubmitInput {
    pub envelope: Envelope,
}

#[derive(Debug, Clone)]
pub enum SubmitOutput {
    Classic(SubmitResponse),
    Contract(SendTransactionResponse),
}

impl SubmitOutput {
    pub fn hash(&self) -> &str {
        match self {
            SubmitOutput::Classic(response) => &response.hash,
            SubmitOutput::Contract(response) => &response.hash,
        }
    }
}

pub struct SubmitStage {
    transport: SubmitTransport,
}

pub type SubmitPipeline = ConveyorBelt<SubmitStage>;

impl SubmitStage {
    pub fn new(transport: SubmitTransport) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &SubmitTransport {
        &self.transport
    }
}

#[async_trait]
impl BeltProcess for SubmitStage {
    type Input = SubmitInput;
    type Output = SubmitOutput;

    fn belt_type(&self) -> &str {
        "SubmitTransaction"
    }

    #[instrument(skip_all, fields(hash = %item.envelope.hash_hex()))]
    async fn process(&self, item: SubmitInput, _meta: &BeltMetadata) -> ExecutionResult<SubmitOutput> {
        let summary = item.envelope.summary();
        match &self.transport {
            SubmitTransport::Classic(submitter) => {
                let response = submitter.submit(&item.envelope).await.map_err(|e| {
                    ProcessingError::new(ExecutionError::SubmissionTransport(e.to_string()))
                        .with_item(summary.clone())
                })?;
                if !response.successful {
                    warn!(result = %response.result, "Transaction rejected");
                    return Err(ProcessingError::new(ExecutionError::rejected(
                        response.hash,
                        response.result,
                    ))
                    .with_item(summary));
                }
                debug!(ledger = ?response.ledger, "Transaction accepted");
                Ok(SubmitOutput::Classic(response))
            }
            SubmitTransport::Contract(rpc) => {
                let response = rpc.send_transaction(&item.envelope).await.map_err(|e| {
                    ProcessingError::new(ExecutionError::SubmissionTransport(e.to_string()))
                        .with_item(summary.clone())
                })?;
                match response.status {
                    SendStatus::Pending => {
                        debug!("Transaction acknowledged");
                        Ok(SubmitOutput::Contract(response))
                    }
                    SendStatus::Error => Err(ProcessingError::new(ExecutionError::rejected(
                        response.hash,
                        response.error.unwrap_or_else(|| "unknown error".into()),
                    ))
                    .with_item(summary)),
                    status @ (SendStatus::Duplicate | SendStatus::TryAgainLater) => {
                        Err(ProcessingError::new(ExecutionError::SubmissionTransport(format!(
                            "ledger answered {status:?} for {}",
                            response.hash
                        )))
                        .with_item(summary))
                    }
                }
            }
        }
    }
}
