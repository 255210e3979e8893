//! Finality poller for asynchronously processed submissions
//!
//! Queries the transaction status until it is terminal or the deadline
//! passes. The deadline comes from the envelope expiry when available,
//! otherwise from the configured default. Sleeps start at
//! `initial_wait_ms`, double after every query, and never exceed the time
//! left before the deadline (with a one second floor).

use crate::config::FinalityConfig;
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{ContractRpc, Envelope, TransactionStatus, TransactionStatusResponse};
use crate::metrics::metrics;
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, instrument};

const MIN_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct FinalityInput {
    pub hash: String,
    /// The submitted envelope, used to derive the deadline
    pub envelope: Option<Envelope>,
}

pub struct FinalityStage {
    rpc: Arc<dyn ContractRpc>,
    config: FinalityConfig,
}

pub type FinalityPipeline = ConveyorBelt<FinalityStage>;

impl FinalityStage {
    pub fn new(rpc: Arc<dyn ContractRpc>, config: FinalityConfig) -> Self {
        Self { rpc, config }
    }

    /// Seconds to keep polling for the given envelope
    pub fn seconds_to_wait(&self, envelope: Option<&Envelope>) -> u64 {
        if self.config.use_envelope_timeout {
            if let Some(max_time) = envelope.and_then(Envelope::max_time) {
                let remaining = max_time - chrono::Utc::now().timestamp();
                if remaining > 0 {
                    return remaining as u64;
                }
            }
        }
        self.config.default_seconds_to_wait
    }

    async fn query(&self, hash: &str) -> ExecutionResult<TransactionStatusResponse> {
        metrics().finality_polls.inc();
        self.rpc.get_transaction(hash).await.map_err(|e| {
            ProcessingError::new(ExecutionError::SubmissionTransport(e.to_string()))
                .with_item(format!("hash={hash}"))
        })
    }
}

#[async_trait]
impl BeltProcess for FinalityStage {
    type Input = FinalityInput;
    type Output = TransactionStatusResponse;

    fn belt_type(&self) -> &str {
        "TransactionFinality"
    }

    #[instrument(skip_all, fields(hash = %item.hash))]
    async fn process(
        &self,
        item: FinalityInput,
        _meta: &BeltMetadata,
    ) -> ExecutionResult<TransactionStatusResponse> {
        let seconds_to_wait = self.seconds_to_wait(item.envelope.as_ref());
        let started = Instant::now();
        let deadline = started + Duration::from_secs(seconds_to_wait);
        let mut wait = self.config.initial_wait();

        let mut response = self.query(&item.hash).await?;
        while response.status.is_pending() && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let nap = wait.min(remaining.max(MIN_SLEEP));
            debug!(wait_ms = nap.as_millis() as u64, status = ?response.status, "Transaction not final yet");

            sleep(nap).await;
            response = self.query(&item.hash).await?;
            wait = wait.saturating_mul(2);
        }

        metrics()
            .finality_wait
            .observe(started.elapsed().as_secs_f64());

        match response.status {
            TransactionStatus::Success => Ok(response),
            TransactionStatus::Failed => Err(ProcessingError::new(
                ExecutionError::transaction_failed(
                    item.hash.clone(),
                    response.result.unwrap_or_else(|| "unknown".into()),
                ),
            )
            .with_item(format!("hash={}", item.hash))),
            TransactionStatus::Pending | TransactionStatus::NotFound => {
                Err(ProcessingError::new(ExecutionError::TransactionNotFound {
                    hash: item.hash.clone(),
                    timeout_secs: seconds_to_wait,
                })
                .with_item(format!("hash={}", item.hash)))
            }
        }
    }
}
