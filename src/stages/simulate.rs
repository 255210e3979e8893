use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{ContractRpc, SimulationResponse, Transaction};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SimulatedTransaction {
    pub transaction: Transaction,
    pub simulation: SimulationResponse,
}

/// Dry-runs a contract transaction to learn its footprint and resource fee
pub struct SimulateStage {
    rpc: Arc<dyn ContractRpc>,
}

pub type SimulatePipeline = ConveyorBelt<SimulateStage>;

impl SimulateStage {
    pub fn new(rpc: Arc<dyn ContractRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl BeltProcess for SimulateStage {
    type Input = Transaction;
    type Output = SimulatedTransaction;

    fn belt_type(&self) -> &str {
        "SimulateTransaction"
    }

    async fn process(
        &self,
        item: Transaction,
        _meta: &BeltMetadata,
    ) -> ExecutionResult<SimulatedTransaction> {
        let summary = format!("source={} hash={}", item.source, hex::encode(item.hash()));
        let fail = |kind: ExecutionError| ProcessingError::new(kind).with_item(summary.clone());

        let simulation = self
            .rpc
            .simulate(&item)
            .await
            .map_err(|e| fail(ExecutionError::Simulation(e.to_string())))?;

        if let Some(error) = &simulation.error {
            return Err(fail(ExecutionError::SimulationFailed(error.clone())));
        }
        if simulation.restore_required {
            return Err(fail(ExecutionError::RestoreRequired));
        }
        if simulation.result.is_none() {
            return Err(fail(ExecutionError::Simulation(
                "simulation returned no result".into(),
            )));
        }

        debug!(min_resource_fee = simulation.min_resource_fee, "Transaction simulated");
        Ok(SimulatedTransaction {
            transaction: item,
            simulation,
        })
    }
}

/// Apply the simulated footprint and add the resource fee to the bid
pub fn assemble(simulated: SimulatedTransaction) -> Transaction {
    let SimulatedTransaction {
        mut transaction,
        simulation,
    } = simulated;
    transaction.fee = transaction.fee.saturating_add(simulation.min_resource_fee);
    if let Some(resources) = simulation.resources {
        transaction.resources = Some(resources);
    }
    transaction
}
