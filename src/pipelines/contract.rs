use super::{CarriesInvocation, StagePlugins, SubmitBelts, TransactionPlugin};
use crate::config::FinalityConfig;
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{
    AccountReader, ContractRpc, Envelope, Operation, SimulationResponse, TransactionStatusResponse,
};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use crate::stages::{
    assemble, BuildInput, BuildPipeline, BuildStage, FinalityInput, FinalityPipeline,
    FinalityStage, SignInput, SignPipeline, SignRequirementsPipeline, SignRequirementsStage,
    SignStage, SimulatePipeline, SimulateStage, SubmitOutput, SubmitTransport,
};
use crate::types::TransactionInvocation;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct ContractOptions {
    /// Stop after simulation and return its payload
    pub simulate_only: bool,
}

#[derive(Debug, Clone)]
pub struct ContractInput {
    pub invocation: TransactionInvocation,
    pub operations: Vec<Operation>,
    pub options: ContractOptions,
}

impl ContractInput {
    pub fn new(invocation: TransactionInvocation, operations: Vec<Operation>) -> Self {
        Self {
            invocation,
            operations,
            options: ContractOptions::default(),
        }
    }

    pub fn simulate_only(mut self) -> Self {
        self.options.simulate_only = true;
        self
    }
}

impl CarriesInvocation for ContractInput {
    fn invocation(&self) -> &TransactionInvocation {
        &self.invocation
    }

    fn invocation_mut(&mut self) -> &mut TransactionInvocation {
        &mut self.invocation
    }
}

#[derive(Debug, Clone)]
pub enum ContractOutput {
    Simulated(SimulationResponse),
    Executed {
        hash: String,
        response: TransactionStatusResponse,
    },
}

impl ContractOutput {
    pub fn hash(&self) -> Option<&str> {
        match self {
            ContractOutput::Simulated(_) => None,
            ContractOutput::Executed { hash, .. } => Some(hash),
        }
    }
}

pub type ContractPlugin = TransactionPlugin<ContractInput, ContractOutput>;

/// Process step of the asynchronous composition
pub struct ContractProcess {
    build: BuildPipeline,
    simulate: SimulatePipeline,
    requirements: SignRequirementsPipeline,
    sign: SignPipeline,
    submit: SubmitBelts,
    finality: FinalityPipeline,
}

#[async_trait]
impl BeltProcess for ContractProcess {
    type Input = ContractInput;
    type Output = ContractOutput;

    fn belt_type(&self) -> &str {
        "ContractTransactionPipeline"
    }

    async fn process(
        &self,
        item: ContractInput,
        meta: &BeltMetadata,
    ) -> ExecutionResult<ContractOutput> {
        let ContractInput {
            invocation,
            operations,
            options,
        } = item;
        let item_id = meta.item_id;

        let tx = self
            .build
            .execute_with_item_id(
                BuildInput {
                    header: invocation.header.clone(),
                    operations,
                },
                item_id,
            )
            .await?;

        let simulated = self.simulate.execute_with_item_id(tx, item_id).await?;
        if options.simulate_only {
            debug!("Returning simulation only");
            return Ok(ContractOutput::Simulated(simulated.simulation));
        }
        let envelope = Envelope::Transaction(assemble(simulated));

        let requirements = self
            .requirements
            .execute_with_item_id(envelope.clone(), item_id)
            .await?;

        let signed = self
            .sign
            .execute_with_item_id(
                SignInput {
                    envelope,
                    requirements,
                    signers: invocation.signers.clone(),
                },
                item_id,
            )
            .await?;

        let acknowledgement = match self
            .submit
            .execute(signed.clone(), invocation.fee_bump.as_ref(), item_id)
            .await?
        {
            SubmitOutput::Contract(response) => response,
            SubmitOutput::Classic(response) => {
                return Err(ProcessingError::new(ExecutionError::InvalidInput(format!(
                    "contract pipeline received a synchronous result for {}",
                    response.hash
                ))))
            }
        };

        let response = self
            .finality
            .execute_with_item_id(
                FinalityInput {
                    hash: acknowledgement.hash.clone(),
                    envelope: Some(signed),
                },
                item_id,
            )
            .await?;

        Ok(ContractOutput::Executed {
            hash: acknowledgement.hash,
            response,
        })
    }
}

/// Asynchronous composition: build, simulate, sign requirements, sign,
/// submit, then poll until the transaction is final
pub struct ContractTransactionPipeline {
    belt: ConveyorBelt<ContractProcess>,
}

impl ContractTransactionPipeline {
    pub fn new(
        accounts: Arc<dyn AccountReader>,
        rpc: Arc<dyn ContractRpc>,
        network_passphrase: impl Into<String>,
        finality: FinalityConfig,
        plugins: Vec<ContractPlugin>,
    ) -> Self {
        let plugins = StagePlugins::split(plugins);

        let process = ContractProcess {
            build: ConveyorBelt::new(BuildStage::new(accounts, network_passphrase), plugins.build),
            simulate: ConveyorBelt::new(SimulateStage::new(rpc.clone()), plugins.simulate),
            requirements: ConveyorBelt::new(SignRequirementsStage, plugins.sign_requirements),
            sign: ConveyorBelt::new(SignStage, plugins.sign),
            submit: SubmitBelts::new(SubmitTransport::Contract(rpc.clone()), plugins.submit),
            finality: ConveyorBelt::new(FinalityStage::new(rpc, finality), plugins.finality),
        };

        Self {
            belt: ConveyorBelt::new(process, plugins.pipeline),
        }
    }

    #[instrument(skip_all, fields(source = %input.invocation.header.source))]
    pub async fn execute(&self, input: ContractInput) -> ExecutionResult<ContractOutput> {
        self.execute_with_item_id(input, Uuid::new_v4()).await
    }

    pub async fn execute_with_item_id(
        &self,
        input: ContractInput,
        item_id: Uuid,
    ) -> ExecutionResult<ContractOutput> {
        let output = self.belt.execute_with_item_id(input, item_id).await?;
        if let ContractOutput::Executed { hash, response } = &output {
            info!(hash = %hash, ledger = ?response.ledger, "Contract transaction final");
        }
        Ok(output)
    }

    pub fn belt_id(&self) -> Uuid {
        self.belt.id()
    }
}
