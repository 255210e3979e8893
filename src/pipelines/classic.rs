use super::{CarriesInvocation, StagePlugins, SubmitBelts, TransactionPlugin};
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{AccountReader, ClassicSubmitter, Envelope, Operation, SubmitResponse};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use crate::stages::{
    BuildInput, BuildPipeline, BuildStage, SignInput, SignPipeline, SignRequirementsPipeline,
    SignRequirementsStage, SignStage, SubmitOutput, SubmitTransport,
};
use crate::types::TransactionInvocation;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ClassicInput {
    pub invocation: TransactionInvocation,
    pub operations: Vec<Operation>,
}

impl ClassicInput {
    pub fn new(invocation: TransactionInvocation, operations: Vec<Operation>) -> Self {
        Self {
            invocation,
            operations,
        }
    }
}

impl CarriesInvocation for ClassicInput {
    fn invocation(&self) -> &TransactionInvocation {
        &self.invocation
    }

    fn invocation_mut(&mut self) -> &mut TransactionInvocation {
        &mut self.invocation
    }
}

#[derive(Debug, Clone)]
pub struct ClassicOutput {
    pub hash: String,
    pub response: SubmitResponse,
}

pub type ClassicPlugin = TransactionPlugin<ClassicInput, ClassicOutput>;

/// Process step of the synchronous composition
pub struct ClassicProcess {
    build: BuildPipeline,
    requirements: SignRequirementsPipeline,
    sign: SignPipeline,
    submit: SubmitBelts,
}

#[async_trait]
impl BeltProcess for ClassicProcess {
    type Input = ClassicInput;
    type Output = ClassicOutput;

    fn belt_type(&self) -> &str {
        "ClassicTransactionPipeline"
    }

    async fn process(&self, item: ClassicInput, meta: &BeltMetadata) -> ExecutionResult<ClassicOutput> {
        let ClassicInput {
            invocation,
            operations,
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
        let envelope = Envelope::Transaction(tx);

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

        match self
            .submit
            .execute(signed, invocation.fee_bump.as_ref(), item_id)
            .await?
        {
            SubmitOutput::Classic(response) => Ok(ClassicOutput {
                hash: response.hash.clone(),
                response,
            }),
            SubmitOutput::Contract(response) => Err(ProcessingError::new(
                ExecutionError::InvalidInput(format!(
                    "classic pipeline received an asynchronous acknowledgement for {}",
                    response.hash
                )),
            )),
        }
    }
}

/// Synchronous composition: build, sign requirements, sign, submit
pub struct ClassicTransactionPipeline {
    belt: ConveyorBelt<ClassicProcess>,
    accounts: Arc<dyn AccountReader>,
    network_passphrase: String,
}

impl ClassicTransactionPipeline {
    pub fn new(
        accounts: Arc<dyn AccountReader>,
        submitter: Arc<dyn ClassicSubmitter>,
        network_passphrase: impl Into<String>,
        plugins: Vec<ClassicPlugin>,
    ) -> Self {
        let network_passphrase = network_passphrase.into();
        let plugins = StagePlugins::split(plugins);
        if !plugins.simulate.is_empty() || !plugins.finality.is_empty() {
            warn!("Simulate and finality plugins have no belt in the classic pipeline");
        }

        let process = ClassicProcess {
            build: ConveyorBelt::new(
                BuildStage::new(accounts.clone(), network_passphrase.clone()),
                plugins.build,
            ),
            requirements: ConveyorBelt::new(SignRequirementsStage, plugins.sign_requirements),
            sign: ConveyorBelt::new(SignStage, plugins.sign),
            submit: SubmitBelts::new(SubmitTransport::Classic(submitter), plugins.submit),
        };

        Self {
            belt: ConveyorBelt::new(process, plugins.pipeline),
            accounts,
            network_passphrase,
        }
    }

    #[instrument(skip_all, fields(source = %input.invocation.header.source))]
    pub async fn execute(&self, input: ClassicInput) -> ExecutionResult<ClassicOutput> {
        self.execute_with_item_id(input, Uuid::new_v4()).await
    }

    pub async fn execute_with_item_id(
        &self,
        input: ClassicInput,
        item_id: Uuid,
    ) -> ExecutionResult<ClassicOutput> {
        let output = self.belt.execute_with_item_id(input, item_id).await?;
        info!(hash = %output.hash, ledger = ?output.response.ledger, "Transaction submitted");
        Ok(output)
    }

    pub fn belt_id(&self) -> Uuid {
        self.belt.id()
    }

    pub fn accounts(&self) -> &Arc<dyn AccountReader> {
        &self.accounts
    }

    pub fn network_passphrase(&self) -> &str {
        &self.network_passphrase
    }
}
