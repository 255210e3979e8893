//! Composite transaction pipelines
//!
//! - [`ClassicTransactionPipeline`]: build, sign requirements, sign, submit
//!   through the synchronous endpoint
//! - [`ContractTransactionPipeline`]: build, simulate, sign requirements,
//!   sign, submit through the asynchronous endpoint, poll for finality
//!
//! Both take an ordered list of [`TransactionPlugin`]s. Each variant names
//! the belt the plugin attaches to, so routing is decided once at
//! construction.

mod classic;
mod contract;

pub use classic::{ClassicInput, ClassicOutput, ClassicPlugin, ClassicTransactionPipeline};
pub use contract::{
    ContractInput, ContractOptions, ContractOutput, ContractPlugin, ContractTransactionPipeline,
};

use crate::errors::ExecutionResult;
use crate::ledger::{Envelope, Transaction, TransactionStatusResponse};
use crate::pipeline::{BeltPlugin, ConveyorBelt, SharedPlugin};
use crate::stages::{
    BuildInput, FeeBumpPlugin, FinalityInput, SignInput, SignatureRequirement, SimulatedTransaction,
    SubmitInput, SubmitOutput, SubmitPipeline, SubmitStage, SubmitTransport,
};
use crate::types::{FeeBumpHeader, TransactionInvocation};
use std::sync::Arc;
use uuid::Uuid;

/// Composite inputs that carry the invocation being executed
pub trait CarriesInvocation {
    fn invocation(&self) -> &TransactionInvocation;
    fn invocation_mut(&mut self) -> &mut TransactionInvocation;
}

/// A plugin tagged with the belt it attaches to
pub enum TransactionPlugin<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// The composite belt itself
    Pipeline(SharedPlugin<I, O>),
    Build(SharedPlugin<BuildInput, Transaction>),
    /// Ignored by the classic pipeline
    Simulate(SharedPlugin<Transaction, SimulatedTransaction>),
    SignRequirements(SharedPlugin<Envelope, Vec<SignatureRequirement>>),
    Sign(SharedPlugin<SignInput, Envelope>),
    Submit(SharedPlugin<SubmitInput, SubmitOutput>),
    /// Ignored by the classic pipeline
    Finality(SharedPlugin<FinalityInput, TransactionStatusResponse>),
}

impl<I, O> TransactionPlugin<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Attach one plugin to the composite belt and every inner belt
    pub fn all_belts<P>(plugin: Arc<P>) -> Vec<Self>
    where
        P: BeltPlugin<I, O>
            + BeltPlugin<BuildInput, Transaction>
            + BeltPlugin<Transaction, SimulatedTransaction>
            + BeltPlugin<Envelope, Vec<SignatureRequirement>>
            + BeltPlugin<SignInput, Envelope>
            + BeltPlugin<SubmitInput, SubmitOutput>
            + BeltPlugin<FinalityInput, TransactionStatusResponse>
            + 'static,
    {
        vec![
            TransactionPlugin::Pipeline(plugin.clone()),
            TransactionPlugin::Build(plugin.clone()),
            TransactionPlugin::Simulate(plugin.clone()),
            TransactionPlugin::SignRequirements(plugin.clone()),
            TransactionPlugin::Sign(plugin.clone()),
            TransactionPlugin::Submit(plugin.clone()),
            TransactionPlugin::Finality(plugin),
        ]
    }
}

impl<I, O> Clone for TransactionPlugin<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn clone(&self) -> Self {
        match self {
            TransactionPlugin::Pipeline(plugin) => TransactionPlugin::Pipeline(plugin.clone()),
            TransactionPlugin::Build(plugin) => TransactionPlugin::Build(plugin.clone()),
            TransactionPlugin::Simulate(plugin) => TransactionPlugin::Simulate(plugin.clone()),
            TransactionPlugin::SignRequirements(plugin) => {
                TransactionPlugin::SignRequirements(plugin.clone())
            }
            TransactionPlugin::Sign(plugin) => TransactionPlugin::Sign(plugin.clone()),
            TransactionPlugin::Submit(plugin) => TransactionPlugin::Submit(plugin.clone()),
            TransactionPlugin::Finality(plugin) => TransactionPlugin::Finality(plugin.clone()),
        }
    }
}

/// Plugins grouped per belt, registration order preserved
struct StagePlugins<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    pipeline: Vec<SharedPlugin<I, O>>,
    build: Vec<SharedPlugin<BuildInput, Transaction>>,
    simulate: Vec<SharedPlugin<Transaction, SimulatedTransaction>>,
    sign_requirements: Vec<SharedPlugin<Envelope, Vec<SignatureRequirement>>>,
    sign: Vec<SharedPlugin<SignInput, Envelope>>,
    submit: Vec<SharedPlugin<SubmitInput, SubmitOutput>>,
    finality: Vec<SharedPlugin<FinalityInput, TransactionStatusResponse>>,
}

impl<I, O> StagePlugins<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn split(plugins: Vec<TransactionPlugin<I, O>>) -> Self {
        let mut split = Self {
            pipeline: Vec::new(),
            build: Vec::new(),
            simulate: Vec::new(),
            sign_requirements: Vec::new(),
            sign: Vec::new(),
            submit: Vec::new(),
            finality: Vec::new(),
        };
        for plugin in plugins {
            match plugin {
                TransactionPlugin::Pipeline(plugin) => split.pipeline.push(plugin),
                TransactionPlugin::Build(plugin) => split.build.push(plugin),
                TransactionPlugin::Simulate(plugin) => split.simulate.push(plugin),
                TransactionPlugin::SignRequirements(plugin) => {
                    split.sign_requirements.push(plugin)
                }
                TransactionPlugin::Sign(plugin) => split.sign.push(plugin),
                TransactionPlugin::Submit(plugin) => split.submit.push(plugin),
                TransactionPlugin::Finality(plugin) => split.finality.push(plugin),
            }
        }
        split
    }
}

/// Submit belt plus the per-invocation fee-bump variant
struct SubmitBelts {
    transport: SubmitTransport,
    plugins: Vec<SharedPlugin<SubmitInput, SubmitOutput>>,
    plain: SubmitPipeline,
}

impl SubmitBelts {
    fn new(transport: SubmitTransport, plugins: Vec<SharedPlugin<SubmitInput, SubmitOutput>>) -> Self {
        let plain = ConveyorBelt::new(SubmitStage::new(transport.clone()), plugins.clone());
        Self {
            transport,
            plugins,
            plain,
        }
    }

    /// Submit, wrapping in a fee bump when the invocation asks for one
    async fn execute(
        &self,
        envelope: Envelope,
        fee_bump: Option<&FeeBumpHeader>,
        item_id: Uuid,
    ) -> ExecutionResult<SubmitOutput> {
        let input = SubmitInput { envelope };
        match fee_bump {
            None => self.plain.execute_with_item_id(input, item_id).await,
            Some(header) => {
                let mut plugins = self.plugins.clone();
                plugins.push(Arc::new(FeeBumpPlugin::new(header.clone())));
                ConveyorBelt::new(SubmitStage::new(self.transport.clone()), plugins)
                    .execute_with_item_id(input, item_id)
                    .await
            }
        }
    }
}
