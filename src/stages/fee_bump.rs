//! Fee-bump wrapping
//!
//! [`FeeBumpStage`] wraps a signed inner transaction in an outer envelope
//! paid for by another account. [`FeeBumpPlugin`] applies that stage as a
//! submit pre-process hook and signs the outer envelope with the fee-bump
//! header's signers.

use super::{
    SignInput, SignPipeline, SignRequirementsPipeline, SignRequirementsStage, SignStage,
    SubmitInput, SubmitOutput,
};
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{parse_fee, Envelope, FeeBumpTransaction};
use crate::metrics::metrics;
use crate::pipeline::{BeltMetadata, BeltPlugin, BeltProcess, ConveyorBelt};
use crate::types::{EnvelopeHeader, FeeBumpHeader};
use async_trait::async_trait;
use tracing::debug;

/// Wrap an inner envelope; fee-bump envelopes cannot be nested
pub fn wrap_fee_bump(
    inner: Envelope,
    header: &EnvelopeHeader,
) -> Result<FeeBumpTransaction, ExecutionError> {
    let tx = match inner {
        Envelope::FeeBump(_) => return Err(ExecutionError::AlreadyFeeBumped),
        Envelope::Transaction(tx) => tx,
    };

    let fee = parse_fee(&header.fee).map_err(|e| ExecutionError::FeeBumpWrap(e.to_string()))?;
    if fee < tx.fee {
        return Err(ExecutionError::FeeBumpWrap(format!(
            "outer fee {fee} is lower than the inner fee {}",
            tx.fee
        )));
    }

    Ok(FeeBumpTransaction::new(header.source.clone(), fee, tx))
}

#[derive(Debug, Clone)]
pub struct FeeBumpInput {
    pub envelope: Envelope,
    pub header: EnvelopeHeader,
}

pub struct FeeBumpStage;

pub type FeeBumpPipeline = ConveyorBelt<FeeBumpStage>;

#[async_trait]
impl BeltProcess for FeeBumpStage {
    type Input = FeeBumpInput;
    type Output = Envelope;

    fn belt_type(&self) -> &str {
        "FeeBump"
    }

    async fn process(&self, item: FeeBumpInput, _meta: &BeltMetadata) -> ExecutionResult<Envelope> {
        let summary = item.envelope.summary();
        let wrapped = wrap_fee_bump(item.envelope, &item.header)
            .map_err(|e| ProcessingError::new(e).with_item(summary))?;
        Ok(Envelope::FeeBump(wrapped))
    }
}

/// Submit-stage plugin that pays fees on behalf of the transaction source
pub struct FeeBumpPlugin {
    header: FeeBumpHeader,
    wrap: FeeBumpPipeline,
    requirements: SignRequirementsPipeline,
    sign: SignPipeline,
}

impl FeeBumpPlugin {
    pub fn new(header: FeeBumpHeader) -> Self {
        Self {
            header,
            wrap: ConveyorBelt::new(FeeBumpStage, Vec::new()),
            requirements: ConveyorBelt::new(SignRequirementsStage, Vec::new()),
            sign: ConveyorBelt::new(SignStage, Vec::new()),
        }
    }

    pub fn header(&self) -> &FeeBumpHeader {
        &self.header
    }

    /// The source already pays at least what the fee bump would
    fn pays_own_fee(&self, envelope: &Envelope) -> bool {
        envelope.source() == &self.header.header.source
            && parse_fee(&self.header.header.fee)
                .map(|fee| envelope.fee() >= fee)
                .unwrap_or(false)
    }
}

#[async_trait]
impl BeltPlugin<SubmitInput, SubmitOutput> for FeeBumpPlugin {
    fn name(&self) -> &str {
        "FeeBumpPlugin"
    }

    async fn pre_process(&self, item: SubmitInput, meta: &BeltMetadata) -> ExecutionResult<SubmitInput> {
        if item.envelope.is_fee_bump() {
            return Err(ProcessingError::new(ExecutionError::AlreadyFeeBumped)
                .with_item(item.envelope.summary()));
        }
        if self.pays_own_fee(&item.envelope) {
            metrics().fee_bumps_skipped.inc();
            debug!(source = %item.envelope.source(), "Fee bump not needed");
            return Ok(item);
        }

        let outer = self
            .wrap
            .execute_with_item_id(
                FeeBumpInput {
                    envelope: item.envelope,
                    header: self.header.header.clone(),
                },
                meta.item_id,
            )
            .await?;

        let requirements = self
            .requirements
            .execute_with_item_id(outer.clone(), meta.item_id)
            .await?;

        let signed = self
            .sign
            .execute_with_item_id(
                SignInput {
                    envelope: outer,
                    requirements,
                    signers: self.header.signers.clone(),
                },
                meta.item_id,
            )
            .await?;

        metrics().fee_bumps_applied.inc();
        debug!(fee_source = %signed.source(), fee = signed.fee(), "Transaction fee bumped");
        Ok(SubmitInput { envelope: signed })
    }
}
