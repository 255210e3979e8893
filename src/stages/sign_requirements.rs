use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{AccountId, Envelope, Threshold};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use async_trait::async_trait;

/// A key that must sign, and the weight it must carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRequirement {
    pub public_key: AccountId,
    pub threshold: Threshold,
}

/// Determine which keys must sign an envelope
///
/// A plain transaction needs its source at medium threshold plus the source
/// of every operation (or the transaction source) at the operation's
/// threshold. A fee-bump envelope needs only its fee source at low threshold;
/// the inner transaction is already signed. Requirements are bundled per key
/// keeping the highest threshold, in first-seen order.
pub fn signature_requirements(envelope: &Envelope) -> ExecutionResult<Vec<SignatureRequirement>> {
    let tx = match envelope {
        Envelope::FeeBump(fee_bump) => {
            return Ok(vec![SignatureRequirement {
                public_key: fee_bump.fee_source.clone(),
                threshold: Threshold::Low,
            }]);
        }
        Envelope::Transaction(tx) => tx,
    };

    if tx.operations.is_empty() {
        return Err(ProcessingError::new(ExecutionError::SignRequirements(
            "transaction has no operations".into(),
        ))
        .with_item(envelope.summary()));
    }

    let mut requirements: Vec<SignatureRequirement> = Vec::new();
    let mut require = |public_key: &AccountId, threshold: Threshold| {
        match requirements
            .iter_mut()
            .find(|requirement| &requirement.public_key == public_key)
        {
            Some(existing) => existing.threshold = existing.threshold.max(threshold),
            None => requirements.push(SignatureRequirement {
                public_key: public_key.clone(),
                threshold,
            }),
        }
    };

    require(&tx.source, Threshold::Medium);
    for operation in &tx.operations {
        let source = operation.source().unwrap_or(&tx.source);
        require(source, operation.threshold());
    }

    Ok(requirements)
}

pub struct SignRequirementsStage;

pub type SignRequirementsPipeline = ConveyorBelt<SignRequirementsStage>;

#[async_trait]
impl BeltProcess for SignRequirementsStage {
    type Input = Envelope;
    type Output = Vec<SignatureRequirement>;

    fn belt_type(&self) -> &str {
        "SignRequirements"
    }

    async fn process(
        &self,
        item: Envelope,
        _meta: &BeltMetadata,
    ) -> ExecutionResult<Vec<SignatureRequirement>> {
        signature_requirements(&item)
    }
}
