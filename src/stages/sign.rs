use super::SignatureRequirement;
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{Envelope, SharedSigner};
use crate::pipeline::{BeltMetadata, BeltProcess, ConveyorBelt};
use async_trait::async_trait;
use futures::future::try_join_all;
use tracing::debug;

pub struct SignInput {
    pub envelope: Envelope,
    pub requirements: Vec<SignatureRequirement>,
    pub signers: Vec<SharedSigner>,
}

/// Collects one signature per requirement from the matching signer
pub struct SignStage;

pub type SignPipeline = ConveyorBelt<SignStage>;

#[async_trait]
impl BeltProcess for SignStage {
    type Input = SignInput;
    type Output = Envelope;

    fn belt_type(&self) -> &str {
        "SignTransaction"
    }

    async fn process(&self, item: SignInput, _meta: &BeltMetadata) -> ExecutionResult<Envelope> {
        let SignInput {
            mut envelope,
            requirements,
            signers,
        } = item;
        let summary = envelope.summary();

        if requirements.is_empty() {
            return Err(ProcessingError::new(ExecutionError::SignRequirements(
                "no signature requirements provided".into(),
            ))
            .with_item(summary));
        }

        let mut matched = Vec::with_capacity(requirements.len());
        for requirement in &requirements {
            let signer = signers
                .iter()
                .find(|signer| signer.public_key() == requirement.public_key)
                .ok_or_else(|| {
                    ProcessingError::new(ExecutionError::signer_not_found(
                        requirement.public_key.to_string(),
                    ))
                    .with_item(summary.clone())
                })?;
            matched.push(signer.clone());
        }

        let signatures = try_join_all(matched.iter().map(|signer| {
            let envelope = &envelope;
            async move {
                signer.sign(envelope).await.map_err(|e| {
                    ExecutionError::signing(signer.public_key().to_string(), e.to_string())
                })
            }
        }))
        .await
        .map_err(|e| ProcessingError::new(e).with_item(summary.clone()))?;

        for signature in signatures {
            envelope.add_signature(signature);
        }

        debug!(signatures = envelope.signatures().len(), hash = %envelope.hash_hex(), "Envelope signed");
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::signer::verify_signature;
    use crate::ledger::{
        AccountId, AccountSnapshot, LocalSigner, Operation, SignerHandle, Threshold,
        TransactionBuilder,
    };
    use crate::test_utils::FailingSigner;
    use std::sync::Arc;

    fn envelope_from(source: &AccountId) -> Envelope {
        let snapshot = AccountSnapshot {
            id: source.clone(),
            sequence: 0,
            balance: 0,
        };
        TransactionBuilder::new(snapshot, 100, "Test Network")
            .add_operation(Operation::payment(AccountId::new("B"), 1))
            .build()
            .unwrap()
            .into()
    }

    fn require(key: &AccountId) -> SignatureRequirement {
        SignatureRequirement {
            public_key: key.clone(),
            threshold: Threshold::Medium,
        }
    }

    #[tokio::test]
    async fn test_signs_with_matching_signer_only() {
        let source = LocalSigner::generate().shared();
        let bystander = LocalSigner::generate().shared();
        let envelope = envelope_from(&source.public_key());
        let belt = SignPipeline::new(SignStage, Vec::new());

        let signed = belt
            .execute(SignInput {
                requirements: vec![require(&source.public_key())],
                signers: vec![bystander, source.clone()],
                envelope,
            })
            .await
            .unwrap();

        assert_eq!(signed.signatures().len(), 1);
        assert_eq!(signed.signatures()[0].public_key, source.public_key());
        assert!(verify_signature(&signed.hash(), &signed.signatures()[0]));
    }

    #[tokio::test]
    async fn test_missing_signer_fails() {
        let source = LocalSigner::generate().shared();
        let belt = SignPipeline::new(SignStage, Vec::new());

        let error = belt
            .execute(SignInput {
                envelope: envelope_from(&source.public_key()),
                requirements: vec![require(&source.public_key())],
                signers: Vec::new(),
            })
            .await
            .unwrap_err();

        assert!(matches!(error.kind, ExecutionError::SignerNotFound { .. }));
    }

    #[tokio::test]
    async fn test_no_requirements_fails() {
        let source = LocalSigner::generate().shared();
        let belt = SignPipeline::new(SignStage, Vec::new());

        let error = belt
            .execute(SignInput {
                envelope: envelope_from(&source.public_key()),
                requirements: Vec::new(),
                signers: vec![source],
            })
            .await
            .unwrap_err();

        assert!(matches!(error.kind, ExecutionError::SignRequirements(_)));
    }

    #[tokio::test]
    async fn test_signer_failure_is_reported() {
        let signer: SharedSigner = Arc::new(FailingSigner::new(AccountId::new("HSM")));
        let belt = SignPipeline::new(SignStage, Vec::new());

        let error = belt
            .execute(SignInput {
                envelope: envelope_from(&AccountId::new("HSM")),
                requirements: vec![require(&AccountId::new("HSM"))],
                signers: vec![signer],
            })
            .await
            .unwrap_err();

        match error.kind {
            ExecutionError::Signing { public_key, .. } => assert_eq!(public_key, "HSM"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
