//! Channel accounts plugin with a sponsor fee bump

#[cfg(test)]
mod fee_bump_channel_tests {
    use crate::channels::{ChannelAccountsPlugin, ChannelPool};
    use crate::errors::{ExecutionError, ExecutionResult};
    use crate::ledger::{AccountId, LocalSigner, Operation, SharedSigner, Transaction};
    use crate::pipeline::{BeltMetadata, BeltPlugin};
    use crate::pipelines::{ClassicInput, ContractInput, TransactionPlugin};
    use crate::stages::BuildInput;
    use crate::tests::test_helpers::test_helpers::Harness;
    use crate::types::{EnvelopeHeader, FeeBumpHeader, TransactionInvocation};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    /// Never lets the build stage start
    struct StallingPlugin;

    #[async_trait]
    impl BeltPlugin<BuildInput, Transaction> for StallingPlugin {
        fn name(&self) -> &str {
            "StallingPlugin"
        }

        async fn pre_process(
            &self,
            _item: BuildInput,
            _meta: &BeltMetadata,
        ) -> ExecutionResult<BuildInput> {
            std::future::pending().await
        }
    }

    fn channel_plugin(harness: &Harness, pool: &Arc<ChannelPool>) -> Arc<ChannelAccountsPlugin> {
        Arc::new(ChannelAccountsPlugin::new(pool.clone()).with_fee_bump(harness.sponsor_fee_bump("1000")))
    }

    fn payment_from(harness: &Harness, user: &SharedSigner, amount: u64) -> ClassicInput {
        ClassicInput::new(
            harness.invocation(user),
            vec![Operation::payment(harness.empty_account(), amount).with_source(user.public_key())],
        )
    }

    #[tokio::test]
    async fn test_payment_goes_through_a_channel() {
        let harness = Harness::new();
        let pool = harness.opened_pool(3).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.classic(vec![TransactionPlugin::Pipeline(plugin.clone())]);
        let alice = harness.funded_signer(10_000);
        let sponsor_before = harness.ledger.balance(&harness.sponsor.public_key()).unwrap();
        let sequences_before: HashMap<AccountId, i64> = pool
            .free_channels()
            .into_iter()
            .map(|id| {
                let sequence = harness.ledger.sequence(&id).unwrap();
                (id, sequence)
            })
            .collect();

        let output = pipeline.execute(payment_from(&harness, &alice, 1000)).await.unwrap();

        assert!(output.response.successful);
        // Channel is the source, the sponsor pays, alice only moves funds
        assert_eq!(harness.ledger.balance(&alice.public_key()), Some(9_000));
        assert_eq!(
            harness.ledger.balance(&harness.sponsor.public_key()),
            Some(sponsor_before - 1000)
        );
        let bumped = sequences_before
            .iter()
            .filter(|(id, before)| harness.ledger.sequence(id) == Some(**before + 1))
            .count();
        assert_eq!(bumped, 1);

        assert_eq!(pool.free_channels().len(), 3);
        assert_eq!(plugin.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_failure_releases_the_channel() {
        let harness = Harness::new();
        let pool = harness.opened_pool(2).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.classic(vec![TransactionPlugin::Pipeline(plugin.clone())]);
        let alice = harness.funded_signer(10_000);

        let mut input = payment_from(&harness, &alice, 1000);
        input.invocation.signers = Vec::new();
        let error = pipeline.execute(input).await.unwrap_err();

        assert_eq!(
            error.kind,
            ExecutionError::signer_not_found(alice.public_key().to_string())
        );
        assert_eq!(pool.free_channels().len(), 2);
        assert_eq!(plugin.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_execution_channel_is_reclaimed() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.classic(vec![
            TransactionPlugin::Pipeline(plugin.clone()),
            TransactionPlugin::Build(Arc::new(StallingPlugin)),
        ]);
        let alice = harness.funded_signer(10_000);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.execute(payment_from(&harness, &alice, 100)),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(pool.locked_channels().len(), 1);
        assert_eq!(plugin.active_leases(), 1);

        assert_eq!(plugin.reclaim_stale(Duration::from_secs(3600)), 0);
        assert_eq!(plugin.reclaim_stale(Duration::ZERO), 1);
        assert_eq!(pool.free_channels().len(), 1);
        assert_eq!(plugin.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_dropping_the_plugin_frees_held_channels() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.classic(vec![
            TransactionPlugin::Pipeline(plugin.clone()),
            TransactionPlugin::Build(Arc::new(StallingPlugin)),
        ]);
        let alice = harness.funded_signer(10_000);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            pipeline.execute(payment_from(&harness, &alice, 100)),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(pool.free_channels().is_empty());

        drop(pipeline);
        drop(plugin);
        assert_eq!(pool.free_channels().len(), 1);
        assert!(pool.locked_channels().is_empty());
    }

    #[tokio::test]
    async fn test_invocation_fee_bump_takes_precedence() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.classic(vec![TransactionPlugin::Pipeline(plugin)]);
        let alice = harness.funded_signer(10_000);
        let payer = harness.funded_signer(5_000);

        let mut input = payment_from(&harness, &alice, 100);
        input.invocation = input.invocation.with_fee_bump(FeeBumpHeader {
            header: EnvelopeHeader::new(payer.public_key(), "300", 30),
            signers: vec![payer.clone()],
        });
        pipeline.execute(input).await.unwrap();

        assert_eq!(harness.ledger.balance(&payer.public_key()), Some(4_700));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_submissions_share_the_pool() {
        let harness = Arc::new(Harness::new());
        let pool = harness.opened_pool(3).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = Arc::new(harness.classic(vec![TransactionPlugin::Pipeline(plugin.clone())]));

        let users: Vec<SharedSigner> = (0..9).map(|_| harness.funded_signer(10_000)).collect();
        let tasks: Vec<_> = users
            .iter()
            .map(|user| {
                let pipeline = pipeline.clone();
                let input = payment_from(&harness, user, 250);
                tokio::spawn(async move { pipeline.execute(input).await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            let output = task.unwrap().unwrap();
            assert!(output.response.successful);
        }
        for user in &users {
            assert_eq!(harness.ledger.balance(&user.public_key()), Some(9_750));
        }
        assert_eq!(pool.free_channels().len(), 3);
        assert_eq!(plugin.active_leases(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_call_through_a_channel() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let plugin = channel_plugin(&harness, &pool);
        let pipeline = harness.contract(vec![TransactionPlugin::Pipeline(plugin.clone())]);
        let alice = harness.funded_signer(10_000);

        let operation = Operation::invoke_contract("CCOUNTER", "increment", Vec::new())
            .with_source(alice.public_key());
        let output = pipeline
            .execute(ContractInput::new(harness.invocation(&alice), vec![operation]))
            .await
            .unwrap();

        assert!(output.hash().is_some());
        assert_eq!(harness.ledger.balance(&alice.public_key()), Some(10_000));
        assert_eq!(pool.free_channels().len(), 1);
        assert_eq!(plugin.active_leases(), 0);
    }

    #[tokio::test]
    async fn test_channel_source_replaces_invocation_source() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let channel_id = pool.free_channels()[0].clone();
        let plugin = channel_plugin(&harness, &pool);
        let outsider = LocalSigner::generate().shared();

        // The header names an account that does not exist; the channel does
        let invocation = TransactionInvocation::new(
            EnvelopeHeader::new(outsider.public_key(), "100", 30),
            Vec::new(),
        );
        let input = ClassicInput::new(invocation, vec![Operation::BumpSequence {
            source: None,
            bump_to: 0,
        }]);
        let pipeline = harness.classic(vec![TransactionPlugin::Pipeline(plugin)]);
        let before = harness.ledger.sequence(&channel_id).unwrap();

        pipeline.execute(input).await.unwrap();

        assert_eq!(harness.ledger.sequence(&channel_id), Some(before + 1));
    }
}
