//! Channel pool lifecycle: open, allocate, release, lease, close

#[cfg(test)]
mod channel_pool_tests {
    use crate::channels::{Channel, ChannelPool, MAX_CHANNELS};
    use crate::config::ChannelConfig;
    use crate::errors::{ExecutionError, ExecutionResult};
    use crate::ledger::{AccountId, LocalSigner, Operation, Transaction};
    use crate::pipeline::{BeltMetadata, BeltPlugin};
    use crate::pipelines::TransactionPlugin;
    use crate::stages::BuildInput;
    use crate::tests::test_helpers::test_helpers::{Harness, SPONSOR_BALANCE};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    /// Hands control back to the runtime before every build
    struct YieldingPlugin;

    #[async_trait]
    impl BeltPlugin<BuildInput, Transaction> for YieldingPlugin {
        fn name(&self) -> &str {
            "YieldingPlugin"
        }

        async fn pre_process(
            &self,
            item: BuildInput,
            _meta: &BeltMetadata,
        ) -> ExecutionResult<BuildInput> {
            tokio::task::yield_now().await;
            Ok(item)
        }
    }

    fn slow_retry_config() -> ChannelConfig {
        ChannelConfig {
            max_channels: MAX_CHANNELS,
            allocation_retry_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_counts() {
        let harness = Harness::new();
        let pool = harness.pool(ChannelConfig::default());

        for count in [0, MAX_CHANNELS + 1] {
            let error = pool
                .open_channels(count, harness.sponsor.clone(), harness.sponsor_invocation())
                .await
                .unwrap_err();
            assert_eq!(
                error.kind,
                ExecutionError::InvalidChannelCount {
                    requested: count,
                    max: MAX_CHANNELS
                }
            );
        }
        assert!(pool.is_empty());
        assert_eq!(harness.ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn test_configured_limit_lowers_maximum() {
        let harness = Harness::new();
        let pool = harness.pool(ChannelConfig {
            max_channels: 3,
            allocation_retry_ms: 1000,
        });

        let error = pool
            .open_channels(4, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap_err();
        assert!(matches!(
            error.kind,
            ExecutionError::InvalidChannelCount { requested: 4, max: 3 }
        ));

        pool.open_channels(2, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap();
        let error = pool
            .open_channels(2, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap_err();
        assert!(matches!(
            error.kind,
            ExecutionError::InvalidChannelCount { requested: 2, max: 1 }
        ));
    }

    #[tokio::test]
    async fn test_open_creates_sponsored_channels() {
        let harness = Harness::new();
        let pool = harness.pool(ChannelConfig::default());

        let channels = pool
            .open_channels(5, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap();

        assert_eq!(channels.len(), 5);
        assert_eq!(pool.len(), 5);
        assert_eq!(pool.free_channels().len(), 5);
        assert!(pool.locked_channels().is_empty());
        for channel in &channels {
            assert!(harness.ledger.exists(channel.id()));
            assert_eq!(
                harness.ledger.sponsor_of(channel.id()),
                Some(harness.sponsor.public_key())
            );
        }
        // One transaction, one fee
        assert_eq!(harness.ledger.submission_count(), 1);
        assert_eq!(
            harness.ledger.balance(&harness.sponsor.public_key()),
            Some(SPONSOR_BALANCE - 100)
        );
    }

    #[tokio::test]
    async fn test_failed_open_adds_nothing() {
        let harness = Harness::new();
        let pool = harness.pool(ChannelConfig::default());
        let stranger = LocalSigner::generate().shared();

        // Sponsor does not exist on the ledger
        let error = pool
            .open_channels(2, stranger.clone(), harness.invocation(&stranger))
            .await
            .unwrap_err();

        assert!(matches!(error.kind, ExecutionError::AccountLoad { .. }));
        assert!(pool.is_empty());

        // The failed request holds no capacity
        pool.open_channels(MAX_CHANNELS, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap();
        assert_eq!(pool.len(), MAX_CHANNELS);
    }

    #[tokio::test]
    async fn test_allocate_until_exhausted_then_release() {
        let harness = Harness::new();
        let pool = harness.opened_pool(3).await;

        let held: Vec<Channel> = (0..3).map(|_| pool.try_allocate().unwrap()).collect();
        assert!(pool.try_allocate().is_none());
        assert_eq!(pool.locked_channels().len(), 3);

        let distinct: HashSet<&AccountId> = held.iter().map(Channel::id).collect();
        assert_eq!(distinct.len(), 3);

        pool.release_channel(held[1].id()).unwrap();
        assert!(!pool.is_locked(held[1].id()));
        let again = pool.try_allocate().unwrap();
        assert_eq!(again.id(), held[1].id());
    }

    #[tokio::test]
    async fn test_allocation_waits_for_release() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;
        let held = pool.try_allocate().unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.allocate_channel().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.release_channel(held.id()).unwrap();
        let allocated = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should be woken by the release")
            .unwrap();

        assert_eq!(allocated.id(), held.id());
        assert!(pool.is_locked(held.id()));
    }

    #[tokio::test]
    async fn test_concurrent_opens_never_exceed_the_limit() {
        let harness = Harness::new();
        let pipeline = harness.classic(vec![TransactionPlugin::Build(Arc::new(YieldingPlugin))]);
        let pool = ChannelPool::new(Arc::new(pipeline), &ChannelConfig::default());
        let other_sponsor = harness.funded_signer(SPONSOR_BALANCE);

        let (first, second) = tokio::join!(
            pool.open_channels(10, harness.sponsor.clone(), harness.sponsor_invocation()),
            pool.open_channels(10, other_sponsor.clone(), harness.invocation(&other_sponsor)),
        );

        let outcomes = [first, second];
        assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
        let error = outcomes
            .iter()
            .find_map(|outcome| outcome.as_ref().err())
            .unwrap();
        assert_eq!(
            error.kind,
            ExecutionError::InvalidChannelCount {
                requested: 10,
                max: MAX_CHANNELS - 10
            }
        );
        assert_eq!(pool.len(), 10);
        assert_eq!(harness.ledger.submission_count(), 1);

        pool.open_channels(5, other_sponsor.clone(), harness.invocation(&other_sponsor))
            .await
            .unwrap();
        assert_eq!(pool.len(), MAX_CHANNELS);
    }

    #[tokio::test]
    async fn test_allocation_waits_for_open() {
        let harness = Harness::new();
        let pool = harness.pool(slow_retry_config());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.allocate_channel().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let opened = pool
            .open_channels(1, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap();
        let allocated = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should be woken by the open")
            .unwrap();

        assert_eq!(allocated.id(), opened[0].id());
        assert!(pool.is_locked(opened[0].id()));
    }

    #[tokio::test]
    async fn test_allocation_waits_for_register() {
        let harness = Harness::new();
        let pool = harness.pool(slow_retry_config());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.allocate_channel().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let channel = Channel::new(LocalSigner::generate().shared());
        assert_eq!(pool.register_channels(vec![channel.clone()]), 1);
        let allocated = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter should be woken by the registration")
            .unwrap();

        assert_eq!(allocated.id(), channel.id());
    }

    #[tokio::test]
    async fn test_release_unknown_or_free_channel_fails() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;

        let error = pool.release_channel(&AccountId::new("GUNKNOWN")).unwrap_err();
        assert_eq!(error.kind, ExecutionError::ChannelNotFound("GUNKNOWN".into()));

        let channel = pool.try_allocate().unwrap();
        pool.release_channel(channel.id()).unwrap();
        let error = pool.release_channel(channel.id()).unwrap_err();
        assert!(matches!(error.kind, ExecutionError::ChannelNotFound(_)));
        assert_eq!(pool.free_channels().len(), 1);
    }

    #[tokio::test]
    async fn test_lease_releases_on_drop() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;

        {
            let lease = pool.lease().await;
            assert!(pool.is_locked(lease.id()));
            assert!(pool.try_allocate().is_none());
        }
        assert_eq!(pool.free_channels().len(), 1);

        let lease = pool.lease().await;
        let id = lease.id().clone();
        lease.release().unwrap();
        assert!(!pool.is_locked(&id));
        assert_eq!(pool.free_channels(), vec![id]);
    }

    #[tokio::test]
    async fn test_close_locked_channel_fails_without_closing() {
        let harness = Harness::new();
        let pool = harness.opened_pool(3).await;
        let locked = pool.try_allocate().unwrap();
        let free = pool.free_channels();

        let ids = vec![free[0].clone(), locked.id().clone()];
        let error = pool
            .close_channels(&ids, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap_err();

        assert_eq!(error.kind, ExecutionError::ChannelInUse(locked.id().to_string()));
        assert_eq!(pool.len(), 3);
        assert!(harness.ledger.exists(&free[0]));
    }

    #[tokio::test]
    async fn test_close_unknown_channel_fails() {
        let harness = Harness::new();
        let pool = harness.opened_pool(1).await;

        let error = pool
            .close_channels(
                &[AccountId::new("GUNKNOWN")],
                harness.sponsor.clone(),
                harness.sponsor_invocation(),
            )
            .await
            .unwrap_err();

        assert!(matches!(error.kind, ExecutionError::ChannelNotFound(_)));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn test_close_merges_channels_into_sponsor() {
        let harness = Harness::new();
        let pool = harness.opened_pool(3).await;
        let free = pool.free_channels();
        let closing = vec![free[0].clone(), free[2].clone()];

        let output = pool
            .close_channels(&closing, harness.sponsor.clone(), harness.sponsor_invocation())
            .await
            .unwrap();

        assert!(output.response.successful);
        assert_eq!(pool.free_channels(), vec![free[1].clone()]);
        for id in &closing {
            assert!(!harness.ledger.exists(id));
        }
        assert!(harness.ledger.exists(&free[1]));
    }

    #[tokio::test]
    async fn test_failed_close_returns_channels() {
        let harness = Harness::new();
        let pool = harness.opened_pool(2).await;
        let free = pool.free_channels();

        // A fee of zero cannot be built; nothing reaches the ledger
        let mut invocation = harness.sponsor_invocation();
        invocation.header.fee = "0".into();
        let error = pool
            .close_channels(&free, harness.sponsor.clone(), invocation)
            .await
            .unwrap_err();

        assert!(matches!(error.kind, ExecutionError::EnvelopeBuild(_)));
        assert_eq!(pool.free_channels().len(), 2);
        assert!(free.iter().all(|id| harness.ledger.exists(id)));
    }

    #[tokio::test]
    async fn test_create_envelope_sources_from_channel() {
        let harness = Harness::new();
        let pool = harness.opened_pool(2).await;
        let user = harness.funded_signer(10_000);
        let destination = harness.empty_account();

        let created = pool.create_envelope(&harness.invocation(&user)).await.unwrap();

        assert!(pool.is_locked(created.channel.id()));
        assert_eq!(created.builder.source().id, *created.channel.id());
        assert!(created
            .invocation
            .signers
            .iter()
            .any(|signer| &signer.public_key() == created.channel.id()));

        let tx = created
            .builder
            .add_operation(Operation::payment(destination, 10).with_source(user.public_key()))
            .build()
            .unwrap();
        assert_eq!(tx.source, *created.channel.id());
        assert!(tx.time_bounds.is_some());

        pool.release_channel(created.channel.id()).unwrap();
        assert_eq!(pool.free_channels().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_never_share_a_channel() {
        let harness = Harness::new();
        let pool = harness.opened_pool(3).await;
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let tasks: Vec<_> = (0..24)
            .map(|_| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                tokio::spawn(async move {
                    let lease = pool.lease().await;
                    assert!(in_use.lock().insert(lease.id().clone()));
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    assert!(in_use.lock().remove(lease.id()));
                    lease.release().unwrap();
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            task.unwrap();
        }
        assert_eq!(pool.free_channels().len(), 3);
        assert!(pool.locked_channels().is_empty());
    }

    proptest! {
        #[test]
        fn prop_free_and_locked_partition_the_pool(ops in proptest::collection::vec(any::<(bool, u8)>(), 1..64)) {
            let harness = Harness::new();
            let pool = harness.pool(ChannelConfig::default());
            let channels: Vec<Channel> = (0..4)
                .map(|_| Channel::new(LocalSigner::generate().shared()))
                .collect();
            prop_assert_eq!(pool.register_channels(channels.clone()), 4);

            for (allocate, pick) in ops {
                if allocate {
                    let _ = pool.try_allocate();
                } else {
                    let id = channels[pick as usize % channels.len()].id();
                    let was_locked = pool.is_locked(id);
                    prop_assert_eq!(pool.release_channel(id).is_ok(), was_locked);
                }

                let free: HashSet<AccountId> = pool.free_channels().into_iter().collect();
                let locked: HashSet<AccountId> = pool.locked_channels().into_iter().collect();
                prop_assert!(free.is_disjoint(&locked));
                prop_assert_eq!(free.len() + locked.len(), 4);
            }
        }
    }
}
