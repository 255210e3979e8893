use super::{ChannelLease, ChannelPool};
use crate::errors::{ExecutionResult, ProcessingError};
use crate::pipeline::{BeltMetadata, BeltPlugin};
use crate::pipelines::CarriesInvocation;
use crate::types::FeeBumpHeader;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Composite-belt plugin that sources each transaction from a channel
///
/// Before the composite runs it allocates a channel, makes it the envelope
/// source and adds its signer. The channel is released when the item
/// finishes, successfully or not. With a default fee bump configured,
/// invocations that carry none are fee-bumped by the sponsor, so channels
/// never pay fees themselves.
///
/// An execution dropped mid-flight (for example by a timeout) never reaches
/// `post_process` or `process_error`, so its lease stays here until
/// [`reclaim_stale`](Self::reclaim_stale) or until the plugin is dropped.
pub struct ChannelAccountsPlugin {
    pool: Arc<ChannelPool>,
    fee_bump: Option<FeeBumpHeader>,
    leases: Mutex<HashMap<Uuid, ChannelLease>>,
}

impl ChannelAccountsPlugin {
    pub fn new(pool: Arc<ChannelPool>) -> Self {
        Self {
            pool,
            fee_bump: None,
            leases: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_fee_bump(mut self, fee_bump: FeeBumpHeader) -> Self {
        self.fee_bump = Some(fee_bump);
        self
    }

    pub fn pool(&self) -> &Arc<ChannelPool> {
        &self.pool
    }

    /// Items currently holding a channel
    pub fn active_leases(&self) -> usize {
        self.leases.lock().len()
    }

    /// Release channels held longer than `older_than`, returning how many
    pub fn reclaim_stale(&self, older_than: Duration) -> usize {
        let stale: Vec<ChannelLease> = {
            let mut leases = self.leases.lock();
            let expired: Vec<Uuid> = leases
                .iter()
                .filter(|(_, lease)| lease.held_for() >= older_than)
                .map(|(item_id, _)| *item_id)
                .collect();
            expired
                .iter()
                .filter_map(|item_id| leases.remove(item_id))
                .collect()
        };
        let count = stale.len();
        for lease in stale {
            warn!(channel = %lease.id(), held_for = ?lease.held_for(), "Reclaiming stale channel");
            release(lease);
        }
        count
    }

    fn release_for(&self, item_id: &Uuid) {
        let lease = self.leases.lock().remove(item_id);
        if let Some(lease) = lease {
            release(lease);
        }
    }
}

fn release(lease: ChannelLease) {
    let channel = lease.id().clone();
    if let Err(e) = lease.release() {
        warn!(channel = %channel, error = %e, "Failed to release channel");
    }
}

#[async_trait]
impl<I, O> BeltPlugin<I, O> for ChannelAccountsPlugin
where
    I: CarriesInvocation + Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "ChannelAccountsPlugin"
    }

    async fn pre_process(&self, mut item: I, meta: &BeltMetadata) -> ExecutionResult<I> {
        let channel = self.pool.allocate_channel().await;
        debug!(channel = %channel.id(), item_id = %meta.item_id, "Channel assigned");

        let invocation = item.invocation_mut();
        invocation.header.source = channel.id().clone();
        invocation.add_signer(channel.signer());
        if invocation.fee_bump.is_none() {
            invocation.fee_bump = self.fee_bump.clone();
        }

        let lease = ChannelLease::new(channel, Arc::clone(&self.pool));
        let previous = self.leases.lock().insert(meta.item_id, lease);
        // Same item entered twice; do not strand the first channel
        if let Some(previous) = previous {
            release(previous);
        }
        Ok(item)
    }

    async fn post_process(&self, item: O, meta: &BeltMetadata) -> ExecutionResult<O> {
        self.release_for(&meta.item_id);
        Ok(item)
    }

    async fn process_error(&self, error: ProcessingError, meta: &BeltMetadata) -> ProcessingError {
        self.release_for(&meta.item_id);
        error
    }
}
