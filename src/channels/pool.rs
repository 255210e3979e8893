use super::{ChannelLease, MAX_CHANNELS};
use crate::config::ChannelConfig;
use crate::errors::{ExecutionError, ExecutionResult, ProcessingError};
use crate::ledger::{
    parse_fee, AccountId, LocalSigner, Operation, SharedSigner, TransactionBuilder,
};
use crate::metrics::metrics;
use crate::pipelines::{ClassicInput, ClassicOutput, ClassicTransactionPipeline};
use crate::types::TransactionInvocation;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

/// A channel account together with the signer that controls it
#[derive(Clone)]
pub struct Channel {
    id: AccountId,
    signer: SharedSigner,
}

impl Channel {
    pub fn new(signer: SharedSigner) -> Self {
        Self {
            id: signer.public_key(),
            signer,
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn signer(&self) -> SharedSigner {
        self.signer.clone()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

/// Builder for an envelope sourced from a freshly allocated channel
///
/// The channel stays locked until the caller releases it.
pub struct ChannelEnvelope {
    pub builder: TransactionBuilder,
    /// Caller's invocation with the channel signer added
    pub invocation: TransactionInvocation,
    pub channel: Channel,
}

#[derive(Default)]
struct PoolState {
    free: VecDeque<Channel>,
    locked: Vec<Channel>,
    /// Capacity claimed by open requests still being submitted
    opening: usize,
}

impl PoolState {
    fn managed(&self) -> usize {
        self.free.len() + self.locked.len()
    }

    fn is_free(&self, id: &AccountId) -> bool {
        self.free.iter().any(|channel| channel.id() == id)
    }

    fn is_locked(&self, id: &AccountId) -> bool {
        self.locked.iter().any(|channel| channel.id() == id)
    }
}

/// Pool of channel accounts
///
/// Every channel is in exactly one of two sets: free or locked. Allocation
/// moves one from free to locked, release moves it back. Callers that find
/// no free channel wait until another caller releases one.
pub struct ChannelPool {
    state: Mutex<PoolState>,
    available: Notify,
    pipeline: Arc<ClassicTransactionPipeline>,
    max_channels: usize,
    retry_interval: Duration,
}

impl ChannelPool {
    /// Create an empty pool that opens and closes channels via `pipeline`
    pub fn new(pipeline: Arc<ClassicTransactionPipeline>, config: &ChannelConfig) -> Self {
        let max_channels = config.max_channels.clamp(1, MAX_CHANNELS);
        if max_channels != config.max_channels {
            warn!(
                configured = config.max_channels,
                max_channels, "Channel limit clamped"
            );
        }
        Self {
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            pipeline,
            max_channels,
            retry_interval: config.allocation_retry(),
        }
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// Create and fund `count` sponsored channels in one transaction
    ///
    /// The sponsor pays the reserves and the fee; each channel only signs
    /// to accept the sponsorship. Channels join the free set once the
    /// transaction is accepted.
    #[instrument(skip(self, sponsor, invocation), fields(sponsor = %sponsor.public_key()))]
    pub async fn open_channels(
        &self,
        count: usize,
        sponsor: SharedSigner,
        invocation: TransactionInvocation,
    ) -> ExecutionResult<Vec<Channel>> {
        let reservation = self.reserve(count)?;

        let sponsor_id = sponsor.public_key();
        let channels: Vec<Channel> = (0..count)
            .map(|_| Channel::new(LocalSigner::generate().shared()))
            .collect();

        let mut operations = Vec::with_capacity(count * 3);
        for channel in &channels {
            operations.push(Operation::BeginSponsoring {
                source: Some(sponsor_id.clone()),
                sponsored: channel.id().clone(),
            });
            operations.push(Operation::CreateAccount {
                source: Some(sponsor_id.clone()),
                destination: channel.id().clone(),
                starting_balance: 0,
            });
            operations.push(Operation::EndSponsoring {
                source: Some(channel.id().clone()),
            });
        }

        let mut invocation = invocation;
        invocation.add_signer(sponsor);
        for channel in &channels {
            invocation.add_signer(channel.signer());
        }

        let output = self
            .pipeline
            .execute(ClassicInput::new(invocation, operations))
            .await?;

        reservation.commit(&channels);
        self.available.notify_waiters();

        info!(count, hash = %output.hash, "Channels opened");
        Ok(channels)
    }

    /// Add channels that already exist on the ledger to the free set
    ///
    /// Channels beyond the pool limit and duplicates are ignored. Returns
    /// how many were added.
    pub fn register_channels(&self, channels: Vec<Channel>) -> usize {
        let mut added = 0;
        {
            let mut state = self.state.lock();
            for channel in channels {
                if state.managed() + state.opening >= self.max_channels {
                    warn!(channel = %channel.id(), "Pool full, channel not registered");
                    continue;
                }
                if state.is_free(channel.id()) || state.is_locked(channel.id()) {
                    continue;
                }
                state.free.push_back(channel);
                added += 1;
            }
            self.update_gauges(&state);
        }
        if added > 0 {
            self.available.notify_waiters();
        }
        added
    }

    /// Claim room for `count` channels until the open settles
    fn reserve(&self, count: usize) -> ExecutionResult<OpenReservation<'_>> {
        let mut state = self.state.lock();
        let max = self
            .max_channels
            .saturating_sub(state.managed() + state.opening);
        if count == 0 || count > max {
            return Err(ProcessingError::new(ExecutionError::InvalidChannelCount {
                requested: count,
                max,
            }));
        }
        state.opening += count;
        Ok(OpenReservation { pool: self, count })
    }

    /// Lock a free channel without waiting
    pub fn try_allocate(&self) -> Option<Channel> {
        let mut state = self.state.lock();
        let channel = state.free.pop_front()?;
        state.locked.push(channel.clone());
        self.update_gauges(&state);
        metrics().channels_allocated.inc();
        debug!(channel = %channel.id(), "Channel allocated");
        Some(channel)
    }

    /// Lock a free channel, waiting until one is released if necessary
    pub async fn allocate_channel(&self) -> Channel {
        let mut waiting = false;
        loop {
            // Register before checking so a release in between is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(channel) = self.try_allocate() {
                return channel;
            }
            if !waiting {
                waiting = true;
                metrics().channel_allocation_waits.inc();
                debug!("No free channel, waiting for a release");
            }

            tokio::select! {
                _ = notified => {}
                _ = sleep(self.retry_interval) => {}
            }
        }
    }

    /// Allocate a channel that is released when the lease is dropped
    pub async fn lease(self: &Arc<Self>) -> ChannelLease {
        let channel = self.allocate_channel().await;
        ChannelLease::new(channel, Arc::clone(self))
    }

    /// Return a locked channel to the free set
    pub fn release_channel(&self, id: &AccountId) -> ExecutionResult<()> {
        {
            let mut state = self.state.lock();
            let position = state
                .locked
                .iter()
                .position(|channel| channel.id() == id)
                .ok_or_else(|| ProcessingError::new(ExecutionError::ChannelNotFound(id.to_string())))?;
            let channel = state.locked.swap_remove(position);
            state.free.push_back(channel);
            self.update_gauges(&state);
        }
        metrics().channels_released.inc();
        self.available.notify_one();
        debug!(channel = %id, "Channel released");
        Ok(())
    }

    /// Merge free channels back into the sponsor
    ///
    /// Fails without closing anything if one of the channels is locked or
    /// unknown. The closed channels leave the pool once the transaction is
    /// accepted; on failure they are free again.
    #[instrument(skip(self, ids, sponsor, invocation), fields(count = ids.len()))]
    pub async fn close_channels(
        &self,
        ids: &[AccountId],
        sponsor: SharedSigner,
        invocation: TransactionInvocation,
    ) -> ExecutionResult<ClassicOutput> {
        if ids.is_empty() {
            return Err(ProcessingError::new(ExecutionError::InvalidChannelCount {
                requested: 0,
                max: self.max_channels,
            }));
        }

        let closing: Vec<Channel> = {
            let mut state = self.state.lock();
            for id in ids {
                if state.is_locked(id) {
                    return Err(ProcessingError::new(ExecutionError::ChannelInUse(id.to_string())));
                }
                if !state.is_free(id) {
                    return Err(ProcessingError::new(ExecutionError::ChannelNotFound(
                        id.to_string(),
                    )));
                }
            }
            let (closing, keep): (Vec<Channel>, Vec<Channel>) = std::mem::take(&mut state.free)
                .into_iter()
                .partition(|channel| ids.contains(channel.id()));
            state.free = keep.into();
            self.update_gauges(&state);
            closing
        };

        let sponsor_id = sponsor.public_key();
        let operations = closing
            .iter()
            .map(|channel| Operation::AccountMerge {
                source: Some(channel.id().clone()),
                destination: sponsor_id.clone(),
            })
            .collect();

        let mut invocation = invocation;
        invocation.add_signer(sponsor);
        for channel in &closing {
            invocation.add_signer(channel.signer());
        }

        match self
            .pipeline
            .execute(ClassicInput::new(invocation, operations))
            .await
        {
            Ok(output) => {
                info!(count = closing.len(), hash = %output.hash, "Channels closed");
                Ok(output)
            }
            Err(e) => {
                warn!(error = %e, "Closing channels failed, returning them to the pool");
                {
                    let mut state = self.state.lock();
                    state.free.extend(closing);
                    self.update_gauges(&state);
                }
                self.available.notify_waiters();
                Err(e)
            }
        }
    }

    /// Allocate a channel and start an envelope sourced from it
    pub async fn create_envelope(
        &self,
        invocation: &TransactionInvocation,
    ) -> ExecutionResult<ChannelEnvelope> {
        let fee = parse_fee(&invocation.header.fee)?;
        let channel = self.allocate_channel().await;

        let snapshot = match self.pipeline.accounts().load_account(channel.id()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                if let Err(release_error) = self.release_channel(channel.id()) {
                    warn!(error = %release_error, "Failed to release channel");
                }
                return Err(ProcessingError::new(ExecutionError::account_load(
                    channel.id().to_string(),
                    e.to_string(),
                )));
            }
        };

        let builder = TransactionBuilder::new(snapshot, fee, self.pipeline.network_passphrase())
            .set_timeout(invocation.header.timeout);
        let mut invocation = invocation.clone();
        invocation.add_signer(channel.signer());

        Ok(ChannelEnvelope {
            builder,
            invocation,
            channel,
        })
    }

    pub fn free_channels(&self) -> Vec<AccountId> {
        self.state.lock().free.iter().map(|c| c.id().clone()).collect()
    }

    pub fn locked_channels(&self) -> Vec<AccountId> {
        self.state.lock().locked.iter().map(|c| c.id().clone()).collect()
    }

    pub fn is_locked(&self, id: &AccountId) -> bool {
        self.state.lock().is_locked(id)
    }

    /// Number of channels managed, free and locked
    pub fn len(&self) -> usize {
        self.state.lock().managed()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update_gauges(&self, state: &PoolState) {
        let metrics = metrics();
        metrics.channels_free.set(state.free.len() as i64);
        metrics.channels_locked.set(state.locked.len() as i64);
    }
}

/// Room held in the pool for an open in flight
///
/// Dropping it without `commit` returns the room to the pool.
struct OpenReservation<'a> {
    pool: &'a ChannelPool,
    count: usize,
}

impl OpenReservation<'_> {
    fn commit(mut self, channels: &[Channel]) {
        let mut state = self.pool.state.lock();
        state.opening -= self.count;
        state.free.extend(channels.iter().cloned());
        self.pool.update_gauges(&state);
        self.count = 0;
    }
}

impl Drop for OpenReservation<'_> {
    fn drop(&mut self) {
        if self.count > 0 {
            self.pool.state.lock().opening -= self.count;
        }
    }
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChannelPool")
            .field("free", &state.free.len())
            .field("locked", &state.locked.len())
            .field("opening", &state.opening)
            .field("max_channels", &self.max_channels)
            .finish()
    }
}
