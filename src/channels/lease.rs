//! RAII lease on a channel
//!
//! Holding a [`ChannelLease`] keeps its channel locked. The channel goes
//! back to the pool on `release()` or, failing that, when the lease drops.
//! Release is idempotent and Drop never panics.

use super::{Channel, ChannelPool};
use crate::errors::ExecutionResult;
use crate::ledger::AccountId;
use crate::metrics::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub struct ChannelLease {
    channel: Channel,
    pool: Arc<ChannelPool>,
    acquired_at: Instant,
    released: bool,
}

impl ChannelLease {
    pub(crate) fn new(channel: Channel, pool: Arc<ChannelPool>) -> Self {
        Self {
            channel,
            pool,
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn id(&self) -> &AccountId {
        self.channel.id()
    }

    /// Time since the channel was allocated
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Explicitly return the channel to the pool
    pub fn release(mut self) -> ExecutionResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> ExecutionResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        metrics()
            .channel_lease_lifetime
            .observe(self.held_for().as_secs_f64());
        self.pool.release_channel(self.channel.id())
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.release_inner() {
            Ok(()) => debug!(channel = %self.channel.id(), "Channel lease released on drop"),
            Err(e) => warn!(channel = %self.channel.id(), error = %e, "Failed to release channel lease on drop"),
        }
    }
}

impl std::fmt::Debug for ChannelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelLease")
            .field("channel", self.channel.id())
            .field("held_for", &self.held_for())
            .field("released", &self.released)
            .finish()
    }
}
