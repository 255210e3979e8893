//! Channel accounts
//!
//! A channel is a sponsored account used purely as the source of
//! transactions, so many transactions can be in flight without competing
//! for one account's sequence number. The pool hands channels out one at a
//! time; [`ChannelAccountsPlugin`] wires that into a composite pipeline.

mod lease;
mod plugin;
mod pool;

pub use lease::ChannelLease;
pub use plugin::ChannelAccountsPlugin;
pub use pool::{Channel, ChannelEnvelope, ChannelPool};

/// Upper bound on the number of channels a pool manages
pub const MAX_CHANNELS: usize = 15;
