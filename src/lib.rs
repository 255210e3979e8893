//! Ledger Conveyor - transaction execution on a conveyor belt
//!
//! Every step of getting a transaction onto the ledger is a belt: a process
//! step wrapped by an ordered list of plugins. Stages (build, simulate, sign
//! requirements, sign, submit, fee bump, finality) are composed into a
//! synchronous classic pipeline and an asynchronous contract pipeline. A
//! channel pool lets many transactions run in parallel on sponsored
//! channel accounts.

pub mod channels;
pub mod config;
pub mod errors;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod pipelines;
pub mod stages;
pub mod types;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use channels::{ChannelAccountsPlugin, ChannelPool, MAX_CHANNELS};
pub use config::Config;
pub use errors::{ExecutionError, ExecutionResult, ProcessingError};
pub use pipeline::{BeltMetadata, BeltPlugin, BeltProcess, ConveyorBelt};
pub use pipelines::{ClassicTransactionPipeline, ContractTransactionPipeline, TransactionPlugin};
pub use types::{EnvelopeHeader, FeeBumpHeader, TransactionInvocation};
