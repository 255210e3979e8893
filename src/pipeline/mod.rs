//! Conveyor belt pipeline engine
//!
//! Every transaction stage is a [`ConveyorBelt`]: one [`BeltProcess`] wrapped
//! by an ordered list of [`BeltPlugin`]s.
//!
//! ## Key Features
//! - Pre-process hooks run in registration order before the process step
//! - Post-process hooks run in registration order on the process output
//! - Error hooks chain in registration order and always yield an error
//! - Missing hooks are identity functions
//! - Exactly one process invocation per execute call, no internal retries

mod belt;
mod metadata;
mod plugin;
pub mod plugins;

pub use belt::{BeltProcess, ConveyorBelt};
pub use metadata::BeltMetadata;
pub use plugin::{BeltPlugin, SharedPlugin};
