//! Generic plugins that attach to any belt

mod debug;
mod profiler;

pub use debug::DebugPlugin;
pub use profiler::{ProfileEntry, ProfileStatus, ProfilerPlugin};
