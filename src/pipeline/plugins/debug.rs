use crate::errors::{ExecutionResult, ProcessingError};
use crate::pipeline::{BeltMetadata, BeltPlugin};
use async_trait::async_trait;
use tracing::{debug, info, warn, Level};

/// Logs the start, finish and failure of every belt it is attached to
pub struct DebugPlugin {
    level: Level,
}

impl DebugPlugin {
    pub fn new() -> Self {
        Self { level: Level::DEBUG }
    }

    /// Log start and finish at info instead of debug
    pub fn verbose() -> Self {
        Self { level: Level::INFO }
    }

    fn log(&self, meta: &BeltMetadata, message: &str) {
        if self.level == Level::INFO {
            info!(belt = %meta.belt_type, item = %meta.item_id, belt_id = %meta.belt_id, "{}", message);
        } else {
            debug!(belt = %meta.belt_type, item = %meta.item_id, belt_id = %meta.belt_id, "{}", message);
        }
    }
}

impl Default for DebugPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<I, O> BeltPlugin<I, O> for DebugPlugin
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "DebugPlugin"
    }

    async fn pre_process(&self, item: I, meta: &BeltMetadata) -> ExecutionResult<I> {
        self.log(meta, "Belt started");
        Ok(item)
    }

    async fn post_process(&self, item: O, meta: &BeltMetadata) -> ExecutionResult<O> {
        self.log(meta, "Belt finished");
        Ok(item)
    }

    async fn process_error(&self, error: ProcessingError, meta: &BeltMetadata) -> ProcessingError {
        warn!(
            belt = %meta.belt_type,
            item = %meta.item_id,
            category = error.kind().category(),
            error = %error,
            "Belt failed"
        );
        error
    }
}
