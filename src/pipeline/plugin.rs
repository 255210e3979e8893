use super::BeltMetadata;
use crate::errors::{ExecutionResult, ProcessingError};
use async_trait::async_trait;
use std::sync::Arc;

/// Optional behavior attached around a belt's process step
///
/// All three hooks default to identity, so a plugin only overrides what it
/// needs. `process_error` returns a `ProcessingError` by construction: a
/// plugin can enrich or replace the failure but never turn it into success.
#[async_trait]
pub trait BeltPlugin<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str;

    async fn pre_process(&self, item: I, _meta: &BeltMetadata) -> ExecutionResult<I> {
        Ok(item)
    }

    async fn post_process(&self, item: O, _meta: &BeltMetadata) -> ExecutionResult<O> {
        Ok(item)
    }

    async fn process_error(
        &self,
        error: ProcessingError,
        _meta: &BeltMetadata,
    ) -> ProcessingError {
        error
    }
}

pub type SharedPlugin<I, O> = Arc<dyn BeltPlugin<I, O>>;
