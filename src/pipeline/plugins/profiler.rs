use crate::errors::{ExecutionResult, ProcessingError};
use crate::pipeline::{BeltMetadata, BeltPlugin};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStatus {
    Running,
    Success,
    Error,
}

/// Timing of one item through one belt
#[derive(Debug, Clone)]
pub struct ProfileEntry {
    pub item_id: Uuid,
    pub belt_id: Uuid,
    pub belt_type: String,
    pub started_at: Instant,
    pub elapsed: Option<Duration>,
    pub status: ProfileStatus,
}

/// Records how long each item spends in each belt
///
/// One profiler can be attached to several belts at once; entries are keyed
/// by item id and belt id so inner and outer belts of a composite pipeline
/// show up side by side under the same item id.
#[derive(Default)]
pub struct ProfilerPlugin {
    entries: DashMap<(Uuid, Uuid), ProfileEntry>,
}

impl ProfilerPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries ordered by start time
    pub fn entries(&self) -> Vec<ProfileEntry> {
        let mut entries: Vec<ProfileEntry> =
            self.entries.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by_key(|entry| entry.started_at);
        entries
    }

    /// Entries recorded for one item
    pub fn entries_for(&self, item_id: Uuid) -> Vec<ProfileEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.item_id == item_id)
            .collect()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    fn start(&self, meta: &BeltMetadata) {
        self.entries.insert(
            (meta.item_id, meta.belt_id),
            ProfileEntry {
                item_id: meta.item_id,
                belt_id: meta.belt_id,
                belt_type: meta.belt_type.clone(),
                started_at: Instant::now(),
                elapsed: None,
                status: ProfileStatus::Running,
            },
        );
    }

    fn finish(&self, meta: &BeltMetadata, status: ProfileStatus) {
        // A failing earlier pre-process hook means start was never recorded
        let mut entry = self
            .entries
            .entry((meta.item_id, meta.belt_id))
            .or_insert_with(|| ProfileEntry {
                item_id: meta.item_id,
                belt_id: meta.belt_id,
                belt_type: meta.belt_type.clone(),
                started_at: Instant::now(),
                elapsed: None,
                status: ProfileStatus::Running,
            });
        entry.elapsed = Some(entry.started_at.elapsed());
        entry.status = status;
    }
}

#[async_trait]
impl<I, O> BeltPlugin<I, O> for ProfilerPlugin
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "ProfilerPlugin"
    }

    async fn pre_process(&self, item: I, meta: &BeltMetadata) -> ExecutionResult<I> {
        self.start(meta);
        Ok(item)
    }

    async fn post_process(&self, item: O, meta: &BeltMetadata) -> ExecutionResult<O> {
        self.finish(meta, ProfileStatus::Success);
        Ok(item)
    }

    async fn process_error(&self, error: ProcessingError, meta: &BeltMetadata) -> ProcessingError {
        self.finish(meta, ProfileStatus::Error);
        error
    }
}
