use super::{BeltMetadata, SharedPlugin};
use crate::errors::ExecutionResult;
use crate::metrics::metrics;
use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

/// The core step of a belt
#[async_trait]
pub trait BeltProcess: Send + Sync {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stable name reported in metadata, logs and metrics
    fn belt_type(&self) -> &str;

    async fn process(
        &self,
        item: Self::Input,
        meta: &BeltMetadata,
    ) -> ExecutionResult<Self::Output>;
}

/// Runs an item through plugins around a single process step
pub struct ConveyorBelt<P: BeltProcess> {
    id: Uuid,
    processor: P,
    plugins: Vec<SharedPlugin<P::Input, P::Output>>,
}

impl<P: BeltProcess> ConveyorBelt<P> {
    pub fn new(processor: P, plugins: Vec<SharedPlugin<P::Input, P::Output>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            processor,
            plugins,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn belt_type(&self) -> &str {
        self.processor.belt_type()
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn plugins(&self) -> &[SharedPlugin<P::Input, P::Output>] {
        &self.plugins
    }

    /// Execute with a freshly generated item id
    pub async fn execute(&self, item: P::Input) -> ExecutionResult<P::Output> {
        self.execute_with_item_id(item, Uuid::new_v4()).await
    }

    /// Execute under an existing item id so that inner belts share the
    /// correlation id of the composite execution that drives them
    #[instrument(skip_all, fields(belt = %self.processor.belt_type(), item = %item_id))]
    pub async fn execute_with_item_id(
        &self,
        item: P::Input,
        item_id: Uuid,
    ) -> ExecutionResult<P::Output> {
        let meta = BeltMetadata::new(item_id, self.id, self.processor.belt_type());
        let started = Instant::now();

        let result = self.run(item, &meta).await;

        let metrics = metrics();
        metrics
            .belt_latency
            .with_label_values(&[meta.belt_type.as_str()])
            .observe(started.elapsed().as_secs_f64());

        match result {
            Ok(output) => {
                metrics
                    .belt_executions
                    .with_label_values(&[meta.belt_type.as_str(), "success"])
                    .inc();
                Ok(output)
            }
            Err(error) => {
                metrics
                    .belt_executions
                    .with_label_values(&[meta.belt_type.as_str(), "error"])
                    .inc();

                let mut error = error.with_meta_if_missing(&meta);
                for plugin in &self.plugins {
                    error = plugin.process_error(error, &meta).await;
                }

                debug!(
                    category = error.kind().category(),
                    error = %error,
                    "Belt execution failed"
                );
                Err(error)
            }
        }
    }

    async fn run(&self, item: P::Input, meta: &BeltMetadata) -> ExecutionResult<P::Output> {
        let mut item = item;
        for plugin in &self.plugins {
            item = plugin.pre_process(item, meta).await?;
        }

        let mut output = self.processor.process(item, meta).await?;

        for plugin in &self.plugins {
            output = plugin.post_process(output, meta).await?;
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ExecutionError, ProcessingError};
    use crate::pipeline::BeltPlugin;
    use crate::test_utils::RecordingPlugin;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Doubles its input, or fails when asked to
    struct Doubler {
        fail: bool,
        calls: Mutex<u32>,
    }

    impl Doubler {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl BeltProcess for Doubler {
        type Input = u64;
        type Output = u64;

        fn belt_type(&self) -> &str {
            "Doubler"
        }

        async fn process(&self, item: u64, _meta: &BeltMetadata) -> ExecutionResult<u64> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(ExecutionError::InvalidInput("boom".into()).into());
            }
            Ok(item * 2)
        }
    }

    /// Adds to the input and to the output, tagging errors with its name
    struct Offset {
        name: &'static str,
        by: u64,
        trace: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl BeltPlugin<u64, u64> for Offset {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_process(&self, item: u64, _meta: &BeltMetadata) -> ExecutionResult<u64> {
            self.trace.lock().push(format!("pre:{}", self.name));
            Ok(item + self.by)
        }

        async fn post_process(&self, item: u64, _meta: &BeltMetadata) -> ExecutionResult<u64> {
            self.trace.lock().push(format!("post:{}", self.name));
            Ok(item + self.by)
        }

        async fn process_error(
            &self,
            error: ProcessingError,
            _meta: &BeltMetadata,
        ) -> ProcessingError {
            self.trace.lock().push(format!("error:{}", self.name));
            let item = error.item.clone().unwrap_or_default();
            error.with_item(format!("{item}{}", self.name))
        }
    }

    /// Only overrides the name
    struct Silent;

    impl BeltPlugin<u64, u64> for Silent {
        fn name(&self) -> &str {
            "silent"
        }
    }

    #[tokio::test]
    async fn test_single_plugin_success_hooks() {
        let recorder = Arc::new(RecordingPlugin::new("recorder"));
        let belt = ConveyorBelt::new(Doubler::new(false), vec![recorder.clone()]);

        let output = belt.execute(21).await.unwrap();

        assert_eq!(output, 42);
        assert_eq!(recorder.pre_calls(), 1);
        assert_eq!(recorder.post_calls(), 1);
        assert_eq!(recorder.error_calls(), 0);
        assert_eq!(*belt.processor().calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_single_plugin_failure_hooks() {
        let recorder = Arc::new(RecordingPlugin::new("recorder"));
        let belt = ConveyorBelt::new(Doubler::new(true), vec![recorder.clone()]);

        let error = belt.execute(21).await.unwrap_err();

        assert!(matches!(error.kind, ExecutionError::InvalidInput(_)));
        assert_eq!(recorder.pre_calls(), 1);
        assert_eq!(recorder.post_calls(), 0);
        assert_eq!(recorder.error_calls(), 1);
        assert_eq!(*belt.processor().calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Offset {
            name: "a",
            by: 1,
            trace: trace.clone(),
        });
        let second = Arc::new(Offset {
            name: "b",
            by: 10,
            trace: trace.clone(),
        });
        let belt = ConveyorBelt::new(Doubler::new(false), vec![first, second]);

        // (0 + 1 + 10) * 2 + 1 + 10
        assert_eq!(belt.execute(0).await.unwrap(), 33);
        assert_eq!(*trace.lock(), vec!["pre:a", "pre:b", "post:a", "post:b"]);
    }

    #[tokio::test]
    async fn test_error_hooks_chain_transformations() {
        let trace = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(Offset {
            name: "a",
            by: 1,
            trace: trace.clone(),
        });
        let second = Arc::new(Offset {
            name: "b",
            by: 1,
            trace: trace.clone(),
        });
        let belt = ConveyorBelt::new(Doubler::new(true), vec![first, second]);

        let error = belt.execute(0).await.unwrap_err();

        assert_eq!(error.item.as_deref(), Some("ab"));
        assert_eq!(
            *trace.lock(),
            vec!["pre:a", "pre:b", "error:a", "error:b"]
        );
    }

    #[tokio::test]
    async fn test_default_hooks_are_identity() {
        let belt = ConveyorBelt::new(Doubler::new(false), vec![Arc::new(Silent)]);
        assert_eq!(belt.execute(4).await.unwrap(), 8);

        let failing = ConveyorBelt::new(Doubler::new(true), vec![Arc::new(Silent)]);
        let error = failing.execute(4).await.unwrap_err();
        assert!(matches!(error.kind, ExecutionError::InvalidInput(_)));
        assert_eq!(error.item, None);
    }

    #[tokio::test]
    async fn test_metadata_per_execution() {
        let recorder = Arc::new(RecordingPlugin::new("recorder"));
        let belt = ConveyorBelt::new(Doubler::new(false), vec![recorder.clone()]);

        belt.execute(1).await.unwrap();
        belt.execute(2).await.unwrap();

        let seen = recorder.seen_metadata();
        assert_eq!(seen.len(), 4);
        assert_ne!(seen[0].item_id, seen[2].item_id);
        assert!(seen.iter().all(|meta| meta.belt_id == belt.id()));
        assert!(seen.iter().all(|meta| meta.belt_type == "Doubler"));
    }

    #[tokio::test]
    async fn test_error_carries_belt_metadata() {
        let belt = ConveyorBelt::new(Doubler::new(true), Vec::new());
        let item_id = Uuid::new_v4();

        let error = belt.execute_with_item_id(3, item_id).await.unwrap_err();

        let meta = error.meta.expect("metadata attached");
        assert_eq!(meta.item_id, item_id);
        assert_eq!(meta.belt_id, belt.id());
        assert_eq!(meta.belt_type, "Doubler");
    }
}
