//! Projection processor for feeding events to projections.

use event_store::{EventEnvelope, EventStore};
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::Result;
use crate::projection::Projection;

/// Feeds journal rows to registered projections.
///
/// Catch-up walks the whole journal and skips rows a projection has already
/// handled, so it can be called repeatedly to pick up new purchases.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    /// Creates a new processor with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    /// Registers a projection with this processor.
    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    /// Returns the number of registered projections.
    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Delivers every journal row a projection has not seen yet.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let _guard = self.catch_up.lock().await;
        let mut stream = self.store.stream_all_events().await?;
        let mut event_index: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            event_index += 1;

            for projection in &self.projections {
                let pos = projection.position().await;
                if pos.events_processed < event_index {
                    projection.handle(&event).await?;
                    metrics::counter!("projections_events_processed").increment(1);
                }
            }
        }

        tracing::debug!(events_processed = event_index, "catch-up complete");

        Ok(())
    }

    /// Delivers a single event to all registered projections.
    #[tracing::instrument(skip(self, event), fields(event_type = %event.event_type))]
    pub async fn process_event(&self, event: &EventEnvelope) -> Result<()> {
        for projection in &self.projections {
            projection.handle(event).await?;
        }
        Ok(())
    }

    /// Resets all projections and replays all events from the store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionPosition;
    use async_trait::async_trait;
    use common::StreamId;
    use event_store::{AppendOptions, InMemoryEventStore, Version};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    #[derive(Clone)]
    struct CountingProjection {
        count: Arc<RwLock<u64>>,
        position: Arc<RwLock<ProjectionPosition>>,
    }

    impl CountingProjection {
        fn new() -> Self {
            Self {
                count: Arc::new(RwLock::new(0)),
                position: Arc::new(RwLock::new(ProjectionPosition::zero())),
            }
        }

        async fn count(&self) -> u64 {
            *self.count.read().await
        }
    }

    #[async_trait]
    impl Projection for CountingProjection {
        fn name(&self) -> &'static str {
            "CountingProjection"
        }

        async fn handle(&self, _event: &EventEnvelope) -> Result<()> {
            *self.count.write().await += 1;
            let mut pos = self.position.write().await;
            *pos = pos.advance();
            Ok(())
        }

        async fn position(&self) -> ProjectionPosition {
            *self.position.read().await
        }

        async fn reset(&self) -> Result<()> {
            *self.count.write().await = 0;
            *self.position.write().await = ProjectionPosition::zero();
            Ok(())
        }
    }

    fn event(stream: &StreamId, version: i64) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(stream.clone())
            .aggregate_type("Purchase")
            .event_type("TestEvent")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    async fn store_with(n: i64) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("purchase-test");
        if n > 0 {
            let events = (1..=n).map(|v| event(&stream, v)).collect();
            store.append(events, AppendOptions::new()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_catch_up_processes_all_events() {
        let projection = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(3).await);
        processor.register(Box::new(projection.clone()));

        processor.run_catch_up().await.unwrap();

        assert_eq!(projection.count().await, 3);
    }

    #[tokio::test]
    async fn test_catch_up_skips_already_processed() {
        let projection = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(3).await);
        processor.register(Box::new(projection.clone()));

        processor.run_catch_up().await.unwrap();
        processor.run_catch_up().await.unwrap();

        assert_eq!(projection.count().await, 3);
    }

    #[tokio::test]
    async fn test_process_single_event() {
        let projection = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection.clone()));

        let stream = StreamId::new("purchase-test");
        processor.process_event(&event(&stream, 1)).await.unwrap();

        assert_eq!(projection.count().await, 1);
    }

    #[tokio::test]
    async fn test_rebuild_resets_and_replays() {
        let projection = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(projection.clone()));

        processor.run_catch_up().await.unwrap();
        processor.rebuild_all().await.unwrap();

        assert_eq!(projection.count().await, 2);
        assert_eq!(projection.position().await.events_processed, 2);
    }

    #[tokio::test]
    async fn test_every_projection_is_fed() {
        let first = CountingProjection::new();
        let second = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(store_with(2).await);
        processor.register(Box::new(first.clone()));
        processor.register(Box::new(second.clone()));
        assert_eq!(processor.projection_count(), 2);

        processor.run_catch_up().await.unwrap();

        assert_eq!(first.count().await, 2);
        assert_eq!(second.count().await, 2);
    }

    #[tokio::test]
    async fn test_empty_store_catch_up() {
        let projection = CountingProjection::new();
        let mut processor = ProjectionProcessor::new(InMemoryEventStore::new());
        processor.register(Box::new(projection.clone()));

        processor.run_catch_up().await.unwrap();

        assert_eq!(projection.count().await, 0);
    }
}
