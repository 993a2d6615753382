use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::StreamId;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

#[derive(Default)]
struct Journal {
    /// Every event in append order.
    log: Vec<EventEnvelope>,
    /// Offsets into `log`, per stream.
    streams: HashMap<StreamId, Vec<usize>>,
}

impl Journal {
    fn version_of(&self, stream_id: &StreamId) -> Version {
        self.streams
            .get(stream_id)
            .and_then(|offsets| offsets.last())
            .map(|&i| self.log[i].version)
            .unwrap_or_else(Version::initial)
    }
}

/// In-memory event store for tests and single-process deployments.
///
/// Provides the same concurrency guarantees as the PostgreSQL store: the
/// version check and the write happen under one lock.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    journal: Arc<RwLock<Journal>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.journal.read().await.log.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        let mut journal = self.journal.write().await;
        journal.log.clear();
        journal.streams.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let stream_id = validate_events_for_append(&events)?.clone();

        let mut journal = self.journal.write().await;
        let current_version = journal.version_of(&stream_id);

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            metrics::counter!("event_store_conflicts_total").increment(1);
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual: current_version,
            });
        }

        // Same effect as the unique (stream_id, version) constraint.
        if events[0].version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);

        metrics::counter!("events_appended_total").increment(events.len() as u64);
        let start = journal.log.len();
        journal.log.extend(events);
        let end = journal.log.len();
        journal
            .streams
            .entry(stream_id)
            .or_default()
            .extend(start..end);

        Ok(last_version)
    }

    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        let journal = self.journal.read().await;
        Ok(journal
            .streams
            .get(stream_id)
            .map(|offsets| offsets.iter().map(|&i| journal.log[i].clone()).collect())
            .unwrap_or_default())
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let journal = self.journal.read().await;
        Ok(journal
            .log
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<StreamId>> {
        let journal = self.journal.read().await;
        let mut ids: Vec<StreamId> = journal
            .streams
            .iter()
            .filter(|(_, offsets)| {
                offsets
                    .first()
                    .is_some_and(|&i| journal.log[i].aggregate_type == aggregate_type)
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.journal.read().await.log.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        let journal = self.journal.read().await;
        Ok(journal
            .streams
            .contains_key(stream_id)
            .then(|| journal.version_of(stream_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_event(stream: &str, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(StreamId::new(stream))
            .aggregate_type(stream.split('-').next().unwrap_or_default())
            .event_type(event_type)
            .version(Version::new(version))
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let event = create_test_event("coupon-A", 1, "CouponCreated");

        let version = store
            .append(vec![event], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::first());

        let events = store.load_stream(&StreamId::new("coupon-A")).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn append_multiple_events() {
        let store = InMemoryEventStore::new();
        let events = vec![
            create_test_event("booking-1", 1, "Event1"),
            create_test_event("booking-1", 2, "Event2"),
            create_test_event("booking-1", 3, "Event3"),
        ];

        let version = store
            .append(events, AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::new(3));
        assert_eq!(
            store
                .load_stream(&StreamId::new("booking-1"))
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn concurrency_conflict_on_wrong_version() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("coupon-A", 1, "E1")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event("coupon-A", 2, "E2")],
                AppendOptions::expect_new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_version_conflicts_without_expected_version() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("coupon-A", 1, "E1")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let result = store
            .append(
                vec![create_test_event("coupon-A", 1, "E1")],
                AppendOptions::new(),
            )
            .await;
        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn streams_are_independent() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("coupon-A", 1, "E1")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("coupon-B", 1, "E1")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(
            store
                .stream_version(&StreamId::new("coupon-B"))
                .await
                .unwrap(),
            Some(Version::first())
        );
        assert_eq!(
            store
                .stream_version(&StreamId::new("coupon-C"))
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn events_by_type_and_stream_ids() {
        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("purchase-1", 1, "PurchaseStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("coupon-A", 1, "CouponCreated")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("purchase-2", 1, "PurchaseStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let started = store.events_by_type("PurchaseStarted").await.unwrap();
        assert_eq!(started.len(), 2);

        let purchases = store.stream_ids("purchase").await.unwrap();
        assert_eq!(
            purchases,
            vec![StreamId::new("purchase-1"), StreamId::new("purchase-2")]
        );
    }

    #[tokio::test]
    async fn stream_all_events_in_append_order() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("b-1", 1, "Second")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("a-1", 1, "Third")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let events: Vec<_> = store.stream_all_events().await.unwrap().collect().await;
        let types: Vec<_> = events
            .into_iter()
            .map(|e| e.unwrap().event_type)
            .collect();
        assert_eq!(types, vec!["Second", "Third"]);
    }

    #[tokio::test]
    async fn concurrent_appends_admit_one_winner() {
        let store = InMemoryEventStore::new();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(
                        vec![create_test_event("coupon-LAST", 1, "CouponApplied")],
                        AppendOptions::expect_new(),
                    )
                    .await
            }));
        }

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(store.event_count().await, 1);
    }
}
