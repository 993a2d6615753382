use std::pin::Pin;

use async_trait::async_trait;
use common::StreamId;
use futures_core::Stream;

use crate::{EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the stream for optimistic concurrency control.
    /// If None, only the per-stream version uniqueness is enforced.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream to be empty.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }

    /// Expects `version`, or an empty stream when `version` is initial.
    pub fn expecting(version: Version) -> Self {
        if version == Version::initial() {
            Self::expect_new()
        } else {
            Self::expect_version(version)
        }
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Append-only journal of event streams.
///
/// Each stream is a consistency boundary: appends to one stream are
/// serialised by its version, appends to different streams are independent.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to a single stream atomically.
    ///
    /// If `options.expected_version` is set and does not match the stream's
    /// current version, fails with `ConcurrencyConflict` and writes nothing.
    ///
    /// Returns the version of the stream after appending.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves all events of a stream in version order.
    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events of a given type across all streams, oldest first.
    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Lists the ids of every stream owned by the given aggregate type.
    async fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<StreamId>>;

    /// Streams every event in the journal in append order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of a stream, or None if it has no events.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>>;
}

/// Convenience methods available on every event store.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Checks if a stream has any events.
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.stream_version(stream_id).await?.is_some())
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

#[async_trait]
impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        (**self).append(events, options).await
    }

    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        (**self).load_stream(stream_id).await
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        (**self).events_by_type(event_type).await
    }

    async fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<StreamId>> {
        (**self).stream_ids(aggregate_type).await
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        (**self).stream_all_events().await
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        (**self).stream_version(stream_id).await
    }
}

/// Checks that a batch targets one stream with consecutive versions.
///
/// Returns the stream the batch targets.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<&StreamId> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.stream_id != first.stream_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must target the same stream".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(&first.stream_id)
}
