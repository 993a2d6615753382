//! Command handling infrastructure.

use std::marker::PhantomData;
use std::time::Duration;

use common::StreamId;
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::DomainError;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The version of the stream after the command.
    pub new_version: Version,
}

/// How often a command is re-decided after losing an optimistic race.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Number of attempts, including the first.
    pub attempts: u32,
    /// Delay before the first retry, doubled on each further retry.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 16,
            initial_delay: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(6);
        self.initial_delay * factor
    }
}

/// Handler for executing commands against aggregates.
///
/// Each command is decided against the state replayed from the aggregate's
/// stream and appended with that stream's version as the expected version,
/// so a concurrent writer makes the append fail instead of being overwritten.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    retry: RetryPolicy,
    _phantom: PhantomData<A>,
}

impl<S, A> Clone for CommandHandler<S, A>
where
    S: EventStore + Clone,
    A: Aggregate,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            retry: self.retry,
            _phantom: PhantomData,
        }
    }
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            _phantom: PhantomData,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replays a stream into an aggregate.
    ///
    /// An empty stream yields the default instance.
    pub async fn load(&self, stream_id: &StreamId) -> Result<A, DomainError> {
        let events = self.store.load_stream(stream_id).await?;

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if its stream is empty.
    pub async fn load_existing(&self, stream_id: &StreamId) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(stream_id).await?;
        Ok(aggregate.exists().then_some(aggregate))
    }

    /// Executes a command once and persists the resulting events.
    ///
    /// The command function receives the current aggregate state and returns
    /// either a list of events to apply, or an error. An empty list persists
    /// nothing.
    pub async fn execute<F>(
        &self,
        stream_id: &StreamId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: FnOnce(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(stream_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let envelopes = self.build_envelopes(stream_id, current_version, &events)?;
        let new_version = self
            .store
            .append(envelopes, AppendOptions::expecting(current_version))
            .await?;

        for event in &events {
            aggregate.apply(event.clone());
        }
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Executes a command, re-deciding it against fresh state whenever another
    /// writer appended to the stream first.
    ///
    /// This is the compare-and-swap loop guarding shared counters: the
    /// command's checks and its increment land in the same versioned append.
    pub async fn execute_with_retry<F>(
        &self,
        stream_id: &StreamId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error>,
        DomainError: From<A::Error>,
    {
        let mut attempt = 0;
        loop {
            match self.execute(stream_id, &command_fn).await {
                Err(DomainError::EventStore(e)) if e.is_conflict() => {
                    attempt += 1;
                    metrics::counter!("command_conflicts_total", "aggregate" => A::aggregate_type())
                        .increment(1);
                    if attempt >= self.retry.attempts {
                        tracing::warn!(
                            stream = %stream_id,
                            attempts = attempt,
                            "giving up after repeated concurrency conflicts"
                        );
                        return Err(DomainError::EventStore(e));
                    }
                    tracing::debug!(stream = %stream_id, attempt, "concurrency conflict, retrying");
                    tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
                }
                other => return other,
            }
        }
    }

    fn build_envelopes(
        &self,
        stream_id: &StreamId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .stream_id(stream_id.clone())
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_store::InMemoryEventStore;
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Opened { limit: u32 },
        Taken,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "CounterOpened",
                CounterEvent::Taken => "CounterTaken",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        limit: Option<u32>,
        taken: u32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    enum CounterError {
        #[error("exhausted")]
        Exhausted,
    }

    impl From<CounterError> for DomainError {
        fn from(e: CounterError) -> Self {
            DomainError::Validation(e.to_string())
        }
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn exists(&self) -> bool {
            self.limit.is_some()
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened { limit } => self.limit = Some(limit),
                CounterEvent::Taken => self.taken += 1,
            }
        }
    }

    impl Counter {
        fn take(&self) -> Result<Vec<CounterEvent>, CounterError> {
            if self.taken >= self.limit.unwrap_or(0) {
                return Err(CounterError::Exhausted);
            }
            Ok(vec![CounterEvent::Taken])
        }
    }

    fn stream() -> StreamId {
        StreamId::of("counter", "test")
    }

    #[tokio::test]
    async fn test_execute_creates_stream() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());

        let result = handler
            .execute(&stream(), |_| Ok(vec![CounterEvent::Opened { limit: 3 }]))
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::first());
        assert!(result.aggregate.exists());
    }

    #[tokio::test]
    async fn test_execute_returns_error_on_rejected_command() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        handler
            .execute(&stream(), |_| Ok(vec![CounterEvent::Opened { limit: 0 }]))
            .await
            .unwrap();

        let result = handler.execute(&stream(), |c| c.take()).await;
        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn test_load_existing() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        assert!(handler.load_existing(&stream()).await.unwrap().is_none());

        handler
            .execute(&stream(), |_| Ok(vec![CounterEvent::Opened { limit: 1 }]))
            .await
            .unwrap();
        assert!(handler.load_existing(&stream()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_events_persist_nothing() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());

        let result = handler.execute(&stream(), |_| Ok(vec![])).await.unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_retry_never_exceeds_limit_under_contention() {
        let store = InMemoryEventStore::new();
        let handler: Arc<CommandHandler<_, Counter>> =
            Arc::new(CommandHandler::new(store.clone()));
        handler
            .execute(&stream(), |_| Ok(vec![CounterEvent::Opened { limit: 5 }]))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..20 {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move {
                handler.execute_with_retry(&stream(), |c| c.take()).await
            }));
        }

        let mut taken = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => taken += 1,
                Err(DomainError::Validation(_)) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(taken, 5);
        let counter = handler.load(&stream()).await.unwrap();
        assert_eq!(counter.taken, 5);
    }
}
