use async_trait::async_trait;
use common::StreamId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    EventEnvelope, EventId, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

/// PostgreSQL-backed event store.
///
/// Optimistic concurrency is enforced twice: the expected version is checked
/// inside the append transaction, and the `unique_stream_version` constraint
/// rejects whichever of two racing transactions commits second.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            stream_id: StreamId::new(row.try_get::<String, _>("stream_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
        })
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        let stream_id = validate_events_for_append(&events)?.clone();

        let mut tx = self.pool.begin().await?;

        if let Some(expected) = options.expected_version {
            let current_version: Option<i64> =
                sqlx::query_scalar("SELECT MAX(version) FROM events WHERE stream_id = $1")
                    .bind(stream_id.as_str())
                    .fetch_one(&mut *tx)
                    .await?;

            let actual = Version::new(current_version.unwrap_or(0));

            if actual != expected {
                metrics::counter!("event_store_conflicts_total").increment(1);
                return Err(EventStoreError::ConcurrencyConflict {
                    stream_id,
                    expected,
                    actual,
                });
            }
        }

        let mut last_version = Version::initial();
        for event in &events {
            sqlx::query(
                r#"
                INSERT INTO events (id, event_type, stream_id, aggregate_type, version, timestamp, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.stream_id.as_str())
            .bind(&event.aggregate_type)
            .bind(event.version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(ref db_err) = e
                    && db_err.constraint() == Some("unique_stream_version")
                {
                    return EventStoreError::ConcurrencyConflict {
                        stream_id: stream_id.clone(),
                        expected: options.expected_version.unwrap_or(Version::initial()),
                        actual: event.version,
                    };
                }
                EventStoreError::Database(e)
            })?;

            last_version = event.version;
        }

        tx.commit().await?;
        metrics::counter!("events_appended_total").increment(events.len() as u64);
        tracing::debug!(stream = %stream_id, version = %last_version, "events appended");
        Ok(last_version)
    }

    async fn load_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, stream_id, aggregate_type, version, timestamp, payload
            FROM events
            WHERE stream_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(stream_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, stream_id, aggregate_type, version, timestamp, payload
            FROM events
            WHERE event_type = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(event_type)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_ids(&self, aggregate_type: &str) -> Result<Vec<StreamId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT stream_id FROM events WHERE aggregate_type = $1 ORDER BY stream_id",
        )
        .bind(aggregate_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(StreamId::new).collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::StreamExt;

        let stream = sqlx::query(
            r#"
            SELECT id, event_type, stream_id, aggregate_type, version, timestamp, payload
            FROM events
            ORDER BY sequence ASC
            "#,
        )
        .fetch(&self.pool)
        .map(|result| match result {
            Ok(row) => Self::row_to_event(row),
            Err(e) => Err(EventStoreError::Database(e)),
        });

        Ok(Box::pin(stream))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE stream_id = $1")
                .bind(stream_id.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(version.map(Version::new))
    }
}
