use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::store::{
    EventReader, EventStore, EventStoreTransaction, EventStream, TransactionScope,
    TransactionStatus, check_expected_version,
};
use crate::{AggregateId, EventEnvelope, EventId, EventStoreError, Result, Version};

const SELECT_COLUMNS: &str =
    "id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata";

/// PostgreSQL-backed event store for [`EventEnvelope`] streams.
///
/// Each command invocation maps onto one database transaction. The
/// `unique_aggregate_version` constraint arbitrates writers racing on the same
/// stream: the loser surfaces as a concurrency conflict.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Creates a new PostgreSQL event store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
        let metadata_json: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata_json)?;

        Ok(EventEnvelope {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            version: Version::new(row.try_get("version")?),
            timestamp: row.try_get("timestamp")?,
            payload: row.try_get("payload")?,
            metadata,
        })
    }
}

#[async_trait]
impl EventStore<AggregateId, EventEnvelope> for PostgresEventStore {
    async fn begin_transaction(
        &self,
        scope: &TransactionScope,
    ) -> Result<Box<dyn EventStoreTransaction<AggregateId, EventEnvelope>>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction {
            pool: self.pool.clone(),
            tx: Some(tx),
            invocation_id: scope.invocation_id,
            status: TransactionStatus::Open,
        }))
    }
}

#[async_trait]
impl EventReader<AggregateId, EventEnvelope> for PostgresEventStore {
    async fn read_stream(&self, aggregate_id: &AggregateId) -> Result<Vec<EventEnvelope>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events WHERE aggregate_id = $1 ORDER BY version ASC"
        ))
        .bind(aggregate_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }

    async fn stream_version(&self, aggregate_id: &AggregateId) -> Result<Version> {
        committed_version(&self.pool, aggregate_id).await
    }

    async fn read_all(&self) -> Result<EventStream<AggregateId, EventEnvelope>> {
        use futures_util::stream;

        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM events ORDER BY position ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        let events: Vec<Result<(AggregateId, EventEnvelope)>> = rows
            .into_iter()
            .map(|row| Self::row_to_event(row).map(|event| (event.aggregate_id, event)))
            .collect();

        Ok(Box::pin(stream::iter(events)))
    }
}

async fn committed_version(pool: &PgPool, aggregate_id: &AggregateId) -> Result<Version> {
    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
            .bind(aggregate_id.as_uuid())
            .fetch_one(pool)
            .await?;

    Ok(Version::new(current.unwrap_or(0)))
}

/// Transaction handed out by [`PostgresEventStore`].
///
/// Dropping it while open lets sqlx roll the database transaction back.
pub struct PostgresTransaction {
    pool: PgPool,
    tx: Option<sqlx::Transaction<'static, Postgres>>,
    invocation_id: Uuid,
    status: TransactionStatus,
}

impl PostgresTransaction {
    fn connection(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or(EventStoreError::TransactionClosed("released"))
    }
}

#[async_trait]
impl EventStoreTransaction<AggregateId, EventEnvelope> for PostgresTransaction {
    async fn store_events(
        &mut self,
        aggregate_id: &AggregateId,
        expected_version: Version,
        events: &[EventEnvelope],
        cancel: &CancellationToken,
    ) -> Result<Version> {
        self.status.ensure_open()?;
        if cancel.is_cancelled() {
            return Err(EventStoreError::Cancelled);
        }

        let invocation_id = self.invocation_id;
        let pool = self.pool.clone();
        let tx = self.connection()?;

        let current: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM events WHERE aggregate_id = $1")
                .bind(aggregate_id.as_uuid())
                .fetch_one(&mut **tx)
                .await?;
        check_expected_version(
            aggregate_id,
            expected_version,
            Version::new(current.unwrap_or(0)),
        )?;

        let mut version = expected_version;
        for event in events {
            version = version.next();
            let metadata_json = serde_json::to_value(&event.metadata)?;

            let inserted = sqlx::query(
                r#"
                INSERT INTO events (id, event_type, aggregate_id, aggregate_type, version, timestamp, payload, metadata, invocation_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.event_type)
            .bind(aggregate_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(version.as_i64())
            .bind(event.timestamp)
            .bind(&event.payload)
            .bind(metadata_json)
            .bind(invocation_id)
            .execute(&mut **tx)
            .await;

            if let Err(e) = inserted {
                return Err(match e {
                    sqlx::Error::Database(ref db_err)
                        if db_err.constraint() == Some("unique_aggregate_version") =>
                    {
                        // The transaction is aborted at this point; read the
                        // winner's version outside it.
                        let actual = committed_version(&pool, aggregate_id)
                            .await
                            .unwrap_or(version);
                        EventStoreError::conflict(aggregate_id, expected_version, actual)
                    }
                    other => EventStoreError::Database(other),
                });
            }
        }

        Ok(version)
    }

    async fn commit(&mut self) -> Result<()> {
        self.status.ensure_open()?;
        let tx = self
            .tx
            .take()
            .ok_or(EventStoreError::TransactionClosed("released"))?;
        tx.commit().await?;
        self.status = TransactionStatus::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.status.ensure_open()?;
        // A failed commit has already consumed the database transaction and
        // the server aborted it, so there is nothing left to undo.
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        self.status = TransactionStatus::RolledBack;
        Ok(())
    }

    fn status(&self) -> TransactionStatus {
        self.status
    }
}
