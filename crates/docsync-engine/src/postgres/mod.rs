// File: src/postgres/mod.rs
//
// PostgreSQL-backed persistence for events, snapshots, and state vectors.
// The unique indexes are the correctness boundary; the in-process sequence
// lock only keeps the common case collision-free.

pub mod schema;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use docsync_core::{
    Event, Operation, Snapshot, StateVector, SyncError, SyncResult, VectorClock,
};

use crate::snapshot::SnapshotStore;
use crate::state_vector::StateVectorStore;
use crate::store::EventStore;

use schema::{sync_events, sync_snapshots, sync_state_vectors};

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooled = PooledConnection<ConnectionManager<PgConnection>>;

/// Connection configuration shared by the three backends.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub connection_pool_size: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/docsync".to_string(),
            connection_pool_size: 10,
        }
    }
}

impl PostgresConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Default::default()
        }
    }

    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.connection_pool_size = size;
        self
    }

    fn build_pool(&self) -> SyncResult<PgPool> {
        let manager = ConnectionManager::<PgConnection>::new(&self.database_url);
        Pool::builder()
            .max_size(self.connection_pool_size)
            .build(manager)
            .map_err(|e| SyncError::storage(format!("failed to create connection pool: {e}")))
    }
}

fn get_connection(pool: &PgPool) -> SyncResult<PgPooled> {
    pool.get()
        .map_err(|e| SyncError::storage(format!("failed to get database connection: {e}")))
}

fn map_insert_error(error: diesel::result::Error) -> SyncError {
    use diesel::result::{DatabaseErrorKind, Error};
    match error {
        Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            SyncError::duplicate_key(info.message().to_string())
        }
        other => SyncError::storage(other.to_string()),
    }
}

fn map_query_error(error: diesel::result::Error) -> SyncError {
    SyncError::storage(error.to_string())
}

// ================================
// Event store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = sync_events)]
struct EventRecord {
    id: Uuid,
    document_id: String,
    recorded_at: DateTime<Utc>,
    sequence_num: i64,
    server_seq: i64,
    operation: String,
    diff: Option<Value>,
    vector_clock: Value,
    client_id: String,
    metadata: Value,
}

impl EventRecord {
    fn from_event(event: &Event) -> SyncResult<Self> {
        Ok(Self {
            id: event.event_id,
            document_id: event.document_id.clone(),
            recorded_at: event.timestamp,
            sequence_num: event.sequence_num,
            server_seq: event.server_seq,
            operation: event.operation.as_str().to_string(),
            diff: event
                .diff
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
            vector_clock: serde_json::to_value(&event.vector_clock)?,
            client_id: event.client_id.clone(),
            metadata: serde_json::to_value(&event.metadata)?,
        })
    }

    fn into_event(self) -> SyncResult<Event> {
        let operation: Operation = self.operation.parse()?;
        let diff = self.diff.map(serde_json::from_value).transpose()?;
        let vector_clock: VectorClock = serde_json::from_value(self.vector_clock)?;
        let metadata: HashMap<String, Value> = serde_json::from_value(self.metadata)?;

        Ok(Event {
            event_id: self.id,
            document_id: self.document_id,
            timestamp: self.recorded_at,
            sequence_num: self.sequence_num,
            server_seq: self.server_seq,
            operation,
            diff,
            vector_clock,
            client_id: self.client_id,
            metadata,
        })
    }
}

/// PostgreSQL implementation of the event store.
pub struct PostgresEventStore {
    pool: Arc<PgPool>,
    sequence_lock: Mutex<()>,
}

impl PostgresEventStore {
    pub fn new(config: &PostgresConfig) -> SyncResult<Self> {
        Ok(Self {
            pool: Arc::new(config.build_pool()?),
            sequence_lock: Mutex::new(()),
        })
    }

    /// Create the event table and its indexes if they do not exist.
    pub fn ensure_schema(&self) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let statements = [
            "CREATE TABLE IF NOT EXISTS sync_events (
                id UUID PRIMARY KEY,
                document_id TEXT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL,
                sequence_num BIGINT NOT NULL,
                server_seq BIGINT NOT NULL,
                operation TEXT NOT NULL,
                diff JSONB,
                vector_clock JSONB NOT NULL,
                client_id TEXT NOT NULL,
                metadata JSONB NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_events_document_sequence
             ON sync_events(document_id, sequence_num)",
            "CREATE INDEX IF NOT EXISTS idx_sync_events_document_recorded
             ON sync_events(document_id, recorded_at)",
            "CREATE INDEX IF NOT EXISTS idx_sync_events_client
             ON sync_events(client_id)",
        ];
        for statement in statements {
            diesel::sql_query(statement)
                .execute(&mut conn)
                .map_err(map_query_error)?;
        }
        Ok(())
    }

    fn max_sequence(conn: &mut PgConnection, document: &str) -> SyncResult<i64> {
        let max: Option<i64> = sync_events::table
            .filter(sync_events::document_id.eq(document))
            .select(diesel::dsl::max(sync_events::sequence_num))
            .first(conn)
            .map_err(map_query_error)?;
        Ok(max.unwrap_or(0))
    }

    fn insert(&self, conn: &mut PgConnection, mut event: Event) -> SyncResult<Event> {
        if event.event_id.is_nil() {
            event.event_id = Uuid::new_v4();
        }
        if event.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            event.timestamp = Utc::now();
        }
        if event.sequence_num == 0 {
            event.sequence_num = Self::max_sequence(conn, &event.document_id)? + 1;
        }

        let record = EventRecord::from_event(&event)?;
        diesel::insert_into(sync_events::table)
            .values(&record)
            .execute(conn)
            .map_err(map_insert_error)?;
        Ok(event)
    }

    fn load_ordered(
        &self,
        document: &str,
    ) -> SyncResult<Vec<Event>> {
        let mut conn = get_connection(&self.pool)?;
        let records: Vec<EventRecord> = sync_events::table
            .filter(sync_events::document_id.eq(document))
            .order(sync_events::sequence_num.asc())
            .load(&mut conn)
            .map_err(map_query_error)?;
        records.into_iter().map(EventRecord::into_event).collect()
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(&self, event: Event) -> SyncResult<Event> {
        let _guard = self.sequence_lock.lock().await;
        let mut conn = get_connection(&self.pool)?;
        self.insert(&mut conn, event)
    }

    async fn append_batch(&self, events: Vec<Event>) -> SyncResult<Vec<Event>> {
        let _guard = self.sequence_lock.lock().await;
        let mut conn = get_connection(&self.pool)?;
        conn.transaction::<Vec<Event>, SyncError, _>(|conn| {
            let mut stored = Vec::with_capacity(events.len());
            for event in events {
                stored.push(self.insert(conn, event)?);
            }
            Ok(stored)
        })
    }

    async fn events_after_sequence(
        &self,
        document_id: &str,
        after_sequence: i64,
    ) -> SyncResult<Vec<Event>> {
        let mut conn = get_connection(&self.pool)?;
        let records: Vec<EventRecord> = sync_events::table
            .filter(sync_events::document_id.eq(document_id))
            .filter(sync_events::sequence_num.gt(after_sequence))
            .order(sync_events::sequence_num.asc())
            .load(&mut conn)
            .map_err(map_query_error)?;
        records.into_iter().map(EventRecord::into_event).collect()
    }

    async fn events_after_version(
        &self,
        document_id: &str,
        after_version: i64,
    ) -> SyncResult<Vec<Event>> {
        let mut conn = get_connection(&self.pool)?;
        let records: Vec<EventRecord> = sync_events::table
            .filter(sync_events::document_id.eq(document_id))
            .filter(sync_events::server_seq.gt(after_version))
            .order((sync_events::server_seq.asc(), sync_events::sequence_num.asc()))
            .load(&mut conn)
            .map_err(map_query_error)?;
        records.into_iter().map(EventRecord::into_event).collect()
    }

    async fn latest_sequence(&self, document_id: &str) -> SyncResult<i64> {
        let mut conn = get_connection(&self.pool)?;
        Self::max_sequence(&mut conn, document_id)
    }

    async fn latest_version(&self, document_id: &str) -> SyncResult<i64> {
        let mut conn = get_connection(&self.pool)?;
        let max: Option<i64> = sync_events::table
            .filter(sync_events::document_id.eq(document_id))
            .select(diesel::dsl::max(sync_events::server_seq))
            .first(&mut conn)
            .map_err(map_query_error)?;
        Ok(max.unwrap_or(0))
    }

    async fn events_by_vector_clock(
        &self,
        document_id: &str,
        clock: &VectorClock,
    ) -> SyncResult<Vec<Event>> {
        // The frontier filter is applied in process; the scan itself rides
        // the (document_id, sequence_num) index.
        let events = self.load_ordered(document_id)?;
        Ok(events
            .into_iter()
            .filter(|e| {
                !clock.contains(&e.client_id) || e.sequence_num > clock.get(&e.client_id)
            })
            .collect())
    }
}

// ================================
// Snapshot store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = sync_snapshots)]
struct SnapshotRecord {
    id: Uuid,
    document_id: String,
    state: Value,
    version: i64,
    sequence_num: i64,
    server_seq: i64,
    created_at: DateTime<Utc>,
}

impl From<SnapshotRecord> for Snapshot {
    fn from(record: SnapshotRecord) -> Self {
        Snapshot {
            snapshot_id: record.id,
            document_id: record.document_id,
            state: record.state,
            version: record.version,
            sequence_num: record.sequence_num,
            server_seq: record.server_seq,
            created_at: record.created_at,
        }
    }
}

pub struct PostgresSnapshotStore {
    pool: Arc<PgPool>,
}

impl PostgresSnapshotStore {
    pub fn new(config: &PostgresConfig) -> SyncResult<Self> {
        Ok(Self {
            pool: Arc::new(config.build_pool()?),
        })
    }

    pub fn ensure_schema(&self) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let statements = [
            "CREATE TABLE IF NOT EXISTS sync_snapshots (
                id UUID PRIMARY KEY,
                document_id TEXT NOT NULL,
                state JSONB NOT NULL,
                version BIGINT NOT NULL,
                sequence_num BIGINT NOT NULL,
                server_seq BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_sync_snapshots_document_version
             ON sync_snapshots(document_id, version DESC)",
        ];
        for statement in statements {
            diesel::sql_query(statement)
                .execute(&mut conn)
                .map_err(map_query_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn insert(&self, snapshot: Snapshot) -> SyncResult<Snapshot> {
        let mut conn = get_connection(&self.pool)?;
        let record = SnapshotRecord {
            id: snapshot.snapshot_id,
            document_id: snapshot.document_id.clone(),
            state: snapshot.state.clone(),
            version: snapshot.version,
            sequence_num: snapshot.sequence_num,
            server_seq: snapshot.server_seq,
            created_at: snapshot.created_at,
        };
        diesel::insert_into(sync_snapshots::table)
            .values(&record)
            .execute(&mut conn)
            .map_err(map_insert_error)?;
        Ok(snapshot)
    }

    async fn latest(&self, document_id: &str) -> SyncResult<Option<Snapshot>> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SnapshotRecord> = sync_snapshots::table
            .filter(sync_snapshots::document_id.eq(document_id))
            .order((sync_snapshots::version.desc(), sync_snapshots::created_at.desc()))
            .first(&mut conn)
            .optional()
            .map_err(map_query_error)?;
        Ok(record.map(Snapshot::from))
    }

    async fn by_sequence(
        &self,
        document_id: &str,
        max_sequence: i64,
    ) -> SyncResult<Option<Snapshot>> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SnapshotRecord> = sync_snapshots::table
            .filter(sync_snapshots::document_id.eq(document_id))
            .filter(sync_snapshots::sequence_num.le(max_sequence))
            .order((sync_snapshots::sequence_num.desc(), sync_snapshots::created_at.desc()))
            .first(&mut conn)
            .optional()
            .map_err(map_query_error)?;
        Ok(record.map(Snapshot::from))
    }

    async fn by_server_seq(
        &self,
        document_id: &str,
        max_server_seq: i64,
    ) -> SyncResult<Option<Snapshot>> {
        let mut conn = get_connection(&self.pool)?;
        let record: Option<SnapshotRecord> = sync_snapshots::table
            .filter(sync_snapshots::document_id.eq(document_id))
            .filter(sync_snapshots::server_seq.le(max_server_seq))
            .order((sync_snapshots::server_seq.desc(), sync_snapshots::created_at.desc()))
            .first(&mut conn)
            .optional()
            .map_err(map_query_error)?;
        Ok(record.map(Snapshot::from))
    }

    async fn delete_before(&self, document_id: &str, sequence_num: i64) -> SyncResult<usize> {
        let mut conn = get_connection(&self.pool)?;
        diesel::delete(
            sync_snapshots::table
                .filter(sync_snapshots::document_id.eq(document_id))
                .filter(sync_snapshots::sequence_num.lt(sequence_num)),
        )
        .execute(&mut conn)
        .map_err(map_query_error)
    }

    async fn delete_before_server_seq(
        &self,
        document_id: &str,
        server_seq: i64,
    ) -> SyncResult<usize> {
        let mut conn = get_connection(&self.pool)?;
        diesel::delete(
            sync_snapshots::table
                .filter(sync_snapshots::document_id.eq(document_id))
                .filter(sync_snapshots::server_seq.lt(server_seq)),
        )
        .execute(&mut conn)
        .map_err(map_query_error)
    }
}

// ================================
// State vector store
// ================================

#[derive(Debug, Clone, Queryable, Insertable, Selectable)]
#[diesel(table_name = sync_state_vectors)]
struct StateVectorRecord {
    id: Uuid,
    client_id: String,
    document_id: String,
    vector_clock: Value,
    last_updated: DateTime<Utc>,
}

impl StateVectorRecord {
    fn into_state_vector(self) -> SyncResult<StateVector> {
        let vector_clock: VectorClock = serde_json::from_value(self.vector_clock)?;
        Ok(StateVector {
            state_vector_id: self.id,
            client_id: self.client_id,
            document_id: self.document_id,
            vector_clock,
            last_updated: self.last_updated,
        })
    }
}

pub struct PostgresStateVectorStore {
    pool: Arc<PgPool>,
}

impl PostgresStateVectorStore {
    pub fn new(config: &PostgresConfig) -> SyncResult<Self> {
        Ok(Self {
            pool: Arc::new(config.build_pool()?),
        })
    }

    pub fn ensure_schema(&self) -> SyncResult<()> {
        let mut conn = get_connection(&self.pool)?;
        let statements = [
            "CREATE TABLE IF NOT EXISTS sync_state_vectors (
                id UUID PRIMARY KEY,
                client_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                vector_clock JSONB NOT NULL,
                last_updated TIMESTAMPTZ NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_state_vectors_client_document
             ON sync_state_vectors(client_id, document_id)",
        ];
        for statement in statements {
            diesel::sql_query(statement)
                .execute(&mut conn)
                .map_err(map_query_error)?;
        }
        Ok(())
    }

    fn find(
        conn: &mut PgConnection,
        client: &str,
        document: &str,
    ) -> SyncResult<Option<StateVector>> {
        let record: Option<StateVectorRecord> = sync_state_vectors::table
            .filter(sync_state_vectors::client_id.eq(client))
            .filter(sync_state_vectors::document_id.eq(document))
            .first(conn)
            .optional()
            .map_err(map_query_error)?;
        record.map(StateVectorRecord::into_state_vector).transpose()
    }
}

#[async_trait]
impl StateVectorStore for PostgresStateVectorStore {
    async fn get_or_create(&self, client_id: &str, document_id: &str) -> SyncResult<StateVector> {
        let mut conn = get_connection(&self.pool)?;

        // Insert-if-absent; the unique index makes concurrent first reads
        // converge on one record.
        let fresh = StateVector::new(client_id, document_id);
        let record = StateVectorRecord {
            id: fresh.state_vector_id,
            client_id: fresh.client_id.clone(),
            document_id: fresh.document_id.clone(),
            vector_clock: serde_json::to_value(&fresh.vector_clock)?,
            last_updated: fresh.last_updated,
        };
        diesel::insert_into(sync_state_vectors::table)
            .values(&record)
            .on_conflict((
                sync_state_vectors::client_id,
                sync_state_vectors::document_id,
            ))
            .do_nothing()
            .execute(&mut conn)
            .map_err(map_query_error)?;

        Self::find(&mut conn, client_id, document_id)?.ok_or_else(|| {
            SyncError::invalid_state(format!(
                "state vector ({client_id}, {document_id}) vanished after upsert"
            ))
        })
    }

    async fn upsert(&self, state_vector: StateVector) -> SyncResult<StateVector> {
        let mut conn = get_connection(&self.pool)?;
        let record = StateVectorRecord {
            id: state_vector.state_vector_id,
            client_id: state_vector.client_id.clone(),
            document_id: state_vector.document_id.clone(),
            vector_clock: serde_json::to_value(&state_vector.vector_clock)?,
            last_updated: Utc::now(),
        };
        diesel::insert_into(sync_state_vectors::table)
            .values(&record)
            .on_conflict((
                sync_state_vectors::client_id,
                sync_state_vectors::document_id,
            ))
            .do_update()
            .set((
                sync_state_vectors::vector_clock.eq(&record.vector_clock),
                sync_state_vectors::last_updated.eq(&record.last_updated),
            ))
            .execute(&mut conn)
            .map_err(map_query_error)?;

        Self::find(&mut conn, &state_vector.client_id, &state_vector.document_id)?.ok_or_else(
            || {
                SyncError::invalid_state(format!(
                    "state vector ({}, {}) vanished after upsert",
                    state_vector.client_id, state_vector.document_id
                ))
            },
        )
    }

    async fn delete_client(&self, client_id: &str) -> SyncResult<usize> {
        let mut conn = get_connection(&self.pool)?;
        diesel::delete(
            sync_state_vectors::table.filter(sync_state_vectors::client_id.eq(client_id)),
        )
        .execute(&mut conn)
        .map_err(map_query_error)
    }
}
