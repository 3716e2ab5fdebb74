use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures_util::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row};
use std::collections::HashMap;
use std::env;

use super::config::{quote_ident, EventStoreConfiguration};
use super::table::{EventTable, NewEventRow, StoredEventRow};
use crate::error::{EventSourcingError, Result};

// ============================================================================
// Postgres Event Table
// ============================================================================
//
// Table and column names come from the store configuration, so the SQL is
// assembled per call from quoted identifiers; values are always bound.
//
// ============================================================================

enum PgSession<'c> {
    /// Acquired from a pool; returned to it on release.
    Pooled(PoolConnection<Postgres>),
    /// Owned by the caller (e.g. an open transaction); never released here.
    Borrowed(&'c mut PgConnection),
}

pub struct PgEventTable<'c> {
    session: Option<PgSession<'c>>,
}

impl PgEventTable<'static> {
    pub async fn acquire(pool: &PgPool) -> Result<Self> {
        let connection = pool.acquire().await?;
        Ok(Self::from_pool_connection(connection))
    }

    pub fn from_pool_connection(connection: PoolConnection<Postgres>) -> Self {
        Self {
            session: Some(PgSession::Pooled(connection)),
        }
    }
}

impl<'c> PgEventTable<'c> {
    /// Run on a caller-owned connection, typically `&mut *transaction`, so
    /// inserts join the caller's transaction.
    pub fn from_connection(connection: &'c mut PgConnection) -> Self {
        Self {
            session: Some(PgSession::Borrowed(connection)),
        }
    }

    fn connection(&mut self) -> Result<&mut PgConnection> {
        match self.session.as_mut() {
            Some(PgSession::Pooled(connection)) => Ok(&mut **connection),
            Some(PgSession::Borrowed(connection)) => Ok(&mut **connection),
            None => Err(EventSourcingError::Disposed),
        }
    }
}

pub fn insert_statement(config: &EventStoreConfiguration) -> String {
    let [_, key, event_type, payload, metadata, _, version, correlation_id] =
        config.quoted_columns();
    format!(
        "insert into {} ({}, {}, {}, {}, {}, {}) values ($1, $2, $3, $4, $5, $6)",
        config.qualified_table(),
        key,
        event_type,
        payload,
        metadata,
        version,
        correlation_id
    )
}

pub fn select_statement(config: &EventStoreConfiguration) -> String {
    let [id, key, event_type, payload, metadata, timestamp, version, correlation_id] =
        config.quoted_columns();
    format!(
        "select {id}, {event_type}, {payload}, {metadata}, {timestamp}, {version}, {correlation_id} \
         from {table} where {key} = $1 order by {id}",
        table = config.qualified_table(),
    )
}

#[async_trait]
impl<'c> EventTable for PgEventTable<'c> {
    async fn insert(&mut self, config: &EventStoreConfiguration, row: NewEventRow) -> Result<()> {
        let sql = insert_statement(config);
        let connection = self.connection()?;

        sqlx::query(&sql)
            .bind(row.key)
            .bind(row.event_type)
            .bind(row.payload)
            .bind(row.metadata)
            .bind(row.version)
            .bind(row.correlation_id)
            .execute(connection)
            .await?;

        Ok(())
    }

    async fn select_by_key(
        &mut self,
        config: &EventStoreConfiguration,
        key: &str,
    ) -> Result<Vec<StoredEventRow>> {
        let sql = select_statement(config);
        let connection = self.connection()?;

        let mut rows = sqlx::query(&sql).bind(key).fetch(connection);
        let mut stored = Vec::new();
        while let Some(row) = rows.try_next().await? {
            stored.push(read_row(&row, config, key));
        }

        Ok(stored)
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            match session {
                PgSession::Pooled(_) => tracing::debug!("Returned event store connection to pool"),
                PgSession::Borrowed(_) => {}
            }
        }
        Ok(())
    }
}

fn read_row(row: &PgRow, config: &EventStoreConfiguration, key: &str) -> StoredEventRow {
    StoredEventRow {
        id: read_id(row, &config.id_column),
        key: key.to_string(),
        event_type: read_text(row, &config.type_column),
        payload: read_text(row, &config.payload_column),
        metadata: read_text(row, &config.metadata_column),
        timestamp: read_timestamp(row, &config.timestamp_column),
        version: read_text(row, &config.version_column),
        correlation_id: read_text(row, &config.correlation_id_column),
    }
}

/// bigint, integer or smallint identifiers; anything else reads as 0.
fn read_id(row: &PgRow, column: &str) -> i64 {
    if let Ok(id) = row.try_get::<i64, _>(column) {
        return id;
    }
    if let Ok(id) = row.try_get::<i32, _>(column) {
        return id.into();
    }
    row.try_get::<i16, _>(column).map(i64::from).unwrap_or(0)
}

/// Text columns, or json/jsonb rendered back to text.
fn read_text(row: &PgRow, column: &str) -> Option<String> {
    if let Ok(value) = row.try_get::<Option<String>, _>(column) {
        return value;
    }
    row.try_get::<Option<serde_json::Value>, _>(column)
        .ok()
        .flatten()
        .map(|value| value.to_string())
}

/// timestamptz, or timestamp interpreted as UTC.
fn read_timestamp(row: &PgRow, column: &str) -> Option<DateTime<Utc>> {
    if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(column) {
        return value;
    }
    row.try_get::<Option<NaiveDateTime>, _>(column)
        .ok()
        .flatten()
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Schema
// ============================================================================

pub fn schema_statements(config: &EventStoreConfiguration) -> Vec<String> {
    let [id, key, event_type, payload, metadata, timestamp, version, correlation_id] =
        config.quoted_columns();
    let table = config.qualified_table();
    let index = quote_ident(&format!("ix_{}_{}", config.target_table, config.key_column));

    let mut statements = Vec::new();
    if let Some(schema) = &config.target_schema {
        statements.push(format!("create schema if not exists {}", quote_ident(schema)));
    }
    statements.push(format!(
        "create table if not exists {table} (
            {id} bigserial primary key,
            {key} text not null,
            {event_type} text not null,
            {payload} text not null,
            {metadata} text not null,
            {timestamp} timestamptz not null default now(),
            {version} text not null,
            {correlation_id} text null
        )"
    ));
    statements.push(format!(
        "create index if not exists {index} on {table} ({key}, {id})"
    ));
    statements
}

/// Create the schema, table and key index for a configuration if missing.
pub async fn ensure_schema(connection: &mut PgConnection, config: &EventStoreConfiguration) -> Result<()> {
    for statement in schema_statements(config) {
        sqlx::query(&statement).execute(&mut *connection).await?;
    }

    tracing::info!(table = %config.target_table_fqn(), "Event store schema ready");
    Ok(())
}

// ============================================================================
// Connections
// ============================================================================

/// Default pool plus pools selectable by `connection_key`.
#[derive(Clone, Debug)]
pub struct PgConnections {
    default: PgPool,
    named: HashMap<String, PgPool>,
}

impl PgConnections {
    pub fn new(default: PgPool) -> Self {
        Self {
            default,
            named: HashMap::new(),
        }
    }

    pub fn with_named(mut self, key: impl Into<String>, pool: PgPool) -> Self {
        self.named.insert(key.into(), pool);
        self
    }

    pub fn pool(&self, key: Option<&str>) -> Result<&PgPool> {
        match key {
            None => Ok(&self.default),
            Some(key) => self
                .named
                .get(key)
                .ok_or_else(|| EventSourcingError::ConnectionNotFound { key: key.to_string() }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub schema: Option<String>,
}

impl DatabaseConfig {
    /// Reads `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS` and
    /// `EVENT_STORE_SCHEMA`, after loading `.env` if one exists.
    /// `None` when no database URL is configured.
    pub fn from_env() -> Option<Self> {
        let _ = dotenvy::dotenv();

        let url = env::var("DATABASE_URL").ok()?;
        let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8);
        let schema = env::var("EVENT_STORE_SCHEMA").ok().filter(|s| !s.is_empty());

        Some(Self {
            url,
            max_connections,
            schema,
        })
    }

    pub async fn connect(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;
        Ok(pool)
    }
}
