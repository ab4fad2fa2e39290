//! PostgreSQL-backed durable log.
//!
//! Table names come from [`SchemaConfig`], so every statement is built once at
//! construction time and executed with runtime-checked `sqlx::query`.

use super::connection::DatabaseConnection;
use super::migrations::SchemaMigrations;
use super::store::{MessageStore, StoreTransaction};
use crate::config::{DatabaseConfig, SchemaConfig};
use crate::error::StorageResult;
use crate::models::{
    EnvelopeUpdate, HandlerMessage, HandlerMessageLog, Host, HostType, MessageBody,
    MessageTypeRow,
};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Pre-rendered SQL for one schema configuration
#[derive(Debug)]
struct Statements {
    insert_host_type: String,
    insert_message_type: String,
    insert_host: String,
    insert_message_body: String,
    insert_handler_message: String,
    update_handler_message: String,
    insert_handler_message_log: String,
    select_handler_message: String,
    select_message_body: String,
    select_handler_message_logs: String,
}

impl Statements {
    fn new(schema: &SchemaConfig) -> Self {
        let host_type = schema.qualified(&schema.host_type_table);
        let message_type = schema.qualified(&schema.message_type_table);
        let host = schema.qualified(&schema.host_table);
        let body = schema.qualified(&schema.message_body_table);
        let message = schema.qualified(&schema.handler_message_table);
        let log = schema.qualified(&schema.handler_message_log_table);

        Self {
            insert_host_type: format!(
                r#"INSERT INTO {host_type} ("IdHostType", "Name") VALUES ($1, $2)
                   ON CONFLICT DO NOTHING"#
            ),
            insert_message_type: format!(
                r#"INSERT INTO {message_type} ("IdMessageType", "Name", "TimeCreatedUtc")
                   VALUES ($1, $2, $3)
                   ON CONFLICT DO NOTHING"#
            ),
            insert_host: format!(
                r#"INSERT INTO {host} ("IdHost", "IdHostType", "ApplicationName", "MachineName",
                   "ProcessId", "RuntimeUniqueKey", "TimeCreatedUtc")
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#
            ),
            insert_message_body: format!(
                r#"INSERT INTO {body} ("IdMessageBody", "IdMessageType", "Data")
                   VALUES ($1, $2, $3)"#
            ),
            insert_handler_message: format!(
                r#"INSERT INTO {message} ("IdHandlerMessage", "IdHost", "IdMessageType",
                   "IdCorrespondingMessage", "IdSession", "TimeCreatedUtc", "IdMessageStatus",
                   "RuntimeUniqueKey", "IdMessageBody", "SyncToken")
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#
            ),
            update_handler_message: format!(
                r#"UPDATE {message}
                   SET "IdMessageStatus" = COALESCE($4, "IdMessageStatus"),
                       "IdCorrespondingMessage" = COALESCE($5, "IdCorrespondingMessage"),
                       "SyncToken" = $3
                   WHERE "IdHandlerMessage" = $1
                     AND "SyncToken" = $2
                     AND ($5::uuid IS NULL OR "IdCorrespondingMessage" IS NULL)"#
            ),
            insert_handler_message_log: format!(
                r#"INSERT INTO {log} ("IdHandlerMessageLog", "IdHandlerMessage", "IdMessageStatus",
                   "LogLevel", "Message", "Detail", "TraceId", "IdHost", "TimeCreatedUtc")
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#
            ),
            select_handler_message: format!(
                r#"SELECT "IdHandlerMessage", "IdHost", "IdMessageType", "IdCorrespondingMessage",
                   "IdSession", "TimeCreatedUtc", "IdMessageStatus", "RuntimeUniqueKey",
                   "IdMessageBody", "SyncToken"
                   FROM {message} WHERE "IdHandlerMessage" = $1"#
            ),
            select_message_body: format!(
                r#"SELECT "IdMessageBody", "IdMessageType", "Data"
                   FROM {body} WHERE "IdMessageBody" = $1"#
            ),
            select_handler_message_logs: format!(
                r#"SELECT "IdHandlerMessageLog", "IdHandlerMessage", "IdMessageStatus", "LogLevel",
                   "Message", "Detail", "TraceId", "IdHost", "TimeCreatedUtc"
                   FROM {log} WHERE "IdHandlerMessage" = $1
                   ORDER BY "Sequence""#
            ),
        }
    }
}

/// [`MessageStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
    schema: SchemaConfig,
    sql: Arc<Statements>,
}

impl PgMessageStore {
    pub fn new(pool: PgPool, schema: SchemaConfig) -> Self {
        let sql = Arc::new(Statements::new(&schema));
        Self { pool, schema, sql }
    }

    /// Connect a pool from configuration and wrap it
    pub async fn connect(database: &DatabaseConfig, schema: SchemaConfig) -> StorageResult<Self> {
        let connection = DatabaseConnection::connect(database).await?;
        Ok(Self::new(connection.into_pool(), schema))
    }

    /// Create the schema and tables if they do not exist yet
    pub async fn migrate(&self) -> StorageResult<()> {
        SchemaMigrations::run(&self.pool, &self.schema).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &SchemaConfig {
        &self.schema
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTransaction {
            tx,
            sql: Arc::clone(&self.sql),
        }))
    }

    async fn close(&self) {
        info!(schema = %self.schema.schema_name, "Closing PostgreSQL message store");
        self.pool.close().await;
    }
}

struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
    sql: Arc<Statements>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    async fn insert_host_type_if_absent(&mut self, row: &HostType) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_host_type)
            .bind(row.id_host_type)
            .bind(&row.name)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_message_type_if_absent(
        &mut self,
        row: &MessageTypeRow,
    ) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_message_type)
            .bind(row.id_message_type)
            .bind(&row.name)
            .bind(row.time_created_utc)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_host(&mut self, row: &Host) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_host)
            .bind(row.id_host)
            .bind(row.id_host_type)
            .bind(&row.application_name)
            .bind(&row.machine_name)
            .bind(row.process_id)
            .bind(row.runtime_unique_key)
            .bind(row.time_created_utc)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_message_body(&mut self, row: &MessageBody) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_message_body)
            .bind(row.id_message_body)
            .bind(row.id_message_type)
            .bind(&row.data)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_handler_message(&mut self, row: &HandlerMessage) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_handler_message)
            .bind(row.id_handler_message)
            .bind(row.id_host)
            .bind(row.id_message_type)
            .bind(row.id_corresponding_message)
            .bind(row.id_session)
            .bind(row.time_created_utc)
            .bind(row.id_message_status)
            .bind(row.runtime_unique_key)
            .bind(row.id_message_body)
            .bind(row.sync_token)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn update_handler_message(&mut self, update: &EnvelopeUpdate) -> StorageResult<u64> {
        let status = match update.status {
            crate::constants::MessageStatus::Unchanged => None,
            status => Some(status.code()),
        };
        let result = sqlx::query(&self.sql.update_handler_message)
            .bind(update.id_handler_message)
            .bind(update.expected_sync_token)
            .bind(update.new_sync_token)
            .bind(status)
            .bind(update.set_corresponding)
            .execute(&mut *self.tx)
            .await?;
        debug!(
            envelope_id = %update.id_handler_message,
            rows = result.rows_affected(),
            "Envelope compare-and-swap"
        );
        Ok(result.rows_affected())
    }

    async fn insert_handler_message_log(
        &mut self,
        row: &HandlerMessageLog,
    ) -> StorageResult<u64> {
        let result = sqlx::query(&self.sql.insert_handler_message_log)
            .bind(row.id_handler_message_log)
            .bind(row.id_handler_message)
            .bind(row.id_message_status)
            .bind(&row.log_level)
            .bind(&row.message)
            .bind(&row.detail)
            .bind(row.trace_id)
            .bind(row.id_host)
            .bind(row.time_created_utc)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_handler_message(&mut self, id: Uuid) -> StorageResult<Option<HandlerMessage>> {
        let row = sqlx::query_as::<_, HandlerMessage>(&self.sql.select_handler_message)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn fetch_message_body(&mut self, id: Uuid) -> StorageResult<Option<MessageBody>> {
        let row = sqlx::query_as::<_, MessageBody>(&self.sql.select_message_body)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn fetch_handler_message_logs(
        &mut self,
        id_handler_message: Uuid,
    ) -> StorageResult<Vec<HandlerMessageLog>> {
        let rows = sqlx::query_as::<_, HandlerMessageLog>(&self.sql.select_handler_message_logs)
            .bind(id_handler_message)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
