//! # Schema Migrations
//!
//! Idempotent DDL for the six tables of the durable log.
//!
//! Several processes may start against the same database at once, so the DDL
//! runs inside one transaction holding a transaction-scoped advisory lock
//! keyed on the schema name:
//!
//! ```sql
//! SELECT pg_advisory_xact_lock(hashtext('bus')::bigint)
//! ```
//!
//! The lock is released by the commit; every statement uses `IF NOT EXISTS`
//! so late arrivals find nothing left to do.

use crate::config::SchemaConfig;
use crate::error::StorageResult;
use crate::logging::log_storage_operation;
use sqlx::PgPool;

/// Creates the durable log schema under an advisory lock.
pub struct SchemaMigrations;

impl SchemaMigrations {
    pub async fn run(pool: &PgPool, schema: &SchemaConfig) -> StorageResult<()> {
        let mut tx = pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(&schema.schema_name)
            .execute(&mut *tx)
            .await?;

        sqlx::raw_sql(&Self::ddl(schema)).execute(&mut *tx).await?;
        tx.commit().await?;

        log_storage_operation(
            "schema_migrated",
            None,
            None,
            "ok",
            Some(&schema.schema_name),
        );
        Ok(())
    }

    /// DDL for the configured schema
    pub fn ddl(schema: &SchemaConfig) -> String {
        let host_type = schema.qualified(&schema.host_type_table);
        let message_type = schema.qualified(&schema.message_type_table);
        let host = schema.qualified(&schema.host_table);
        let body = schema.qualified(&schema.message_body_table);
        let message = schema.qualified(&schema.handler_message_table);
        let log = schema.qualified(&schema.handler_message_log_table);
        let session_index = format!("\"IX_{}_IdSession\"", schema.handler_message_table);
        let log_index = format!("\"IX_{}_IdHandlerMessage\"", schema.handler_message_log_table);

        format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS "{schema_name}";

            CREATE TABLE IF NOT EXISTS {host_type} (
                "IdHostType" UUID PRIMARY KEY,
                "Name" TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS {message_type} (
                "IdMessageType" UUID PRIMARY KEY,
                "Name" TEXT NOT NULL UNIQUE,
                "TimeCreatedUtc" TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {host} (
                "IdHost" UUID PRIMARY KEY,
                "IdHostType" UUID NOT NULL REFERENCES {host_type} ("IdHostType"),
                "ApplicationName" TEXT NOT NULL,
                "MachineName" TEXT NOT NULL,
                "ProcessId" INTEGER NOT NULL,
                "RuntimeUniqueKey" UUID NOT NULL,
                "TimeCreatedUtc" TIMESTAMPTZ NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {body} (
                "IdMessageBody" UUID PRIMARY KEY,
                "IdMessageType" UUID NOT NULL REFERENCES {message_type} ("IdMessageType"),
                "Data" TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {message} (
                "IdHandlerMessage" UUID PRIMARY KEY,
                "IdHost" UUID NOT NULL REFERENCES {host} ("IdHost"),
                "IdMessageType" UUID NOT NULL REFERENCES {message_type} ("IdMessageType"),
                "IdCorrespondingMessage" UUID NULL,
                "IdSession" UUID NULL,
                "TimeCreatedUtc" TIMESTAMPTZ NOT NULL,
                "IdMessageStatus" INTEGER NOT NULL,
                "RuntimeUniqueKey" UUID NOT NULL,
                "IdMessageBody" UUID NOT NULL REFERENCES {body} ("IdMessageBody"),
                "SyncToken" UUID NOT NULL
            );

            CREATE INDEX IF NOT EXISTS {session_index} ON {message} ("IdSession");

            CREATE TABLE IF NOT EXISTS {log} (
                "IdHandlerMessageLog" UUID PRIMARY KEY,
                "Sequence" BIGSERIAL NOT NULL,
                "IdHandlerMessage" UUID NOT NULL REFERENCES {message} ("IdHandlerMessage"),
                "IdMessageStatus" INTEGER NULL,
                "LogLevel" TEXT NOT NULL,
                "Message" TEXT NOT NULL,
                "Detail" TEXT NULL,
                "TraceId" UUID NULL,
                "IdHost" UUID NULL,
                "TimeCreatedUtc" TIMESTAMPTZ NOT NULL
            );

            CREATE INDEX IF NOT EXISTS {log_index} ON {log} ("IdHandlerMessage", "Sequence");
            "#,
            schema_name = schema.schema_name,
        )
    }
}
