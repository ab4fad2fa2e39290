//! Envelope logger: every entry goes to `tracing` and to the audit table.

use crate::constants::{tables, LogLevel, MessageStatus};
use crate::database::StoreTransaction;
use crate::error::{StorageError, StorageResult};
use crate::models::NewHandlerMessageLog;
use crate::transaction::TransactionContext;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MessageLogger {
    host_id: Option<Uuid>,
}

impl MessageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every row written by this logger with `host_id`
    pub fn for_host(host_id: Uuid) -> Self {
        Self {
            host_id: Some(host_id),
        }
    }

    pub fn host_id(&self) -> Option<Uuid> {
        self.host_id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn log(
        &self,
        transaction: &TransactionContext,
        level: LogLevel,
        envelope_id: Uuid,
        status: MessageStatus,
        message: String,
        detail: Option<String>,
        trace_id: Option<Uuid>,
    ) -> StorageResult<()> {
        let entry = self.entry(level, envelope_id, status, message, detail, trace_id);
        let mut store_tx = transaction.store().await?;
        self.write(&mut *store_tx, entry).await
    }

    pub async fn log_information(
        &self,
        transaction: &TransactionContext,
        envelope_id: Uuid,
        status: MessageStatus,
        message: impl Into<String>,
        trace_id: Option<Uuid>,
    ) -> StorageResult<()> {
        self.log(
            transaction,
            LogLevel::Information,
            envelope_id,
            status,
            message.into(),
            None,
            trace_id,
        )
        .await
    }

    pub async fn log_warning(
        &self,
        transaction: &TransactionContext,
        envelope_id: Uuid,
        status: MessageStatus,
        message: impl Into<String>,
        detail: Option<String>,
        trace_id: Option<Uuid>,
    ) -> StorageResult<()> {
        self.log(
            transaction,
            LogLevel::Warning,
            envelope_id,
            status,
            message.into(),
            detail,
            trace_id,
        )
        .await
    }

    pub async fn log_error(
        &self,
        transaction: &TransactionContext,
        envelope_id: Uuid,
        status: MessageStatus,
        message: impl Into<String>,
        detail: Option<String>,
        trace_id: Option<Uuid>,
    ) -> StorageResult<()> {
        self.log(
            transaction,
            LogLevel::Error,
            envelope_id,
            status,
            message.into(),
            detail,
            trace_id,
        )
        .await
    }

    pub async fn log_critical(
        &self,
        transaction: &TransactionContext,
        envelope_id: Uuid,
        status: MessageStatus,
        message: impl Into<String>,
        detail: Option<String>,
        trace_id: Option<Uuid>,
    ) -> StorageResult<()> {
        self.log(
            transaction,
            LogLevel::Critical,
            envelope_id,
            status,
            message.into(),
            detail,
            trace_id,
        )
        .await
    }

    pub(crate) fn entry(
        &self,
        level: LogLevel,
        envelope_id: Uuid,
        status: MessageStatus,
        message: String,
        detail: Option<String>,
        trace_id: Option<Uuid>,
    ) -> NewHandlerMessageLog {
        NewHandlerMessageLog {
            id_handler_message: envelope_id,
            status,
            level,
            message,
            detail,
            trace_id,
            id_host: self.host_id,
        }
    }

    /// Emit the tracing event and append the row through an already-held
    /// store transaction
    pub(crate) async fn write(
        &self,
        store_tx: &mut dyn StoreTransaction,
        entry: NewHandlerMessageLog,
    ) -> StorageResult<()> {
        emit(&entry);
        let row = entry.into_row();
        let affected = store_tx.insert_handler_message_log(&row).await?;
        if affected != 1 {
            return Err(StorageError::UnexpectedRowCount {
                table: tables::HANDLER_MESSAGE_LOG.to_string(),
                operation: "insert",
                expected: 1,
                actual: affected,
            });
        }
        Ok(())
    }
}

fn emit(entry: &NewHandlerMessageLog) {
    let envelope_id = entry.id_handler_message;
    let status = entry.status;
    let trace_id = entry.trace_id;
    let detail = entry.detail.as_deref();
    match entry.level {
        LogLevel::Information => {
            if status == MessageStatus::Unchanged {
                debug!(%envelope_id, %status, ?trace_id, detail, "{}", entry.message);
            } else {
                info!(%envelope_id, %status, ?trace_id, detail, "{}", entry.message);
            }
        }
        LogLevel::Warning => warn!(%envelope_id, %status, ?trace_id, detail, "{}", entry.message),
        LogLevel::Error => error!(%envelope_id, %status, ?trace_id, detail, "{}", entry.message),
        LogLevel::Critical => {
            error!(%envelope_id, %status, ?trace_id, detail, critical = true, "{}", entry.message)
        }
    }
}
