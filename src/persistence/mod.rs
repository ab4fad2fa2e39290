//! # Envelope Persistence
//!
//! Envelope-level operations of the durable log, built from the row
//! primitives of [`crate::database::StoreTransaction`].
//!
//! Every operation takes an optional [`TransactionContext`]. When one is
//! given the writes join it and nothing is committed here; otherwise the
//! operation runs in its own transaction, committed on success and rolled
//! back on error.
//!
//! Any insert or update that touches an unexpected number of rows is a
//! fatal [`StorageError`]; nothing here retries.

pub mod host;
pub mod logger;

pub use host::{HostInitializer, HostMetadata};
pub use logger::MessageLogger;

use crate::constants::{details, tables, LogLevel, MessageStatus};
use crate::database::{MessageStore, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::logging::log_storage_operation;
use crate::models::{
    EnvelopeUpdate, HandlerMessage, HandlerMessageLog, Host, HostType, MessageBody,
    MessageTypeRow,
};
use crate::serialization::{self, JsonSerializer, MessageSerializer};
use crate::transaction::TransactionContext;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Handle to a persisted envelope, tracking the sync token last written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedEnvelope {
    pub id: Uuid,
    pub message_type_id: Uuid,
    pub sync_token: Uuid,
    pub status: MessageStatus,
}

/// Result of creating a request envelope
#[derive(Debug, Clone)]
pub struct SavedMessage<M> {
    pub envelope: SavedEnvelope,
    /// Re-materialized from the stored payload when round-tripping is on
    pub message: Option<M>,
}

/// Identity of a message type as stored in `MessageType`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeKey {
    pub id: Uuid,
    pub name: String,
}

/// Metadata for a new envelope
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub host_id: Uuid,
    pub message_type: MessageTypeKey,
    pub session_id: Option<Uuid>,
    pub trace_id: Option<Uuid>,
    pub roundtrip: bool,
}

/// Result of creating a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub response_id: Uuid,
    /// The request envelope after correlation
    pub request: SavedEnvelope,
}

/// One audit message written when an envelope finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeNote {
    pub message: String,
    pub detail: Option<String>,
}

enum Scope<'a> {
    Joined(&'a TransactionContext),
    Owned(TransactionContext),
}

impl Scope<'_> {
    fn context(&self) -> &TransactionContext {
        match self {
            Scope::Joined(tx) => tx,
            Scope::Owned(tx) => tx,
        }
    }

    async fn finish<T>(self, result: StorageResult<T>) -> StorageResult<T> {
        match self {
            Scope::Joined(_) => result,
            Scope::Owned(tx) => {
                let result = match result {
                    Ok(value) => tx.commit().await.map(|_| value).map_err(StorageError::from),
                    Err(e) => Err(e),
                };
                tx.dispose().await;
                result
            }
        }
    }
}

fn expect_rows(table: &str, operation: &'static str, expected: u64, actual: u64) -> StorageResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(StorageError::UnexpectedRowCount {
            table: table.to_string(),
            operation,
            expected,
            actual,
        })
    }
}

/// Envelope operations over a [`MessageStore`].
pub struct MessagePersistence {
    store: Arc<dyn MessageStore>,
    serializer: Arc<dyn MessageSerializer>,
    runtime_key: Uuid,
}

impl std::fmt::Debug for MessagePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePersistence")
            .field("backend", &self.store.backend_name())
            .field("serializer", &self.serializer.format_name())
            .field("runtime_key", &self.runtime_key)
            .finish()
    }
}

impl MessagePersistence {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self::with_serializer(store, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        store: Arc<dyn MessageStore>,
        serializer: Arc<dyn MessageSerializer>,
    ) -> Self {
        Self {
            store,
            serializer,
            runtime_key: Uuid::new_v4(),
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Identifies this process instance in every row it writes
    pub fn runtime_key(&self) -> Uuid {
        self.runtime_key
    }

    /// Open a transaction on the underlying store
    pub async fn begin(&self) -> StorageResult<TransactionContext> {
        Ok(TransactionContext::begin(self.store.as_ref()).await?)
    }

    async fn open_scope<'a>(&self, tx: Option<&'a TransactionContext>) -> StorageResult<Scope<'a>> {
        match tx {
            Some(tx) => Ok(Scope::Joined(tx)),
            None => Ok(Scope::Owned(self.begin().await?)),
        }
    }

    /// Insert the reference rows and the Host row for a starting process
    pub async fn insert_host(&self, host_type: &HostType, host: &Host) -> StorageResult<()> {
        let scope = self.open_scope(None).await?;
        let result = async {
            let mut store_tx = scope.context().store().await?;
            store_tx.insert_host_type_if_absent(host_type).await?;
            let affected = store_tx.insert_host(host).await?;
            expect_rows(tables::HOST, "insert", 1, affected)
        }
        .await;
        scope.finish(result).await?;
        log_storage_operation("host_inserted", Some(tables::HOST), Some(host.id_host), "ok", None);
        Ok(())
    }

    /// Persist body and envelope for an outgoing message, then move the
    /// envelope to InProcess.
    pub async fn create_request_envelope<M>(
        &self,
        tx: Option<&TransactionContext>,
        message: &M,
        envelope: &NewEnvelope,
    ) -> StorageResult<SavedMessage<M>>
    where
        M: Serialize + DeserializeOwned,
    {
        let data = serialization::encode(self.serializer.as_ref(), message)?;
        let logger = MessageLogger::for_host(envelope.host_id);

        let scope = self.open_scope(tx).await?;
        let result = async {
            let mut store_tx = scope.context().store().await?;
            let saved = self
                .insert_envelope(&mut *store_tx, envelope, data.clone(), MessageStatus::Created, None)
                .await?;
            logger
                .write(
                    &mut *store_tx,
                    logger.entry(
                        LogLevel::Information,
                        saved.id,
                        MessageStatus::Created,
                        format!("{} created", envelope.message_type.name),
                        None,
                        envelope.trace_id,
                    ),
                )
                .await?;

            let saved = self
                .transition(&mut *store_tx, saved, MessageStatus::InProcess, None)
                .await?;
            logger
                .write(
                    &mut *store_tx,
                    logger.entry(
                        LogLevel::Information,
                        saved.id,
                        MessageStatus::InProcess,
                        format!("{} in process", envelope.message_type.name),
                        None,
                        envelope.trace_id,
                    ),
                )
                .await?;
            Ok::<_, StorageError>(saved)
        }
        .await;
        let saved = scope.finish(result).await?;

        let message = if envelope.roundtrip {
            Some(serialization::decode(self.serializer.as_ref(), &data)?)
        } else {
            None
        };

        log_storage_operation(
            "request_envelope_created",
            Some(tables::HANDLER_MESSAGE),
            Some(saved.id),
            "in_process",
            Some(&envelope.message_type.name),
        );
        Ok(SavedMessage {
            envelope: saved,
            message,
        })
    }

    /// Persist a Completed response envelope correlated to `request`, and
    /// complete the request.
    pub async fn create_response_envelope<R>(
        &self,
        tx: Option<&TransactionContext>,
        request: &SavedEnvelope,
        response: &R,
        response_envelope: &NewEnvelope,
    ) -> StorageResult<ResponseEnvelope>
    where
        R: Serialize,
    {
        let data = serialization::encode(self.serializer.as_ref(), response)?;
        let logger = MessageLogger::for_host(response_envelope.host_id);

        let scope = self.open_scope(tx).await?;
        let result = async {
            let mut store_tx = scope.context().store().await?;
            let saved_response = self
                .insert_envelope(
                    &mut *store_tx,
                    response_envelope,
                    data,
                    MessageStatus::Completed,
                    Some(request.id),
                )
                .await?;
            logger
                .write(
                    &mut *store_tx,
                    logger.entry(
                        LogLevel::Information,
                        saved_response.id,
                        MessageStatus::Completed,
                        format!("{} completed", response_envelope.message_type.name),
                        None,
                        response_envelope.trace_id,
                    ),
                )
                .await?;

            let request = self
                .transition(
                    &mut *store_tx,
                    *request,
                    MessageStatus::Completed,
                    Some(saved_response.id),
                )
                .await?;
            logger
                .write(
                    &mut *store_tx,
                    logger.entry(
                        LogLevel::Information,
                        request.id,
                        MessageStatus::Completed,
                        details::RESPONSE_CREATED.to_string(),
                        Some(saved_response.id.to_string()),
                        response_envelope.trace_id,
                    ),
                )
                .await?;

            Ok::<_, StorageError>(ResponseEnvelope {
                response_id: saved_response.id,
                request,
            })
        }
        .await;
        let response = scope.finish(result).await?;

        log_storage_operation(
            "response_envelope_created",
            Some(tables::HANDLER_MESSAGE),
            Some(response.response_id),
            "completed",
            Some(&request.id.to_string()),
        );
        Ok(response)
    }

    /// Mark an envelope Completed without a response
    pub async fn complete_envelope(
        &self,
        tx: Option<&TransactionContext>,
        envelope: &SavedEnvelope,
        host_id: Uuid,
        trace_id: Option<Uuid>,
        message: &str,
    ) -> StorageResult<SavedEnvelope> {
        self.finish_envelope(
            tx,
            envelope,
            MessageStatus::Completed,
            host_id,
            trace_id,
            &[EnvelopeNote {
                message: message.to_string(),
                detail: None,
            }],
        )
        .await
    }

    /// Mark an envelope Aborted, writing one Error row per failure
    pub async fn abort_envelope(
        &self,
        tx: Option<&TransactionContext>,
        envelope: &SavedEnvelope,
        host_id: Uuid,
        trace_id: Option<Uuid>,
        failures: &[EnvelopeNote],
    ) -> StorageResult<SavedEnvelope> {
        self.finish_envelope(tx, envelope, MessageStatus::Aborted, host_id, trace_id, failures)
            .await
    }

    async fn finish_envelope(
        &self,
        tx: Option<&TransactionContext>,
        envelope: &SavedEnvelope,
        status: MessageStatus,
        host_id: Uuid,
        trace_id: Option<Uuid>,
        entries: &[EnvelopeNote],
    ) -> StorageResult<SavedEnvelope> {
        let logger = MessageLogger::for_host(host_id);
        let level = if status == MessageStatus::Aborted {
            LogLevel::Error
        } else {
            LogLevel::Information
        };

        let scope = self.open_scope(tx).await?;
        let result = async {
            let mut store_tx = scope.context().store().await?;
            let saved = self.transition(&mut *store_tx, *envelope, status, None).await?;
            for entry in entries {
                logger
                    .write(
                        &mut *store_tx,
                        logger.entry(
                            level,
                            saved.id,
                            status,
                            entry.message.clone(),
                            entry.detail.clone(),
                            trace_id,
                        ),
                    )
                    .await?;
            }
            Ok::<_, StorageError>(saved)
        }
        .await;
        let saved = scope.finish(result).await?;

        log_storage_operation(
            "envelope_finished",
            Some(tables::HANDLER_MESSAGE),
            Some(saved.id),
            &status.to_string(),
            None,
        );
        Ok(saved)
    }

    /// Append an audit row without touching the envelope
    #[allow(clippy::too_many_arguments)]
    pub async fn log_status(
        &self,
        tx: Option<&TransactionContext>,
        envelope_id: Uuid,
        status: MessageStatus,
        level: LogLevel,
        message: &str,
        detail: Option<&str>,
        trace_id: Option<Uuid>,
        host_id: Option<Uuid>,
    ) -> StorageResult<()> {
        let logger = match host_id {
            Some(id) => MessageLogger::for_host(id),
            None => MessageLogger::new(),
        };
        let scope = self.open_scope(tx).await?;
        let result = async {
            let mut store_tx = scope.context().store().await?;
            logger
                .write(
                    &mut *store_tx,
                    logger.entry(
                        level,
                        envelope_id,
                        status,
                        message.to_string(),
                        detail.map(str::to_string),
                        trace_id,
                    ),
                )
                .await
        }
        .await;
        scope.finish(result).await
    }

    pub async fn find_envelope(&self, id: Uuid) -> StorageResult<Option<HandlerMessage>> {
        self.read(|store_tx| Box::pin(async move { store_tx.fetch_handler_message(id).await }))
            .await
    }

    pub async fn find_body(&self, id: Uuid) -> StorageResult<Option<MessageBody>> {
        self.read(|store_tx| Box::pin(async move { store_tx.fetch_message_body(id).await }))
            .await
    }

    /// Audit rows of one envelope, oldest first
    pub async fn status_log(&self, id: Uuid) -> StorageResult<Vec<HandlerMessageLog>> {
        self.read(|store_tx| {
            Box::pin(async move { store_tx.fetch_handler_message_logs(id).await })
        })
        .await
    }

    /// The response envelope correlated to a request, if one was created
    pub async fn find_response_for(&self, request_id: Uuid) -> StorageResult<Option<HandlerMessage>> {
        self.read(|store_tx| {
            Box::pin(async move {
                let Some(request) = store_tx.fetch_handler_message(request_id).await? else {
                    return Ok(None);
                };
                match request.id_corresponding_message {
                    Some(response_id) => store_tx.fetch_handler_message(response_id).await,
                    None => Ok(None),
                }
            })
        })
        .await
    }

    /// Decode the stored payload of an envelope
    pub async fn load_payload<T: DeserializeOwned>(&self, id: Uuid) -> StorageResult<Option<T>> {
        match self.find_body(id).await? {
            Some(body) => Ok(Some(serialization::decode(
                self.serializer.as_ref(),
                &body.data,
            )?)),
            None => Ok(None),
        }
    }

    async fn read<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: for<'t> FnOnce(
            &'t mut dyn StoreTransaction,
        ) -> futures::future::BoxFuture<'t, StorageResult<T>>,
    {
        let mut store_tx = self.store.begin().await?;
        let result = f(store_tx.as_mut()).await;
        store_tx.rollback().await?;
        result
    }

    /// Ensure the MessageType row, then write body and envelope
    async fn insert_envelope(
        &self,
        store_tx: &mut dyn StoreTransaction,
        envelope: &NewEnvelope,
        data: String,
        status: MessageStatus,
        corresponding: Option<Uuid>,
    ) -> StorageResult<SavedEnvelope> {
        let now = Utc::now();
        store_tx
            .insert_message_type_if_absent(&MessageTypeRow {
                id_message_type: envelope.message_type.id,
                name: envelope.message_type.name.clone(),
                time_created_utc: now,
            })
            .await?;

        let id = Uuid::new_v4();
        let body = MessageBody {
            id_message_body: id,
            id_message_type: envelope.message_type.id,
            data,
        };
        let affected = store_tx.insert_message_body(&body).await?;
        expect_rows(tables::MESSAGE_BODY, "insert", 1, affected)?;

        let message = HandlerMessage {
            id_handler_message: id,
            id_host: envelope.host_id,
            id_message_type: envelope.message_type.id,
            id_corresponding_message: corresponding,
            id_session: envelope.session_id,
            time_created_utc: now,
            id_message_status: status.code(),
            runtime_unique_key: self.runtime_key,
            id_message_body: id,
            sync_token: Uuid::new_v4(),
        };
        let affected = store_tx.insert_handler_message(&message).await?;
        expect_rows(tables::HANDLER_MESSAGE, "insert", 1, affected)?;

        Ok(SavedEnvelope {
            id,
            message_type_id: envelope.message_type.id,
            sync_token: message.sync_token,
            status,
        })
    }

    /// Compare-and-swap the envelope to `status`, optionally setting its
    /// correlation
    async fn transition(
        &self,
        store_tx: &mut dyn StoreTransaction,
        envelope: SavedEnvelope,
        status: MessageStatus,
        set_corresponding: Option<Uuid>,
    ) -> StorageResult<SavedEnvelope> {
        if !envelope.status.can_transition_to(status) {
            return Err(StorageError::InvalidTransition {
                envelope_id: envelope.id,
                from: envelope.status,
                to: status,
            });
        }

        let update = EnvelopeUpdate {
            id_handler_message: envelope.id,
            expected_sync_token: envelope.sync_token,
            new_sync_token: Uuid::new_v4(),
            status,
            set_corresponding,
        };
        let affected = store_tx.update_handler_message(&update).await?;
        match affected {
            1 => {}
            0 => {
                return Err(match store_tx.fetch_handler_message(envelope.id).await? {
                    None => StorageError::EnvelopeNotFound(envelope.id),
                    Some(row)
                        if set_corresponding.is_some()
                            && row.id_corresponding_message.is_some() =>
                    {
                        StorageError::CorrelationAlreadySet {
                            envelope_id: envelope.id,
                        }
                    }
                    Some(_) => StorageError::ConcurrencyConflict {
                        envelope_id: envelope.id,
                        expected_token: envelope.sync_token,
                    },
                })
            }
            n => expect_rows(tables::HANDLER_MESSAGE, "update", 1, n)?,
        }

        Ok(SavedEnvelope {
            sync_token: update.new_sync_token,
            status: if status == MessageStatus::Unchanged {
                envelope.status
            } else {
                status
            },
            ..envelope
        })
    }
}
