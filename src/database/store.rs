//! Storage seam of the durable log.
//!
//! [`MessageStore`] opens units of work; [`StoreTransaction`] exposes the
//! row-level primitives the persistence layer is built from. Inserts and
//! updates report affected-row counts so the caller can treat anything but
//! the expected count as a fatal fault.

use crate::error::StorageResult;
use crate::models::{
    EnvelopeUpdate, HandlerMessage, HandlerMessageLog, Host, HostType, MessageBody,
    MessageTypeRow,
};
use async_trait::async_trait;
use uuid::Uuid;

/// A backend for the durable log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Short backend name for logs ("postgres", "in_memory")
    fn backend_name(&self) -> &'static str;

    /// Open a new transaction
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>>;

    /// Release pooled resources
    async fn close(&self);
}

/// One open transaction against a [`MessageStore`].
///
/// Dropping a transaction without committing discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert-if-absent; 0 or 1 rows
    async fn insert_host_type_if_absent(&mut self, row: &HostType) -> StorageResult<u64>;

    /// Insert-if-absent; 0 or 1 rows
    async fn insert_message_type_if_absent(&mut self, row: &MessageTypeRow)
        -> StorageResult<u64>;

    async fn insert_host(&mut self, row: &Host) -> StorageResult<u64>;

    async fn insert_message_body(&mut self, row: &MessageBody) -> StorageResult<u64>;

    async fn insert_handler_message(&mut self, row: &HandlerMessage) -> StorageResult<u64>;

    /// Compare-and-swap update; 0 rows when the preconditions fail
    async fn update_handler_message(&mut self, update: &EnvelopeUpdate) -> StorageResult<u64>;

    async fn insert_handler_message_log(&mut self, row: &HandlerMessageLog)
        -> StorageResult<u64>;

    async fn fetch_handler_message(&mut self, id: Uuid) -> StorageResult<Option<HandlerMessage>>;

    async fn fetch_message_body(&mut self, id: Uuid) -> StorageResult<Option<MessageBody>>;

    /// Audit rows of one envelope in insertion order
    async fn fetch_handler_message_logs(
        &mut self,
        id_handler_message: Uuid,
    ) -> StorageResult<Vec<HandlerMessageLog>>;

    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
