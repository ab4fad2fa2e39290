use super::message::TraceInfo;
use crate::constants::{LogLevel, MessageStatus};
use crate::error::StorageResult;
use crate::persistence::MessageLogger;
use crate::transaction::TransactionContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Logical identity of the message being handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTypeInfo {
    pub id: Uuid,
    pub name: String,
    pub rust_name: &'static str,
}

/// Everything a handler may need about the dispatch it is running in.
pub struct HandlerContext<C> {
    app: Arc<C>,
    transaction: TransactionContext,
    owns_transaction: bool,
    trace: TraceInfo,
    host_id: Uuid,
    envelope_id: Uuid,
    session_id: Option<Uuid>,
    timeout: Option<Duration>,
    message_type: MessageTypeInfo,
    cancellation: CancellationToken,
    logger: MessageLogger,
    fan_out: bool,
}

impl<C> HandlerContext<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        app: Arc<C>,
        transaction: TransactionContext,
        owns_transaction: bool,
        trace: TraceInfo,
        host_id: Uuid,
        envelope_id: Uuid,
        session_id: Option<Uuid>,
        timeout: Option<Duration>,
        message_type: MessageTypeInfo,
        cancellation: CancellationToken,
        logger: MessageLogger,
    ) -> Self {
        Self {
            app,
            transaction,
            owns_transaction,
            trace,
            host_id,
            envelope_id,
            session_id,
            timeout,
            message_type,
            cancellation,
            logger,
            fan_out: false,
        }
    }

    /// Publish dispatch: failures defer rollback until every handler ran
    pub(crate) fn in_fan_out(mut self) -> Self {
        self.fan_out = true;
        self
    }

    /// The bus-wide application context
    pub fn app(&self) -> &C {
        &self.app
    }

    pub fn app_arc(&self) -> Arc<C> {
        Arc::clone(&self.app)
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    /// Whether the bus (rather than the caller) will commit the transaction
    pub fn owns_transaction(&self) -> bool {
        self.owns_transaction
    }

    pub fn trace(&self) -> &TraceInfo {
        &self.trace
    }

    pub fn host_id(&self) -> Uuid {
        self.host_id
    }

    pub fn envelope_id(&self) -> Uuid {
        self.envelope_id
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    /// Advisory deadline; the bus does not enforce it
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn message_type(&self) -> &MessageTypeInfo {
        &self.message_type
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_fan_out(&self) -> bool {
        self.fan_out
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Append an annotation to this envelope's audit log, inside the
    /// dispatch transaction. The envelope status is left unchanged.
    pub async fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        detail: Option<String>,
    ) -> StorageResult<()> {
        self.logger
            .log(
                &self.transaction,
                level,
                self.envelope_id,
                MessageStatus::Unchanged,
                message.into(),
                detail,
                Some(self.trace.trace_id),
            )
            .await
    }
}

impl<C> std::fmt::Debug for HandlerContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("envelope_id", &self.envelope_id)
            .field("message_type", &self.message_type.name)
            .field("transaction", &self.transaction.id())
            .field("owns_transaction", &self.owns_transaction)
            .finish()
    }
}
