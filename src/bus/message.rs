//! Message marker and per-call options.

use crate::transaction::TransactionContext;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::time::Duration;
use uuid::Uuid;

/// Base marker for anything the bus can carry.
///
/// `Reply` is what a request handler returns; use `()` for fire-and-forget
/// commands and for events.
///
/// ```rust
/// use durabus::bus::Message;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct OrderCreated { order_id: u64 }
///
/// #[derive(Serialize, Deserialize)]
/// struct Receipt { id: String }
///
/// impl Message for OrderCreated {
///     type Reply = Receipt;
/// }
/// ```
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Reply: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Name fed to the type-name resolver. Override to keep the logical id
    /// stable across module moves.
    fn message_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub(crate) fn is_fire_and_forget<M: Message>() -> bool {
    TypeId::of::<M::Reply>() == TypeId::of::<()>()
}

/// Parent trace information propagated into handlers and log rows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceInfo {
    pub trace_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub correlation_id: Option<String>,
}

impl TraceInfo {
    pub fn new_root() -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            parent_id: None,
            correlation_id: None,
        }
    }

    /// Same trace, with `parent` as the immediate parent
    pub fn child_of(&self, parent: Uuid) -> Self {
        Self {
            trace_id: self.trace_id,
            parent_id: Some(parent),
            correlation_id: self.correlation_id.clone(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

impl Default for TraceInfo {
    fn default() -> Self {
        Self::new_root()
    }
}

/// Per-message options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Carried into the handler context; not enforced by the bus
    pub timeout: Option<Duration>,
    pub session_id: Option<Uuid>,
    /// Overrides `dispatch.roundtrip_payloads` for this call
    pub roundtrip: Option<bool>,
}

/// Options for one `send`/`publish` call.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Join this unit of work instead of creating one
    pub transaction: Option<TransactionContext>,
    pub trace: Option<TraceInfo>,
    pub message: MessageOptions,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_transaction(mut self, transaction: TransactionContext) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_trace(mut self, trace: TraceInfo) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.message.timeout = Some(timeout);
        self
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.message.session_id = Some(session_id);
        self
    }

    pub fn with_roundtrip(mut self, roundtrip: bool) -> Self {
        self.message.roundtrip = Some(roundtrip);
        self
    }
}
