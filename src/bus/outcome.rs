//! Dispatch results.
//!
//! Every `send`/`publish` returns `Result<T, DispatchError>`. Handler
//! problems and infrastructure problems are distinct variants so callers can
//! tell a business rejection from a broken bus without parsing text.

use crate::constants::details;
use crate::error::StorageError;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Tier a failure originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Business logic returned an error, panicked or was cancelled
    Handler,
    /// The interceptor itself could not run the handler
    Interceptor,
    /// Handler or processor could not be resolved
    Dispatcher,
    /// The durable log could not be written
    Storage,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Handler => write!(f, "handler"),
            Self::Interceptor => write!(f, "interceptor"),
            Self::Dispatcher => write!(f, "dispatcher"),
            Self::Storage => write!(f, "storage"),
        }
    }
}

/// One failure inside a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    pub kind: FailureKind,
    /// Name of the handler involved, if any
    pub handler: Option<String>,
    /// What went wrong
    pub error: String,
    /// Classification such as "Unhandled handler exception"
    pub detail: Option<String>,
    /// Safe to show to an end user
    pub client_message: Option<String>,
}

impl HandlerFailure {
    /// A business failure returned by a handler
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Handler,
            handler: None,
            error: error.into(),
            detail: None,
            client_message: None,
        }
    }

    pub fn with_client_message(mut self, message: impl Into<String>) -> Self {
        self.client_message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    pub(crate) fn infrastructure(kind: FailureKind, error: impl Into<String>, detail: &str) -> Self {
        Self {
            kind,
            handler: None,
            error: error.into(),
            detail: Some(detail.to_string()),
            client_message: None,
        }
    }

    pub(crate) fn dispatcher(error: impl Into<String>) -> Self {
        Self::infrastructure(
            FailureKind::Dispatcher,
            error,
            details::UNHANDLED_DISPATCHER_EXCEPTION,
        )
    }

    pub(crate) fn storage(error: &StorageError) -> Self {
        Self::infrastructure(
            FailureKind::Storage,
            error.to_string(),
            details::UNHANDLED_DISPATCHER_EXCEPTION,
        )
    }

    pub(crate) fn cancelled() -> Self {
        Self::new("the dispatch was cancelled before the handler finished")
            .with_detail(details::OPERATION_CANCELLED)
    }

    /// Convert a caught panic payload into a handler failure
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let error = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::new(error).with_detail(details::UNHANDLED_HANDLER_EXCEPTION)
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind != FailureKind::Handler
    }

    /// `detail: error`, the form written to the audit log
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{detail}: {}", self.error),
            None => self.error.clone(),
        }
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.handler {
            Some(handler) => write!(f, "[{}] {handler}: {}", self.kind, self.describe()),
            None => write!(f, "[{}] {}", self.kind, self.describe()),
        }
    }
}

/// The failures of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailures {
    pub envelope_id: Option<Uuid>,
    pub message_type: String,
    pub failures: Vec<HandlerFailure>,
    /// Handlers of a fan-out that completed before the unit of work was
    /// rolled back
    pub succeeded: Vec<String>,
}

impl fmt::Display for DispatchFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message_type)?;
        if let Some(id) = self.envelope_id {
            write!(f, " (envelope {id})")?;
        }
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        if !self.succeeded.is_empty() {
            write!(f, "; succeeded: {}", self.succeeded.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Handler error: {0}")]
    Handler(DispatchFailures),
    #[error("Infrastructure error: {0}")]
    Infrastructure(DispatchFailures),
}

impl DispatchError {
    /// Any infrastructure failure makes the whole dispatch an infrastructure error
    pub fn from_failures(
        envelope_id: Option<Uuid>,
        message_type: impl Into<String>,
        failures: Vec<HandlerFailure>,
    ) -> Self {
        let infrastructure = failures.iter().any(HandlerFailure::is_infrastructure);
        let failures = DispatchFailures {
            envelope_id,
            message_type: message_type.into(),
            failures,
            succeeded: Vec::new(),
        };
        if infrastructure {
            Self::Infrastructure(failures)
        } else {
            Self::Handler(failures)
        }
    }

    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            Self::Handler(f) | Self::Infrastructure(f) => &f.failures,
        }
    }

    /// Record the handlers that ran to completion alongside the failures
    pub fn with_succeeded(mut self, handlers: Vec<String>) -> Self {
        match &mut self {
            Self::Handler(f) | Self::Infrastructure(f) => f.succeeded = handlers,
        }
        self
    }

    pub fn succeeded_handlers(&self) -> &[String] {
        match self {
            Self::Handler(f) | Self::Infrastructure(f) => &f.succeeded,
        }
    }

    pub fn envelope_id(&self) -> Option<Uuid> {
        match self {
            Self::Handler(f) | Self::Infrastructure(f) => f.envelope_id,
        }
    }

    pub fn is_handler_error(&self) -> bool {
        matches!(self, Self::Handler(_))
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Infrastructure(_))
    }

    /// First client-facing message, if any failure carries one
    pub fn client_message(&self) -> Option<&str> {
        self.failures()
            .iter()
            .find_map(|f| f.client_message.as_deref())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Outcome of a successful publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReceipt {
    pub envelope_id: Uuid,
    pub handlers_invoked: usize,
}
