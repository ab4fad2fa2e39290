//! Component queues: one message type each, with ordering and retry policy.
//!
//! The policy fields are a contract for whatever scheduler drains the queue.
//! Nothing in this crate enforces FIFO order, processing timeouts or retries.

use crate::bus::Message;
use crate::error::TopologyError;
use crate::registry::TypeDescriptor;
use serde::Serialize;
use std::time::Duration;

const ENTITY: &str = "queue";

/// A validated, frozen queue declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentQueue {
    name: String,
    message_type: TypeDescriptor,
    is_fifo: bool,
    processing_timeout: Duration,
    max_retry_count: u32,
}

impl ComponentQueue {
    pub fn builder(name: impl Into<String>) -> QueueBuilder {
        QueueBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &TypeDescriptor {
        &self.message_type
    }

    pub fn is_fifo(&self) -> bool {
        self.is_fifo
    }

    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    pub fn max_retry_count(&self) -> u32 {
        self.max_retry_count
    }

    /// Serializable view for diagnostics
    pub fn summary(&self) -> QueueSummary {
        QueueSummary {
            name: self.name.clone(),
            message_type: self.message_type.rust_name().to_string(),
            is_fifo: self.is_fifo,
            processing_timeout_seconds: self.processing_timeout.as_secs(),
            max_retry_count: self.max_retry_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub name: String,
    pub message_type: String,
    pub is_fifo: bool,
    pub processing_timeout_seconds: u64,
    pub max_retry_count: u32,
}

/// Fluent builder for [`ComponentQueue`]
#[derive(Debug, Clone)]
pub struct QueueBuilder {
    name: String,
    message_type: Option<TypeDescriptor>,
    is_fifo: bool,
    processing_timeout: Option<Duration>,
    max_retry_count: u32,
}

impl QueueBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message_type: None,
            is_fifo: false,
            processing_timeout: None,
            max_retry_count: 0,
        }
    }

    /// Carry messages of type `M`
    pub fn message<M: Message>(self) -> Self {
        self.message_type(TypeDescriptor::message::<M>())
    }

    /// Carry an arbitrary type; building fails unless it is a message
    pub fn message_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.message_type = Some(descriptor);
        self
    }

    pub fn fifo(mut self, is_fifo: bool) -> Self {
        self.is_fifo = is_fifo;
        self
    }

    pub fn processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = Some(timeout);
        self
    }

    pub fn max_retry_count(mut self, count: u32) -> Self {
        self.max_retry_count = count;
        self
    }

    pub fn build(self) -> Result<ComponentQueue, TopologyError> {
        if self.name.trim().is_empty() {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "name",
            });
        }
        let Some(message_type) = self.message_type else {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "message_type",
            });
        };
        if !message_type.is_message() {
            return Err(TopologyError::InvalidValue {
                entity: ENTITY,
                name: self.name,
                field: "message_type",
                reason: format!("{} does not implement Message", message_type.rust_name()),
            });
        }
        let Some(processing_timeout) = self.processing_timeout else {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "processing_timeout",
            });
        };
        if processing_timeout.is_zero() {
            return Err(TopologyError::InvalidValue {
                entity: ENTITY,
                name: self.name,
                field: "processing_timeout",
                reason: "must be positive".to_string(),
            });
        }

        Ok(ComponentQueue {
            name: self.name,
            message_type,
            is_fifo: self.is_fifo,
            processing_timeout,
            max_retry_count: self.max_retry_count,
        })
    }
}
