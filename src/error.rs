//! Error types for the bus.
//!
//! Each layer owns a `thiserror` enum; [`BusError`] is the umbrella used by
//! startup code (builders, host initialization, schema migration). Dispatch
//! results never use these directly - see [`crate::bus::DispatchError`].

use crate::config::ConfigurationError;
use crate::constants::MessageStatus;
use thiserror::Error;
use uuid::Uuid;

/// Durable log failures. None of these are retried at this layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),
    /// An insert/update touched a different number of rows than required.
    /// Indicates schema or driver corruption rather than a transient fault.
    #[error("Unexpected affected row count on {table} during {operation}: expected {expected}, got {actual}")]
    UnexpectedRowCount {
        table: String,
        operation: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("Concurrent modification of envelope {envelope_id}: sync token {expected_token} is stale")]
    ConcurrencyConflict {
        envelope_id: Uuid,
        expected_token: Uuid,
    },
    #[error("Invalid status transition for envelope {envelope_id}: {from} -> {to}")]
    InvalidTransition {
        envelope_id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
    },
    #[error("Corresponding message already set for envelope {envelope_id}")]
    CorrelationAlreadySet { envelope_id: Uuid },
    #[error("Duplicate key in {table}: {key}")]
    DuplicateKey { table: String, key: String },
    #[error("Envelope not found: {0}")]
    EnvelopeNotFound(Uuid),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Unit-of-work failures raised by [`crate::transaction::TransactionContext`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransactionError {
    #[error("Failed to begin transaction: {0}")]
    BeginFailed(String),
    #[error("Transaction {0} is not active")]
    NotActive(Uuid),
    #[error("Transaction {0} was marked rollback-only")]
    RollbackOnly(Uuid),
    #[error("Before-commit hook failed for transaction {transaction_id}: {reason}")]
    HookFailed { transaction_id: Uuid, reason: String },
    #[error("Commit failed for transaction {transaction_id}: {reason}")]
    CommitFailed { transaction_id: Uuid, reason: String },
    #[error("Rollback failed for transaction {transaction_id}: {reason}")]
    RollbackFailed { transaction_id: Uuid, reason: String },
}

/// Type and handler registry misconfiguration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("Message type {0} was never registered")]
    UnknownMessageType(Uuid),
    #[error("Type name collision: {name} resolves to {existing} and {incoming}")]
    NameCollision {
        name: String,
        existing: &'static str,
        incoming: &'static str,
    },
    #[error("{candidate} declares context {declared} but the bus is configured for {configured}")]
    ContextMismatch {
        candidate: String,
        declared: &'static str,
        configured: &'static str,
    },
    #[error("{candidate} does not satisfy the handler contract: {reason}")]
    InvalidCandidate { candidate: String, reason: String },
    #[error("Type {0} does not implement the message marker")]
    NotAMessage(&'static str),
}

/// Scenario/component/queue validation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TopologyError {
    #[error("Missing required field '{field}' on {entity} '{name}'")]
    MissingField {
        entity: &'static str,
        name: String,
        field: &'static str,
    },
    #[error("Invalid value for '{field}' on {entity} '{name}': {reason}")]
    InvalidValue {
        entity: &'static str,
        name: String,
        field: &'static str,
        reason: String,
    },
    #[error("Duplicate {entity} name '{name}' in '{owner}'")]
    DuplicateName {
        entity: &'static str,
        name: String,
        owner: String,
    },
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Crate-level error for startup and administrative operations.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Topology error: {0}")]
    Topology(#[from] TopologyError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Invalid bus setup: {0}")]
    InvalidSetup(String),
}

pub type BusResult<T> = Result<T, BusError>;
