//! # Bus Constants
//!
//! Status codes, host kinds and log levels shared by the dispatcher and the
//! durable log. The numeric codes are what lands in the `IdMessageStatus`
//! column, so they must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default names for the persistent schema.
pub mod tables {
    pub const SCHEMA: &str = "bus";
    pub const HOST: &str = "Host";
    pub const HOST_TYPE: &str = "HostType";
    pub const MESSAGE_TYPE: &str = "MessageType";
    pub const HANDLER_MESSAGE: &str = "HandlerMessage";
    pub const MESSAGE_BODY: &str = "MessageBody";
    pub const HANDLER_MESSAGE_LOG: &str = "HandlerMessageLog";
}

/// Detail strings attached to synthesized failures and log rows.
pub mod details {
    pub const UNHANDLED_HANDLER_EXCEPTION: &str = "Unhandled handler exception";
    pub const UNHANDLED_INTERCEPTOR_EXCEPTION: &str = "Unhandled interceptor exception";
    pub const UNHANDLED_DISPATCHER_EXCEPTION: &str = "Unhandled dispatcher exception";
    pub const OPERATION_CANCELLED: &str = "operation was cancelled";
    pub const RESPONSE_CREATED: &str = "response created";
    pub const DEFAULT_CLIENT_MESSAGE: &str =
        "The request could not be processed. Please try again later.";
}

/// Lifecycle of a persisted envelope.
///
/// `Created → InProcess → {Completed, Aborted}`. `Unchanged` is a sentinel
/// meaning "annotate the envelope but keep its lifecycle state"; it is never
/// written to the status column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Unchanged,
    Created,
    InProcess,
    Completed,
    Aborted,
}

impl MessageStatus {
    /// Persisted status code.
    pub fn code(self) -> i32 {
        match self {
            Self::Unchanged => 0,
            Self::Created => 1,
            Self::InProcess => 2,
            Self::Completed => 3,
            Self::Aborted => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Created),
            2 => Some(Self::InProcess),
            3 => Some(Self::Completed),
            4 => Some(Self::Aborted),
            _ => None,
        }
    }

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether moving from `self` to `next` respects the monotone lifecycle.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        match (self, next) {
            (_, Self::Unchanged) => true,
            (Self::Created, Self::InProcess) => true,
            (Self::Created | Self::InProcess, Self::Completed | Self::Aborted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Created => write!(f, "created"),
            Self::InProcess => write!(f, "in_process"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::str::FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unchanged" => Ok(Self::Unchanged),
            "created" => Ok(Self::Created),
            "in_process" => Ok(Self::InProcess),
            "completed" => Ok(Self::Completed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid message status: {s}")),
        }
    }
}

/// Kind of process registered in the `Host` table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    MessageBus,
    Worker,
    Custom(String),
}

impl HostKind {
    pub fn name(&self) -> &str {
        match self {
            Self::MessageBus => "message_bus",
            Self::Worker => "worker",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a `HandlerMessageLog` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Information,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
