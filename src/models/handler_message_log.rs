use crate::constants::{LogLevel, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only audit row. Never updated or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HandlerMessageLog {
    #[sqlx(rename = "IdHandlerMessageLog")]
    pub id_handler_message_log: Uuid,
    #[sqlx(rename = "IdHandlerMessage")]
    pub id_handler_message: Uuid,
    /// `None` when the entry annotates without changing the lifecycle state
    #[sqlx(rename = "IdMessageStatus")]
    pub id_message_status: Option<i32>,
    #[sqlx(rename = "LogLevel")]
    pub log_level: String,
    #[sqlx(rename = "Message")]
    pub message: String,
    #[sqlx(rename = "Detail")]
    pub detail: Option<String>,
    #[sqlx(rename = "TraceId")]
    pub trace_id: Option<Uuid>,
    #[sqlx(rename = "IdHost")]
    pub id_host: Option<Uuid>,
    #[sqlx(rename = "TimeCreatedUtc")]
    pub time_created_utc: DateTime<Utc>,
}

impl HandlerMessageLog {
    pub fn status(&self) -> Option<MessageStatus> {
        self.id_message_status.and_then(MessageStatus::from_code)
    }
}

/// New log entry for creation
#[derive(Debug, Clone, PartialEq)]
pub struct NewHandlerMessageLog {
    pub id_handler_message: Uuid,
    pub status: MessageStatus,
    pub level: LogLevel,
    pub message: String,
    pub detail: Option<String>,
    pub trace_id: Option<Uuid>,
    pub id_host: Option<Uuid>,
}

impl NewHandlerMessageLog {
    pub fn into_row(self) -> HandlerMessageLog {
        HandlerMessageLog {
            id_handler_message_log: Uuid::new_v4(),
            id_handler_message: self.id_handler_message,
            id_message_status: match self.status {
                MessageStatus::Unchanged => None,
                status => Some(status.code()),
            },
            log_level: self.level.as_str().to_string(),
            message: self.message,
            detail: self.detail,
            trace_id: self.trace_id,
            id_host: self.id_host,
            time_created_utc: Utc::now(),
        }
    }
}
