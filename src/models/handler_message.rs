use crate::constants::MessageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Envelope: identity, type, status and correlation of one message instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HandlerMessage {
    #[sqlx(rename = "IdHandlerMessage")]
    pub id_handler_message: Uuid,
    #[sqlx(rename = "IdHost")]
    pub id_host: Uuid,
    #[sqlx(rename = "IdMessageType")]
    pub id_message_type: Uuid,
    /// Filled exactly once, when a response is produced
    #[sqlx(rename = "IdCorrespondingMessage")]
    pub id_corresponding_message: Option<Uuid>,
    #[sqlx(rename = "IdSession")]
    pub id_session: Option<Uuid>,
    #[sqlx(rename = "TimeCreatedUtc")]
    pub time_created_utc: DateTime<Utc>,
    #[sqlx(rename = "IdMessageStatus")]
    pub id_message_status: i32,
    #[sqlx(rename = "RuntimeUniqueKey")]
    pub runtime_unique_key: Uuid,
    #[sqlx(rename = "IdMessageBody")]
    pub id_message_body: Uuid,
    /// Rewritten on every mutation; updates compare-and-swap on it
    #[sqlx(rename = "SyncToken")]
    pub sync_token: Uuid,
}

impl HandlerMessage {
    pub fn status(&self) -> Option<MessageStatus> {
        MessageStatus::from_code(self.id_message_status)
    }
}

/// Compare-and-swap mutation of one envelope.
///
/// Applies only when the stored `SyncToken` equals `expected_sync_token`.
/// When `set_corresponding` is present the stored correlation must still be
/// empty. A `status` of [`MessageStatus::Unchanged`] leaves the status column
/// alone.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeUpdate {
    pub id_handler_message: Uuid,
    pub expected_sync_token: Uuid,
    pub new_sync_token: Uuid,
    pub status: MessageStatus,
    pub set_corresponding: Option<Uuid>,
}

impl EnvelopeUpdate {
    /// Apply the update to an in-memory row. Returns false when the CAS
    /// preconditions do not hold.
    pub fn apply_to(&self, row: &mut HandlerMessage) -> bool {
        if row.id_handler_message != self.id_handler_message
            || row.sync_token != self.expected_sync_token
        {
            return false;
        }
        if self.set_corresponding.is_some() && row.id_corresponding_message.is_some() {
            return false;
        }
        if self.status != MessageStatus::Unchanged {
            row.id_message_status = self.status.code();
        }
        if let Some(corresponding) = self.set_corresponding {
            row.id_corresponding_message = Some(corresponding);
        }
        row.sync_token = self.new_sync_token;
        true
    }
}
