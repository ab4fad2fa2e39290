use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reference data: one row per concrete message/event type, insert-if-absent.
///
/// `IdMessageType` is the logical identifier produced by the type registry,
/// so every process derives the same id for the same resolved name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MessageTypeRow {
    #[sqlx(rename = "IdMessageType")]
    pub id_message_type: Uuid,
    #[sqlx(rename = "Name")]
    pub name: String,
    #[sqlx(rename = "TimeCreatedUtc")]
    pub time_created_utc: DateTime<Utc>,
}
