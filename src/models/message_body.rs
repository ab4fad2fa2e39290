use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Serialized payload of an envelope. Shares its primary key with the
/// owning `HandlerMessage` and is written in the same transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct MessageBody {
    #[sqlx(rename = "IdMessageBody")]
    pub id_message_body: Uuid,
    #[sqlx(rename = "IdMessageType")]
    pub id_message_type: Uuid,
    #[sqlx(rename = "Data")]
    pub data: String,
}
