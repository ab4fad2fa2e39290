use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per running process instance.
///
/// Written once at startup and never mutated; every envelope created by the
/// process references it through `IdHost`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Host {
    #[sqlx(rename = "IdHost")]
    pub id_host: Uuid,
    #[sqlx(rename = "IdHostType")]
    pub id_host_type: Uuid,
    #[sqlx(rename = "ApplicationName")]
    pub application_name: String,
    #[sqlx(rename = "MachineName")]
    pub machine_name: String,
    #[sqlx(rename = "ProcessId")]
    pub process_id: i32,
    #[sqlx(rename = "RuntimeUniqueKey")]
    pub runtime_unique_key: Uuid,
    #[sqlx(rename = "TimeCreatedUtc")]
    pub time_created_utc: DateTime<Utc>,
}

/// Reference data: one row per host kind, insert-if-absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct HostType {
    #[sqlx(rename = "IdHostType")]
    pub id_host_type: Uuid,
    #[sqlx(rename = "Name")]
    pub name: String,
}
