//! Payload serialization for message bodies.
//!
//! The bus persists every payload as text. [`MessageSerializer`] is object
//! safe so a deployment can swap the encoding; typed conversion happens at
//! the edges through `serde_json::Value`.

use crate::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub trait MessageSerializer: Send + Sync {
    /// Short name recorded in logs
    fn format_name(&self) -> &'static str;

    fn serialize_as_string(&self, value: &Value) -> StorageResult<String>;

    fn deserialize(&self, data: &str) -> StorageResult<Value>;
}

/// JSON text encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl MessageSerializer for JsonSerializer {
    fn format_name(&self) -> &'static str {
        "json"
    }

    fn serialize_as_string(&self, value: &Value) -> StorageResult<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, data: &str) -> StorageResult<Value> {
        Ok(serde_json::from_str(data)?)
    }
}

/// Encode a typed value through `serializer`
pub fn encode<T: Serialize>(serializer: &dyn MessageSerializer, value: &T) -> StorageResult<String> {
    let value = serde_json::to_value(value)?;
    serializer.serialize_as_string(&value)
}

/// Decode a typed value through `serializer`
pub fn decode<T: DeserializeOwned>(serializer: &dyn MessageSerializer, data: &str) -> StorageResult<T> {
    let value = serializer.deserialize(data)?;
    serde_json::from_value(value).map_err(|e| StorageError::Serialization(e.to_string()))
}
