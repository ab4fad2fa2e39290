//! # Durable Log Models
//!
//! Row structs for the six tables of the durable log. Column names follow the
//! `Id*`/CamelCase convention of the persisted schema; field names are the
//! snake_case equivalents and are mapped with `#[sqlx(rename)]`.

pub mod handler_message;
pub mod handler_message_log;
pub mod host;
pub mod message_body;
pub mod message_type;

pub use handler_message::{EnvelopeUpdate, HandlerMessage};
pub use handler_message_log::{HandlerMessageLog, NewHandlerMessageLog};
pub use host::{Host, HostType};
pub use message_body::MessageBody;
pub use message_type::MessageTypeRow;
