//! # Registry Infrastructure
//!
//! Startup-time registries consulted by the dispatcher on every call.
//!
//! ## Available Registries
//!
//! - **TypeRegistry**: concrete type ↔ stable logical identifier
//! - **HandlerRegistry**: message type → handlers and interceptor, for one
//!   application context type
//!
//! ## Architecture
//!
//! ```text
//! Registry Infrastructure
//! ├── TypeNameResolver  (type → stable name)
//! ├── TypeRegistry      (name → UUID v5 id, and back)
//! └── HandlerRegistry   (message type → handler factories, interceptor)
//! ```

pub mod handler_registry;
pub mod type_name;
pub mod type_registry;

pub use handler_registry::{
    HandlerCandidate, HandlerRegistry, HandlerRegistryStats, InterceptorBinding,
    InterceptorFactory,
};
pub use type_name::{RustTypeNameResolver, ShortTypeNameResolver, TypeNameResolver};
pub use type_registry::{RegisteredType, TypeDescriptor, TypeRegistry, MESSAGE_TYPE_NAMESPACE};
