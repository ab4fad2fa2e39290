#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Durabus Core
//!
//! Durable request/response and publish/subscribe message bus.
//!
//! ## Overview
//!
//! Every message that crosses the bus is written to a relational log before
//! its handler runs, tracked through an explicit status lifecycle, and
//! correlated with its response. Handlers run inside a transactional unit of
//! work so their own writes commit or roll back together with the bus's.
//!
//! ## Module Organization
//!
//! - [`bus`] - Messages, handlers, interceptors and the dispatcher
//! - [`persistence`] - Envelope operations, host registration, audit logger
//! - [`database`] - Store traits with PostgreSQL and in-memory backends
//! - [`transaction`] - Unit of work with commit/rollback/dispose hooks
//! - [`registry`] - Type registry and handler registry
//! - [`topology`] - Scenario / component / queue configuration
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Envelope lifecycle
//!
//! ```text
//! Created ──► InProcess ──┬──► Completed
//!                         └──► Aborted
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use durabus::bus::MessageBus;
//! use durabus::config::ConfigManager;
//! use durabus::registry::{HandlerRegistry, TypeRegistry};
//! use std::sync::Arc;
//!
//! struct App;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! durabus::logging::init_structured_logging();
//! let config = ConfigManager::load()?.config().clone();
//! let handlers = Arc::new(HandlerRegistry::<App>::new(Arc::new(TypeRegistry::new())));
//!
//! // Connects to database.connection_string and creates the schema
//! let bus = MessageBus::builder(Arc::new(App))
//!     .config(config)
//!     .handlers(handlers)
//!     .build()
//!     .await?;
//! println!("host {}", bus.host().id_host);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests, in-memory store
//! cargo test          # Integration tests; PostgreSQL ones are #[ignore]d
//! ```

pub mod bus;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod serialization;
pub mod topology;
pub mod transaction;

pub use bus::{
    BlockingMessageBus, DispatchError, DispatchResult, HandlerContext, HandlerFailure, Message,
    MessageBus, SendOptions, TraceInfo,
};
pub use config::{BusConfig, ConfigManager, DatabaseConfig, SchemaConfig};
pub use constants::{HostKind, LogLevel, MessageStatus};
pub use database::{InMemoryMessageStore, MessageStore, PgMessageStore};
pub use error::{BusError, BusResult, StorageError};
pub use registry::{HandlerRegistry, TypeRegistry};
pub use topology::Scenario;
pub use transaction::{StoreGuard, TransactionContext};
