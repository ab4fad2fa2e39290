//! # Durable Log Storage
//!
//! Backends for the append-only envelope log.
//!
//! ## Key Components
//!
//! - [`store`] - the [`MessageStore`]/[`StoreTransaction`] seam every backend implements
//! - [`postgres`] - sqlx/PostgreSQL backend with configurable schema and table names
//! - [`memory`] - transactional in-memory backend for tests and embedded use
//! - [`migrations`] - idempotent DDL guarded by an advisory lock
//! - [`connection`] - pool construction from [`crate::config::DatabaseConfig`]
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use durabus::config::BusConfig;
//! use durabus::database::PgMessageStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BusConfig::default();
//! let store = PgMessageStore::connect(&config.database, config.schema.clone()).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod store;

pub use connection::DatabaseConnection;
pub use memory::{InMemoryMessageStore, MemoryTable, MemoryTables, WriteCounts};
pub use migrations::SchemaMigrations;
pub use postgres::PgMessageStore;
pub use store::{MessageStore, StoreTransaction};
