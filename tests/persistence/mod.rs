//! Persistence integration tests
//!
//! Envelope lifecycle, sync-token checks and host registration over the
//! in-memory store, plus the same paths against PostgreSQL.

pub mod hosts;
pub mod postgres;
