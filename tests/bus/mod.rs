//! Dispatcher integration tests
//!
//! Request/response, fan-out, failure containment, cancellation and
//! transaction joining, all over the in-memory store.

pub mod blocking;
pub mod publish;
pub mod send;
pub mod transactions;
