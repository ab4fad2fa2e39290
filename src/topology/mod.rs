//! # Topology Configuration
//!
//! Static description of a processing pipeline: a [`Scenario`] owns ordered
//! inbound, business-process and outbound [`Component`]s, and each component
//! owns named [`ComponentQueue`]s.
//!
//! ```rust
//! use durabus::bus::Message;
//! use durabus::registry::TypeRegistry;
//! use durabus::topology::{Component, ComponentQueue, Scenario};
//! use serde::{Deserialize, Serialize};
//! use std::time::Duration;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPlaced;
//! impl Message for OrderPlaced {
//!     type Reply = ();
//! }
//!
//! struct Gateway;
//!
//! let types = TypeRegistry::new();
//! let scenario = Scenario::builder("orders")
//!     .description("order intake")
//!     .component(
//!         Component::inbound("gateway")
//!             .runtime::<Gateway>()
//!             .inactivity_timeout(Duration::from_secs(300))
//!             .shutdown_timeout(Duration::from_secs(10))
//!             .queue(
//!                 ComponentQueue::builder("placed")
//!                     .message::<OrderPlaced>()
//!                     .fifo(true)
//!                     .processing_timeout(Duration::from_secs(30))
//!                     .max_retry_count(5),
//!             ),
//!     )
//!     .build(&types)
//!     .unwrap();
//! assert_eq!(scenario.message_types().len(), 1);
//! ```

pub mod component;
pub mod queue;
pub mod scenario;

pub use component::{Component, ComponentBuilder, ComponentKind, ComponentSummary};
pub use queue::{ComponentQueue, QueueBuilder, QueueSummary};
pub use scenario::{Scenario, ScenarioBuilder, ScenarioSummary};
