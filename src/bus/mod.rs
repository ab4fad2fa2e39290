//! # Dispatcher
//!
//! Messages, handler contracts, the interceptor pipeline and the
//! [`MessageBus`] that ties them to the durable log.
//!
//! ## Usage
//!
//! ```rust
//! use durabus::bus::{HandlerContext, HandlerFailure, Message, MessageBus};
//! use durabus::database::InMemoryMessageStore;
//! use durabus::registry::{HandlerRegistry, TypeRegistry};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderCreated { order_id: u64 }
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Receipt { id: String }
//!
//! impl Message for OrderCreated {
//!     type Reply = Receipt;
//! }
//!
//! struct App;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let handlers = Arc::new(HandlerRegistry::<App>::new(Arc::new(TypeRegistry::new())));
//! handlers.register_handler::<OrderCreated, _, _>("receipts", |_| {
//!     |order: &OrderCreated, _: &HandlerContext<App>| {
//!         Ok::<_, HandlerFailure>(Receipt { id: format!("R-{}", order.order_id) })
//!     }
//! })?;
//!
//! let bus = MessageBus::builder(Arc::new(App))
//!     .store(Arc::new(InMemoryMessageStore::new()))
//!     .handlers(handlers)
//!     .build()
//!     .await?;
//!
//! let receipt = bus.send(OrderCreated { order_id: 1 }).await?;
//! assert_eq!(receipt.id, "R-1");
//! # Ok(())
//! # }
//! ```

pub mod blocking;
pub mod context;
pub mod handler;
pub mod interceptor;
pub mod message;
pub mod message_bus;
pub mod outcome;
pub mod processor;

pub use blocking::BlockingMessageBus;
pub use context::{HandlerContext, MessageTypeInfo};
pub use handler::{AsyncHandler, Handler, HandlerBinding, HandlerFactory, HandlerInstance};
pub use interceptor::{ErasedReply, Interceptor, Invocation, TracingInterceptor};
pub use message::{Message, MessageOptions, SendOptions, TraceInfo};
pub use message_bus::{MessageBus, MessageBusBuilder};
pub use outcome::{
    DispatchError, DispatchFailures, DispatchResult, FailureKind, HandlerFailure, PublishReceipt,
};
pub use processor::{HandlerProcessor, ProcessorCache, ProcessorStats};
