//! Blocking facade over [`MessageBus`].
//!
//! Drives the async dispatcher on a private current-thread runtime. Calls
//! block the current thread and cannot be cancelled. Do not use from inside
//! an async runtime; call the async bus there instead.

use super::message::{Message, SendOptions};
use super::message_bus::{MessageBus, MessageBusBuilder};
use super::outcome::{DispatchResult, PublishReceipt};
use crate::error::{BusError, BusResult};
use tokio::runtime::{Builder, Runtime};

pub struct BlockingMessageBus<C> {
    bus: MessageBus<C>,
    runtime: Runtime,
}

impl<C> std::fmt::Debug for BlockingMessageBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingMessageBus")
            .field("bus", &self.bus)
            .finish()
    }
}

fn current_thread_runtime() -> BusResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .thread_name("durabus-blocking")
        .build()
        .map_err(|e| BusError::InvalidSetup(format!("failed to start blocking runtime: {e}")))
}

impl<C: Send + Sync + 'static> BlockingMessageBus<C> {
    /// Build the bus on a new runtime owned by the facade
    pub fn build(builder: MessageBusBuilder<C>) -> BusResult<Self> {
        let runtime = current_thread_runtime()?;
        let bus = runtime.block_on(builder.build())?;
        Ok(Self { bus, runtime })
    }

    /// The async bus; use it only from tasks run by [`Self::block_on`]
    pub fn bus(&self) -> &MessageBus<C> {
        &self.bus
    }

    /// Run an arbitrary future on the facade's runtime
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    pub fn send<M: Message>(&self, message: M) -> DispatchResult<M::Reply> {
        self.runtime.block_on(self.bus.send(message))
    }

    pub fn send_with<M: Message>(
        &self,
        message: M,
        options: SendOptions,
    ) -> DispatchResult<M::Reply> {
        self.runtime.block_on(self.bus.send_with(message, options))
    }

    pub fn publish<M: Message>(&self, event: M) -> DispatchResult<PublishReceipt> {
        self.runtime.block_on(self.bus.publish(event))
    }

    pub fn publish_with<M: Message>(
        &self,
        event: M,
        options: SendOptions,
    ) -> DispatchResult<PublishReceipt> {
        self.runtime.block_on(self.bus.publish_with(event, options))
    }

    pub fn shutdown(self) {
        self.runtime.block_on(self.bus.shutdown());
    }
}

impl<C: Send + Sync + 'static> MessageBusBuilder<C> {
    /// Build a [`BlockingMessageBus`]
    pub fn build_blocking(self) -> BusResult<BlockingMessageBus<C>> {
        BlockingMessageBus::build(self)
    }
}
