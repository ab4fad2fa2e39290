//! Handler contracts.
//!
//! A handler is bound to one message type `M` and to the bus-wide
//! application context type `C`. Both synchronous and asynchronous handlers
//! are supported; closures implement [`Handler`] directly.

use super::context::HandlerContext;
use super::message::Message;
use super::outcome::HandlerFailure;
use async_trait::async_trait;
use std::sync::Arc;

pub trait Handler<M: Message, C>: Send + Sync {
    fn handle(&self, message: &M, context: &HandlerContext<C>) -> Result<M::Reply, HandlerFailure>;
}

impl<M, C, F> Handler<M, C> for F
where
    M: Message,
    F: Fn(&M, &HandlerContext<C>) -> Result<M::Reply, HandlerFailure> + Send + Sync,
{
    fn handle(&self, message: &M, context: &HandlerContext<C>) -> Result<M::Reply, HandlerFailure> {
        self(message, context)
    }
}

#[async_trait]
pub trait AsyncHandler<M: Message, C>: Send + Sync {
    async fn handle(
        &self,
        message: &M,
        context: &HandlerContext<C>,
    ) -> Result<M::Reply, HandlerFailure>;
}

/// A resolved handler instance
pub enum HandlerInstance<M: Message, C> {
    Sync(Arc<dyn Handler<M, C>>),
    Async(Arc<dyn AsyncHandler<M, C>>),
}

impl<M: Message, C> Clone for HandlerInstance<M, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(h) => Self::Sync(Arc::clone(h)),
            Self::Async(h) => Self::Async(Arc::clone(h)),
        }
    }
}

impl<M: Message, C: Send + Sync> HandlerInstance<M, C> {
    pub async fn invoke(
        &self,
        message: &M,
        context: &HandlerContext<C>,
    ) -> Result<M::Reply, HandlerFailure> {
        match self {
            Self::Sync(handler) => handler.handle(message, context),
            Self::Async(handler) => handler.handle(message, context).await,
        }
    }
}

pub type HandlerFactory<M, C> = Arc<dyn Fn(&Arc<C>) -> HandlerInstance<M, C> + Send + Sync>;

/// A named handler registration for `M`
pub struct HandlerBinding<M: Message, C> {
    pub name: String,
    pub factory: HandlerFactory<M, C>,
}

impl<M: Message, C> Clone for HandlerBinding<M, C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<M: Message, C> std::fmt::Debug for HandlerBinding<M, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerBinding")
            .field("name", &self.name)
            .field("message", &M::message_name())
            .finish()
    }
}
