//! Per-message-type handler processors and their cache.
//!
//! A processor is built once per concrete message type from the handler
//! registry and reused for every later dispatch of that type, until the
//! registry reports a newer generation for that type.

use super::context::HandlerContext;
use super::handler::{HandlerBinding, HandlerInstance};
use super::interceptor::{ErasedReply, Interceptor, Invocation};
use super::message::Message;
use super::outcome::HandlerFailure;
use crate::config::ServiceLifetime;
use crate::constants::details;
use crate::registry::{InterceptorBinding, RegisteredType};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

enum Resolved<T> {
    Singleton(T),
    Transient(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: Clone> Resolved<T> {
    fn get(&self) -> T {
        match self {
            Self::Singleton(instance) => instance.clone(),
            Self::Transient(factory) => factory(),
        }
    }
}

struct ProcessorHandler<M: Message, C> {
    name: String,
    instance: Resolved<HandlerInstance<M, C>>,
}

/// Invokes the registered handlers of one message type.
pub struct HandlerProcessor<M: Message, C> {
    message_type: RegisteredType,
    handlers: Vec<ProcessorHandler<M, C>>,
    interceptor: Option<(String, Resolved<Arc<dyn Interceptor<C>>>)>,
}

impl<M: Message, C: Send + Sync + 'static> HandlerProcessor<M, C> {
    pub(crate) fn build(
        app: &Arc<C>,
        message_type: RegisteredType,
        bindings: Vec<HandlerBinding<M, C>>,
        interceptor: Option<InterceptorBinding<C>>,
        handler_lifetime: ServiceLifetime,
        interceptor_lifetime: ServiceLifetime,
    ) -> Self {
        let handlers = bindings
            .into_iter()
            .map(|binding| {
                let instance = match handler_lifetime {
                    ServiceLifetime::Singleton => Resolved::Singleton((binding.factory)(app)),
                    ServiceLifetime::Transient => {
                        let app = Arc::clone(app);
                        let factory = binding.factory;
                        Resolved::Transient(Arc::new(move || factory(&app))
                            as Arc<dyn Fn() -> HandlerInstance<M, C> + Send + Sync>)
                    }
                };
                ProcessorHandler {
                    name: binding.name,
                    instance,
                }
            })
            .collect();

        let interceptor = interceptor.map(|binding| {
            let instance = match interceptor_lifetime {
                ServiceLifetime::Singleton => Resolved::Singleton((binding.factory)(app)),
                ServiceLifetime::Transient => {
                    let app = Arc::clone(app);
                    let factory = binding.factory;
                    Resolved::Transient(Arc::new(move || factory(&app))
                        as Arc<dyn Fn() -> Arc<dyn Interceptor<C>> + Send + Sync>)
                }
            };
            (binding.name, instance)
        });

        Self {
            message_type,
            handlers,
            interceptor,
        }
    }

    pub fn message_type(&self) -> &RegisteredType {
        &self.message_type
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name.as_str()).collect()
    }

    pub fn interceptor_name(&self) -> Option<&str> {
        self.interceptor.as_ref().map(|(name, _)| name.as_str())
    }

    /// Run handler `index`, through the interceptor when one is configured.
    /// Panics are caught and reported as handler failures.
    pub async fn invoke(
        &self,
        index: usize,
        message: &M,
        context: &HandlerContext<C>,
    ) -> Result<M::Reply, HandlerFailure> {
        let Some(handler) = self.handlers.get(index) else {
            return Err(HandlerFailure::dispatcher(format!(
                "no handler at position {index} for {}",
                self.message_type.name
            )));
        };
        let instance = handler.instance.get();

        let future = async move {
            let reply = instance.invoke(message, context).await?;
            Ok::<_, HandlerFailure>(Box::new(reply) as ErasedReply)
        }
        .boxed();

        let outcome = match &self.interceptor {
            Some((_, interceptor)) => {
                interceptor
                    .get()
                    .intercept(Invocation {
                        context,
                        handler_name: &handler.name,
                        future,
                    })
                    .await
            }
            None => match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerFailure::from_panic(panic)),
            },
        };

        let outcome = outcome.map_err(|failure| {
            if failure.handler.is_none() {
                failure.with_handler(handler.name.clone())
            } else {
                failure
            }
        })?;

        outcome.downcast::<M::Reply>().map(|reply| *reply).map_err(|_| {
            HandlerFailure::infrastructure(
                super::outcome::FailureKind::Interceptor,
                format!(
                    "interceptor returned a reply that is not a {}",
                    std::any::type_name::<M::Reply>()
                ),
                details::UNHANDLED_INTERCEPTOR_EXCEPTION,
            )
            .with_handler(handler.name.clone())
        })
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorStats {
    pub cached: usize,
    pub constructed: usize,
}

struct CachedProcessor {
    generation: u64,
    processor: Arc<dyn Any + Send + Sync>,
}

/// Thread-safe get-or-build cache keyed by message type
#[derive(Default)]
pub struct ProcessorCache {
    processors: DashMap<TypeId, CachedProcessor>,
    constructed: AtomicUsize,
}

impl ProcessorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached processor for `M`, building it on first use or
    /// when the cached one predates `generation`. `build` runs at most once
    /// per type and generation, even under concurrent first use.
    pub fn get_or_build<M, C, F>(
        &self,
        generation: u64,
        build: F,
    ) -> Option<Arc<HandlerProcessor<M, C>>>
    where
        M: Message,
        C: Send + Sync + 'static,
        F: FnOnce() -> HandlerProcessor<M, C>,
    {
        let fresh = |build: F| {
            self.constructed.fetch_add(1, Ordering::SeqCst);
            CachedProcessor {
                generation,
                processor: Arc::new(build()) as Arc<dyn Any + Send + Sync>,
            }
        };

        let processor = match self.processors.entry(TypeId::of::<M>()) {
            Entry::Occupied(mut entry) => {
                if entry.get().generation < generation {
                    entry.insert(fresh(build));
                }
                Arc::clone(&entry.get().processor)
            }
            Entry::Vacant(entry) => Arc::clone(&entry.insert(fresh(build)).processor),
        };
        processor.downcast::<HandlerProcessor<M, C>>().ok()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            cached: self.processors.len(),
            constructed: self.constructed.load(Ordering::SeqCst),
        }
    }
}
