//! # Handler Registry
//!
//! Explicit registration of handlers and interceptors against the bus-wide
//! application context type `C`.
//!
//! A [`HandlerCandidate`] describes one handler or interceptor together with
//! the context type it was written for. [`HandlerRegistry::try_register`]
//! checks that context against the registry's own, registers the handled
//! message type in the [`TypeRegistry`], and stores a factory for it.
//! Registration is additive: a message type may collect many handlers.
//! Every change bumps a per-type generation so cached dispatch state built
//! from an older view of the registry can be detected and rebuilt.
//!
//! ```rust
//! use durabus::bus::{HandlerContext, HandlerFailure, Message};
//! use durabus::registry::{HandlerRegistry, TypeRegistry};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//!
//! #[derive(Serialize, Deserialize)]
//! struct Ping;
//! impl Message for Ping {
//!     type Reply = String;
//! }
//!
//! struct App;
//!
//! let registry = HandlerRegistry::<App>::new(Arc::new(TypeRegistry::new()));
//! registry
//!     .register_handler::<Ping, _, _>("pong", |_app| {
//!         |_: &Ping, _: &HandlerContext<App>| Ok::<_, HandlerFailure>("pong".to_string())
//!     })
//!     .unwrap();
//! assert_eq!(registry.handlers_for::<Ping>().len(), 1);
//! ```

use super::type_registry::{RegisteredType, TypeDescriptor, TypeRegistry};
use crate::bus::{
    AsyncHandler, Handler, HandlerBinding, HandlerFactory, HandlerInstance, Interceptor, Message,
};
use crate::error::RegistryError;
use crate::logging::log_registry_operation;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Builds an interceptor from the application context
pub type InterceptorFactory<C> = Arc<dyn Fn(&Arc<C>) -> Arc<dyn Interceptor<C>> + Send + Sync>;

/// A named interceptor registration
pub struct InterceptorBinding<C> {
    pub name: String,
    pub factory: InterceptorFactory<C>,
}

impl<C> Clone for InterceptorBinding<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<C> std::fmt::Debug for InterceptorBinding<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorBinding")
            .field("name", &self.name)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateRole {
    Handler,
    Interceptor,
}

/// A handler or interceptor offered for registration.
///
/// The binding is type-erased so candidates written against any context
/// type can be offered; the registry rejects those whose context differs
/// from its own.
pub struct HandlerCandidate {
    name: String,
    role: CandidateRole,
    message: TypeDescriptor,
    context_type: TypeId,
    context_name: &'static str,
    binding: Arc<dyn Any + Send + Sync>,
}

impl std::fmt::Debug for HandlerCandidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCandidate")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("message", &self.message.rust_name())
            .field("context", &self.context_name)
            .finish()
    }
}

impl HandlerCandidate {
    /// A synchronous handler of `M` written for context `C`
    pub fn handler<M, C, H, F>(name: impl Into<String>, factory: F) -> Self
    where
        M: Message,
        C: Send + Sync + 'static,
        H: Handler<M, C> + 'static,
        F: Fn(&Arc<C>) -> H + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: HandlerFactory<M, C> = Arc::new(move |app: &Arc<C>| {
            HandlerInstance::Sync(Arc::new(factory(app)) as Arc<dyn Handler<M, C>>)
        });
        let binding = HandlerBinding {
            name: name.clone(),
            factory,
        };
        Self::erased::<M, C>(name, CandidateRole::Handler, Arc::new(binding))
    }

    /// An asynchronous handler of `M` written for context `C`
    pub fn async_handler<M, C, H, F>(name: impl Into<String>, factory: F) -> Self
    where
        M: Message,
        C: Send + Sync + 'static,
        H: AsyncHandler<M, C> + 'static,
        F: Fn(&Arc<C>) -> H + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: HandlerFactory<M, C> = Arc::new(move |app: &Arc<C>| {
            HandlerInstance::Async(Arc::new(factory(app)) as Arc<dyn AsyncHandler<M, C>>)
        });
        let binding = HandlerBinding {
            name: name.clone(),
            factory,
        };
        Self::erased::<M, C>(name, CandidateRole::Handler, Arc::new(binding))
    }

    /// An interceptor wrapping every handler of `M`
    pub fn interceptor<M, C, I, F>(name: impl Into<String>, factory: F) -> Self
    where
        M: Message,
        C: Send + Sync + 'static,
        I: Interceptor<C> + 'static,
        F: Fn(&Arc<C>) -> I + Send + Sync + 'static,
    {
        let name = name.into();
        let factory: InterceptorFactory<C> =
            Arc::new(move |app: &Arc<C>| Arc::new(factory(app)) as Arc<dyn Interceptor<C>>);
        let binding = InterceptorBinding {
            name: name.clone(),
            factory,
        };
        Self::erased::<M, C>(name, CandidateRole::Interceptor, Arc::new(binding))
    }

    fn erased<M: Message, C: 'static>(
        name: String,
        role: CandidateRole,
        binding: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            name,
            role,
            message: TypeDescriptor::message::<M>(),
            context_type: TypeId::of::<C>(),
            context_name: std::any::type_name::<C>(),
            binding,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_interceptor(&self) -> bool {
        self.role == CandidateRole::Interceptor
    }

    pub fn message_type(&self) -> &TypeDescriptor {
        &self.message
    }
}

struct RegistryEntry<C> {
    registered: RegisteredType,
    handlers: Vec<(String, Arc<dyn Any + Send + Sync>)>,
    interceptor: Option<InterceptorBinding<C>>,
    generation: u64,
}

/// Registry statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistryStats {
    pub message_types: usize,
    pub handlers: usize,
    pub interceptors: usize,
    pub has_default_interceptor: bool,
}

/// Message type → handlers map for one application context type.
pub struct HandlerRegistry<C> {
    types: Arc<TypeRegistry>,
    entries: RwLock<HashMap<TypeId, RegistryEntry<C>>>,
    default_interceptor: RwLock<Option<InterceptorBinding<C>>>,
    default_generation: AtomicU64,
}

impl<C> std::fmt::Debug for HandlerRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("context", &std::any::type_name::<C>())
            .field("message_types", &self.entries.read().len())
            .finish()
    }
}

impl<C: Send + Sync + 'static> HandlerRegistry<C> {
    pub fn new(types: Arc<TypeRegistry>) -> Self {
        Self {
            types,
            entries: RwLock::new(HashMap::new()),
            default_interceptor: RwLock::new(None),
            default_generation: AtomicU64::new(0),
        }
    }

    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Register a candidate. Returns `Ok(false)` when a handler with the same
    /// name is already registered for that message type.
    pub fn try_register(&self, candidate: HandlerCandidate) -> Result<bool, RegistryError> {
        if candidate.context_type != TypeId::of::<C>() {
            log_registry_operation(
                "register_rejected",
                Some(&candidate.name),
                "context_mismatch",
                Some(candidate.context_name),
            );
            return Err(RegistryError::ContextMismatch {
                candidate: candidate.name,
                declared: candidate.context_name,
                configured: std::any::type_name::<C>(),
            });
        }
        if candidate.name.trim().is_empty() {
            return Err(RegistryError::InvalidCandidate {
                candidate: candidate.message.rust_name().to_string(),
                reason: "registration name is empty".to_string(),
            });
        }

        let registered = self.types.get_or_register_message(&candidate.message)?;
        let mut entries = self.entries.write();
        let entry = entries
            .entry(candidate.message.type_id())
            .or_insert_with(|| RegistryEntry {
                registered: registered.clone(),
                handlers: Vec::new(),
                interceptor: None,
                generation: 0,
            });

        match candidate.role {
            CandidateRole::Handler => {
                if entry.handlers.iter().any(|(name, _)| *name == candidate.name) {
                    debug!(
                        handler = %candidate.name,
                        message_type = %registered.name,
                        "Handler already registered"
                    );
                    return Ok(false);
                }
                entry
                    .handlers
                    .push((candidate.name.clone(), candidate.binding));
                entry.generation += 1;
                info!(
                    handler = %candidate.name,
                    message_type = %registered.name,
                    handlers = entry.handlers.len(),
                    "Registered handler"
                );
            }
            CandidateRole::Interceptor => {
                let binding = candidate
                    .binding
                    .downcast_ref::<InterceptorBinding<C>>()
                    .cloned()
                    .ok_or_else(|| RegistryError::InvalidCandidate {
                        candidate: candidate.name.clone(),
                        reason: "binding is not an interceptor".to_string(),
                    })?;
                if let Some(existing) = &entry.interceptor {
                    if existing.name == binding.name {
                        return Ok(false);
                    }
                    return Err(RegistryError::InvalidCandidate {
                        candidate: candidate.name,
                        reason: format!(
                            "{} already has interceptor '{}'",
                            registered.name, existing.name
                        ),
                    });
                }
                entry.interceptor = Some(binding);
                entry.generation += 1;
                info!(
                    interceptor = %candidate.name,
                    message_type = %registered.name,
                    "Registered interceptor"
                );
            }
        }

        log_registry_operation("register", Some(&candidate.name), "ok", Some(&registered.name));
        Ok(true)
    }

    pub fn register_handler<M, H, F>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<bool, RegistryError>
    where
        M: Message,
        H: Handler<M, C> + 'static,
        F: Fn(&Arc<C>) -> H + Send + Sync + 'static,
    {
        self.try_register(HandlerCandidate::handler::<M, C, H, F>(name, factory))
    }

    pub fn register_async_handler<M, H, F>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<bool, RegistryError>
    where
        M: Message,
        H: AsyncHandler<M, C> + 'static,
        F: Fn(&Arc<C>) -> H + Send + Sync + 'static,
    {
        self.try_register(HandlerCandidate::async_handler::<M, C, H, F>(name, factory))
    }

    pub fn register_interceptor<M, I, F>(
        &self,
        name: impl Into<String>,
        factory: F,
    ) -> Result<bool, RegistryError>
    where
        M: Message,
        I: Interceptor<C> + 'static,
        F: Fn(&Arc<C>) -> I + Send + Sync + 'static,
    {
        self.try_register(HandlerCandidate::interceptor::<M, C, I, F>(name, factory))
    }

    /// Interceptor used for message types without their own
    pub fn set_default_interceptor<I, F>(&self, name: impl Into<String>, factory: F)
    where
        I: Interceptor<C> + 'static,
        F: Fn(&Arc<C>) -> I + Send + Sync + 'static,
    {
        let name = name.into();
        info!(interceptor = %name, "Default interceptor set");
        let factory: InterceptorFactory<C> =
            Arc::new(move |app: &Arc<C>| Arc::new(factory(app)) as Arc<dyn Interceptor<C>>);
        *self.default_interceptor.write() = Some(InterceptorBinding { name, factory });
        self.default_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Monotonic counter of changes affecting how `M` is dispatched
    pub fn generation_for<M: Message>(&self) -> u64 {
        let own = self
            .entries
            .read()
            .get(&TypeId::of::<M>())
            .map_or(0, |entry| entry.generation);
        own + self.default_generation.load(Ordering::SeqCst)
    }

    /// Handlers of `M` in registration order
    pub fn handlers_for<M: Message>(&self) -> Vec<HandlerBinding<M, C>> {
        self.entries
            .read()
            .get(&TypeId::of::<M>())
            .map(|entry| {
                entry
                    .handlers
                    .iter()
                    .filter_map(|(_, binding)| binding.downcast_ref::<HandlerBinding<M, C>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The interceptor for `M`, falling back to the default one
    pub fn interceptor_for<M: Message>(&self) -> Option<InterceptorBinding<C>> {
        self.entries
            .read()
            .get(&TypeId::of::<M>())
            .and_then(|entry| entry.interceptor.clone())
            .or_else(|| self.default_interceptor.read().clone())
    }

    /// Registration of `M` in the type registry, created on demand
    pub fn registered_type<M: Message>(&self) -> Result<RegisteredType, RegistryError> {
        if let Some(entry) = self.entries.read().get(&TypeId::of::<M>()) {
            return Ok(entry.registered.clone());
        }
        self.types
            .get_or_register_message(&TypeDescriptor::message::<M>())
    }

    pub fn handler_count_for(&self, type_id: TypeId) -> usize {
        self.entries
            .read()
            .get(&type_id)
            .map_or(0, |entry| entry.handlers.len())
    }

    pub fn has_handlers(&self, type_id: TypeId) -> bool {
        self.handler_count_for(type_id) > 0
    }

    pub fn stats(&self) -> HandlerRegistryStats {
        let entries = self.entries.read();
        HandlerRegistryStats {
            message_types: entries.len(),
            handlers: entries.values().map(|e| e.handlers.len()).sum(),
            interceptors: entries.values().filter(|e| e.interceptor.is_some()).count(),
            has_default_interceptor: self.default_interceptor.read().is_some(),
        }
    }
}
