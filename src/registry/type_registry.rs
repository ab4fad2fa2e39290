//! # Type Registry
//!
//! Maps concrete Rust types to stable logical identifiers and back.
//!
//! The identifier is a UUID v5 of the resolved type name, so every process
//! that resolves the same name derives the same id without coordination.
//! Concurrent registration of one type therefore converges trivially; two
//! *different* types resolving to one name is a configuration error.
//!
//! The name is a pure function of the [`TypeDescriptor`]. A type registered
//! both as a message and as a plain type (a reply that is also a message
//! with its own `message_name`) keeps one registration per role, so neither
//! id depends on which role was registered first.

use super::type_name::{RustTypeNameResolver, TypeNameResolver};
use crate::bus::Message;
use crate::error::RegistryError;
use crate::logging::log_registry_operation;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use uuid::Uuid;

/// Namespace for message-type identifiers
pub const MESSAGE_TYPE_NAMESPACE: Uuid = Uuid::from_u128(0x6a5d_2f0e_8c41_4b7a_9e3d_1f2c_7b48_e901);

/// Runtime token for a concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    type_id: TypeId,
    rust_name: &'static str,
    message_name: Option<&'static str>,
}

impl TypeDescriptor {
    /// Any `'static` type; not a message unless built with [`TypeDescriptor::message`]
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
            message_name: None,
        }
    }

    pub fn message<M: Message>() -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            rust_name: std::any::type_name::<M>(),
            message_name: Some(M::message_name()),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn rust_name(&self) -> &'static str {
        self.rust_name
    }

    pub fn message_name(&self) -> Option<&'static str> {
        self.message_name
    }

    pub fn is_message(&self) -> bool {
        self.message_name.is_some()
    }
}

/// A type together with its logical identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredType {
    pub id: Uuid,
    pub name: String,
    pub descriptor: TypeDescriptor,
}

pub struct TypeRegistry {
    resolver: Arc<dyn TypeNameResolver>,
    messages: DashMap<TypeId, RegisteredType>,
    plain: DashMap<TypeId, RegisteredType>,
    by_id: DashMap<Uuid, RegisteredType>,
    by_name: DashMap<String, TypeDescriptor>,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("registered", &self.len())
            .finish()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(RustTypeNameResolver))
    }

    pub fn with_resolver(resolver: Arc<dyn TypeNameResolver>) -> Self {
        Self {
            resolver,
            messages: DashMap::new(),
            plain: DashMap::new(),
            by_id: DashMap::new(),
            by_name: DashMap::new(),
        }
    }

    /// Logical id a name maps to
    pub fn id_for_name(name: &str) -> Uuid {
        Uuid::new_v5(&MESSAGE_TYPE_NAMESPACE, name.as_bytes())
    }

    fn role_map(&self, descriptor: &TypeDescriptor) -> &DashMap<TypeId, RegisteredType> {
        if descriptor.is_message() {
            &self.messages
        } else {
            &self.plain
        }
    }

    /// Register `descriptor` if needed and return its registration
    pub fn get_or_register(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Result<RegisteredType, RegistryError> {
        let role_map = self.role_map(descriptor);
        if let Some(existing) = role_map.get(&descriptor.type_id) {
            return Ok(existing.clone());
        }

        let name = self.resolver.to_name(descriptor);
        match self.by_name.entry(name.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().type_id != descriptor.type_id {
                    return Err(RegistryError::NameCollision {
                        name,
                        existing: entry.get().rust_name,
                        incoming: descriptor.rust_name,
                    });
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(*descriptor);
            }
        }

        let registered = RegisteredType {
            id: Self::id_for_name(&name),
            name,
            descriptor: *descriptor,
        };
        match self.by_id.entry(registered.id) {
            Entry::Occupied(mut entry) => {
                // Both roles resolved to one name; resolve to the message form
                if descriptor.is_message() && !entry.get().descriptor.is_message() {
                    entry.insert(registered.clone());
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(registered.clone());
            }
        }
        let registered = role_map
            .entry(descriptor.type_id)
            .or_insert(registered)
            .clone();

        log_registry_operation(
            "type_registered",
            Some(&registered.name),
            "ok",
            Some(&registered.id.to_string()),
        );
        Ok(registered)
    }

    /// Register a type that must carry the message marker
    pub fn get_or_register_message(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Result<RegisteredType, RegistryError> {
        if !descriptor.is_message() {
            return Err(RegistryError::NotAMessage(descriptor.rust_name));
        }
        self.get_or_register(descriptor)
    }

    pub fn resolve(&self, id: Uuid) -> Result<TypeDescriptor, RegistryError> {
        self.by_id
            .get(&id)
            .map(|entry| entry.descriptor)
            .ok_or(RegistryError::UnknownMessageType(id))
    }

    /// Registration of a type, preferring its message role
    pub fn lookup(&self, type_id: TypeId) -> Option<RegisteredType> {
        self.messages
            .get(&type_id)
            .or_else(|| self.plain.get(&type_id))
            .map(|entry| entry.clone())
    }

    pub fn lookup_id(&self, id: Uuid) -> Option<RegisteredType> {
        self.by_id.get(&id).map(|entry| entry.clone())
    }

    /// Number of registrations, counting each role of a type separately
    pub fn len(&self) -> usize {
        self.messages.len() + self.plain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.plain.is_empty()
    }
}
