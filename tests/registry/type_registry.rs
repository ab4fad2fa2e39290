//! Type registry properties

use crate::common::strategies::{logical_type_name, registration_order};
use durabus::bus::Message;
use durabus::error::RegistryError;
use durabus::registry::{ShortTypeNameResolver, TypeDescriptor, TypeNameResolver, TypeRegistry};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
struct Alpha;
impl Message for Alpha {
    type Reply = ();
}

#[derive(Serialize, Deserialize)]
struct Beta;
impl Message for Beta {
    type Reply = ();
    fn message_name() -> &'static str {
        "tests.Beta"
    }
}

#[derive(Serialize, Deserialize)]
struct Gamma(u32);
impl Message for Gamma {
    type Reply = String;
}

#[derive(Serialize, Deserialize)]
struct Delta {
    label: String,
}
impl Message for Delta {
    type Reply = u64;
}

fn descriptors() -> [TypeDescriptor; 4] {
    [
        TypeDescriptor::message::<Alpha>(),
        TypeDescriptor::message::<Beta>(),
        TypeDescriptor::message::<Gamma>(),
        TypeDescriptor::message::<Delta>(),
    ]
}

mod inventory {
    pub struct Item;
}

mod catalog {
    pub struct Item;
}

proptest! {
    /// Property: resolving a registration gives back the registered type,
    /// whatever the order and repetition of registrations
    #[test]
    fn resolve_inverts_get_or_register(order in registration_order(4)) {
        let registry = TypeRegistry::new();
        let all = descriptors();
        let mut seen = HashSet::new();

        for index in order {
            let registered = registry.get_or_register(&all[index]).unwrap();
            prop_assert_eq!(registry.resolve(registered.id).unwrap(), all[index]);
            let name = all[index].message_name().unwrap();
            prop_assert_eq!(registered.id, TypeRegistry::id_for_name(name));
            prop_assert_eq!(registered.name.as_str(), name);
            seen.insert(index);
        }
        prop_assert_eq!(registry.len(), seen.len());
    }

    /// Property: logical ids depend on the name alone
    #[test]
    fn logical_ids_are_name_derived(name in logical_type_name(), other in logical_type_name()) {
        let id = TypeRegistry::id_for_name(&name);
        prop_assert_eq!(id, TypeRegistry::id_for_name(&name.clone()));
        prop_assert_eq!(id.get_version_num(), 5);
        if name != other {
            prop_assert_ne!(id, TypeRegistry::id_for_name(&other));
        }
    }
}

#[test]
fn test_concurrent_registration_converges() {
    let registry = Arc::new(TypeRegistry::new());
    let all = descriptors();

    let views: Vec<HashMap<TypeId, Uuid>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|offset| {
                let registry = Arc::clone(&registry);
                scope.spawn(move || {
                    (0..all.len())
                        .map(|i| {
                            let registered = registry
                                .get_or_register(&all[(i + offset) % all.len()])
                                .unwrap();
                            (registered.descriptor.type_id(), registered.id)
                        })
                        .collect()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(registry.len(), 4);
    for view in &views {
        assert_eq!(view, &views[0]);
    }
}

#[test]
fn test_unknown_id_does_not_resolve() {
    let registry = TypeRegistry::new();
    let id = TypeRegistry::id_for_name("never.Registered");
    assert_eq!(registry.resolve(id), Err(RegistryError::UnknownMessageType(id)));
}

#[test]
fn test_non_message_type_is_refused_as_message() {
    let registry = TypeRegistry::new();
    let err = registry
        .get_or_register_message(&TypeDescriptor::of::<inventory::Item>())
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotAMessage(_)));
    assert!(registry.is_empty());
}

#[test]
fn test_short_names_collide_across_modules() {
    let registry = TypeRegistry::with_resolver(Arc::new(ShortTypeNameResolver));
    let first = registry
        .get_or_register(&TypeDescriptor::of::<inventory::Item>())
        .unwrap();
    assert_eq!(first.name, "Item");

    let err = registry
        .get_or_register(&TypeDescriptor::of::<catalog::Item>())
        .unwrap_err();
    assert!(matches!(err, RegistryError::NameCollision { ref name, .. } if name == "Item"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_short_names_keep_generic_structure() {
    let name = ShortTypeNameResolver.to_name(&TypeDescriptor::of::<Vec<inventory::Item>>());
    assert_eq!(name, "Vec<Item>");
}
