//! Handler registration rules

use crate::common::*;
use durabus::bus::{HandlerContext, HandlerFailure, TracingInterceptor};
use durabus::error::RegistryError;
use durabus::registry::{HandlerCandidate, HandlerRegistry, TypeRegistry};
use std::any::TypeId;
use std::sync::Arc;

/// A context type the test registry is not configured for
struct OtherApp;

fn receipt(order: &OrderCreated) -> Result<Receipt, HandlerFailure> {
    Ok(Receipt {
        id: order.order_id.to_string(),
    })
}

#[test]
fn test_duplicate_handler_name_is_ignored() {
    let handlers = new_registry();
    let first = handlers
        .register_handler::<OrderCreated, _, _>("receipts", |_| {
            |order: &OrderCreated, _: &HandlerContext<App>| receipt(order)
        })
        .expect("first registration");
    let second = handlers
        .register_handler::<OrderCreated, _, _>("receipts", |_| {
            |order: &OrderCreated, _: &HandlerContext<App>| receipt(order)
        })
        .expect("duplicate is not an error");

    assert!(first);
    assert!(!second);
    assert_eq!(handlers.handler_count_for(TypeId::of::<OrderCreated>()), 1);
}

#[test]
fn test_candidate_for_another_context_is_rejected() {
    let handlers = new_registry();
    let candidate = HandlerCandidate::handler::<OrderCreated, OtherApp, _, _>("foreign", |_| {
        |order: &OrderCreated, _: &HandlerContext<OtherApp>| receipt(order)
    });

    let err = handlers.try_register(candidate).expect_err("context differs");
    assert!(matches!(err, RegistryError::ContextMismatch { ref candidate, .. } if candidate == "foreign"));
    assert!(!handlers.has_handlers(TypeId::of::<OrderCreated>()));
}

#[test]
fn test_handlers_keep_registration_order() {
    let handlers = new_registry();
    for name in ["c", "a", "b"] {
        handlers
            .register_handler::<OrderShipped, _, _>(name, |_| {
                |_: &OrderShipped, _: &HandlerContext<App>| -> Result<(), HandlerFailure> { Ok(()) }
            })
            .expect("handler registers");
    }

    let names: Vec<String> = handlers
        .handlers_for::<OrderShipped>()
        .into_iter()
        .map(|binding| binding.name)
        .collect();
    assert_eq!(names, vec!["c", "a", "b"]);
}

#[test]
fn test_per_type_interceptor_overrides_default() {
    let handlers = receipts_registry();
    handlers.set_default_interceptor("default", |_| TracingInterceptor::default());
    assert_eq!(
        handlers.interceptor_for::<OrderCreated>().map(|b| b.name),
        Some("default".to_string())
    );

    let registered = handlers
        .register_interceptor::<OrderCreated, _, _>("orders", |_| TracingInterceptor::new("x"))
        .expect("interceptor registers");
    assert!(registered);
    assert_eq!(
        handlers.interceptor_for::<OrderCreated>().map(|b| b.name),
        Some("orders".to_string())
    );

    let again = handlers
        .register_interceptor::<OrderCreated, _, _>("orders", |_| TracingInterceptor::new("x"))
        .expect("same interceptor again");
    assert!(!again);

    let err = handlers
        .register_interceptor::<OrderCreated, _, _>("audit", |_| TracingInterceptor::new("y"))
        .expect_err("one interceptor per type");
    assert!(matches!(err, RegistryError::InvalidCandidate { .. }));

    let stats = handlers.stats();
    assert_eq!(stats.handlers, 1);
    assert_eq!(stats.interceptors, 1);
    assert!(stats.has_default_interceptor);
}

#[test]
fn test_registries_can_share_a_type_registry() {
    let types = Arc::new(TypeRegistry::new());
    let first: HandlerRegistry<App> = HandlerRegistry::new(Arc::clone(&types));
    let second: HandlerRegistry<OtherApp> = HandlerRegistry::new(Arc::clone(&types));

    let a = first.registered_type::<OrderCreated>().expect("registers");
    let b = second.registered_type::<OrderCreated>().expect("registers");
    assert_eq!(a, b);
    assert_eq!(types.len(), 1);
    assert_eq!(a.name, "orders.OrderCreated");
}
