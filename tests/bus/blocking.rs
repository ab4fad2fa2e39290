//! Blocking facade, driven from plain `#[test]`s

use crate::common::*;
use durabus::bus::{HandlerContext, HandlerFailure, MessageBus};
use durabus::database::InMemoryMessageStore;
use durabus::MessageStatus;
use std::sync::Arc;

#[test]
fn test_blocking_send_and_publish() {
    let store = InMemoryMessageStore::new();
    let handlers = receipts_registry();
    handlers
        .register_handler::<OrderShipped, _, _>("audit", |_| {
            |event: &OrderShipped, context: &HandlerContext<App>| -> Result<(), HandlerFailure> {
                context.app().record(format!("audit:{}", event.order_id));
                Ok(())
            }
        })
        .expect("handler registers");

    let app = Arc::new(App::default());
    let bus = MessageBus::builder(Arc::clone(&app))
        .store(Arc::new(store.clone()))
        .handlers(handlers)
        .build_blocking()
        .expect("bus builds");

    let receipt = bus.send(OrderCreated { order_id: 42 }).expect("send succeeds");
    assert_eq!(receipt.id, "R-42");

    let published = bus
        .publish(OrderShipped { order_id: 42 })
        .expect("publish succeeds");
    assert_eq!(published.handlers_invoked, 1);

    assert_eq!(
        app.calls(),
        vec!["receipts:42".to_string(), "audit:42".to_string()]
    );
    let tables = store.tables();
    assert_eq!(tables.handler_messages.len(), 3);
    assert!(tables
        .handler_messages
        .values()
        .all(|row| row.status() == Some(MessageStatus::Completed)));

    bus.shutdown();
}

#[test]
fn test_blocking_send_reports_handler_error() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("ledger", |_| {
            |_: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Err(HandlerFailure::new("bad state"))
            }
        })
        .expect("handler registers");

    let bus = MessageBus::builder(Arc::new(App::default()))
        .store(Arc::new(InMemoryMessageStore::new()))
        .handlers(handlers)
        .build_blocking()
        .expect("bus builds");

    let err = bus
        .send(OrderCreated { order_id: 1 })
        .expect_err("handler fails");
    assert!(err.is_handler_error());

    let envelope_id = err.envelope_id().expect("envelope was persisted");
    let envelope = bus
        .block_on(bus.bus().persistence().find_envelope(envelope_id))
        .expect("lookup succeeds")
        .expect("envelope exists");
    assert_eq!(envelope.status(), Some(MessageStatus::Aborted));
}
