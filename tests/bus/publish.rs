//! Publish/subscribe fan-out

use crate::common::*;
use durabus::bus::{HandlerContext, HandlerFailure, TracingInterceptor};
use durabus::registry::HandlerRegistry;
use durabus::MessageStatus;
use std::sync::Arc;

/// Three subscribers; the one named `fail_on` returns an error
fn subscribers(fail_on: Option<&'static str>) -> Arc<HandlerRegistry<App>> {
    let handlers = new_registry();
    for name in ["billing", "stock", "email"] {
        handlers
            .register_handler::<OrderShipped, _, _>(name, move |_| {
                move |event: &OrderShipped, context: &HandlerContext<App>| -> Result<(), HandlerFailure> {
                    context.app().record(format!("{name}:{}", event.order_id));
                    if fail_on == Some(name) {
                        return Err(HandlerFailure::new(format!("{name} is unavailable")));
                    }
                    Ok(())
                }
            })
            .expect("handler registers");
    }
    handlers
}

#[tokio::test]
async fn test_publish_invokes_every_handler_in_order() {
    let t = build_bus(subscribers(None)).await;

    let receipt = t
        .bus
        .publish(OrderShipped { order_id: 11 })
        .await
        .expect("publish succeeds");

    assert_eq!(receipt.handlers_invoked, 3);
    assert_eq!(
        t.app.calls(),
        vec![
            "billing:11".to_string(),
            "stock:11".to_string(),
            "email:11".to_string()
        ]
    );
    let envelope = t.envelope(receipt.envelope_id);
    assert_eq!(envelope.status(), Some(MessageStatus::Completed));
    assert_eq!(envelope.id_corresponding_message, None);
    assert_eq!(t.envelope_count(), 1);
}

#[tokio::test]
async fn test_publish_failure_does_not_skip_later_handlers() {
    let handlers = subscribers(Some("stock"));
    handlers.set_default_interceptor("tracing", |_| TracingInterceptor::default());
    let t = build_bus(handlers).await;

    let err = t
        .bus
        .publish(OrderShipped { order_id: 12 })
        .await
        .expect_err("one subscriber fails");

    assert_eq!(
        t.app.calls(),
        vec![
            "billing:12".to_string(),
            "stock:12".to_string(),
            "email:12".to_string()
        ]
    );
    assert!(err.is_handler_error());
    assert_eq!(err.failures().len(), 1);
    assert_eq!(err.failures()[0].handler.as_deref(), Some("stock"));
    assert_eq!(
        err.succeeded_handlers(),
        ["billing".to_string(), "email".to_string()]
    );

    let envelope = t.envelope(err.envelope_id().expect("envelope was persisted"));
    assert_eq!(envelope.status(), Some(MessageStatus::Aborted));
}

#[tokio::test]
async fn test_publish_collects_every_failure() {
    let handlers = new_registry();
    for name in ["first", "second"] {
        handlers
            .register_handler::<OrderShipped, _, _>(name, move |_| {
                move |_: &OrderShipped, _: &HandlerContext<App>| -> Result<(), HandlerFailure> {
                    Err(HandlerFailure::new(format!("{name} failed")))
                }
            })
            .expect("handler registers");
    }
    let t = build_bus(handlers).await;

    let err = t
        .bus
        .publish(OrderShipped { order_id: 13 })
        .await
        .expect_err("both subscribers fail");

    let failed: Vec<_> = err
        .failures()
        .iter()
        .map(|f| f.handler.clone().unwrap_or_default())
        .collect();
    assert_eq!(failed, vec!["first".to_string(), "second".to_string()]);

    let envelope_id = err.envelope_id().expect("envelope was persisted");
    let aborts = t
        .log_of(envelope_id)
        .into_iter()
        .filter(|row| row.status() == Some(MessageStatus::Aborted))
        .count();
    assert_eq!(aborts, 2, "one audit row per failure");
}

#[tokio::test]
async fn test_publish_without_handlers_completes_envelope() {
    let t = build_bus(new_registry()).await;

    let receipt = t
        .bus
        .publish(OrderShipped { order_id: 14 })
        .await
        .expect("publish succeeds");

    assert_eq!(receipt.handlers_invoked, 0);
    let envelope = t.envelope(receipt.envelope_id);
    assert_eq!(envelope.status(), Some(MessageStatus::Completed));
}
