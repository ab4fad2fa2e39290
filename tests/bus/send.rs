//! Request/response dispatch

use crate::common::*;
use durabus::bus::{
    HandlerContext, HandlerFailure, Message, SendOptions, TraceInfo, TracingInterceptor,
};
use durabus::config::{BusConfig, ServiceLifetime};
use durabus::constants::details;
use durabus::registry::{HandlerRegistry, TypeRegistry};
use durabus::MessageStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_send_persists_request_and_correlated_response() {
    let t = build_bus(receipts_registry()).await;

    let receipt = t
        .bus
        .send(OrderCreated { order_id: 42 })
        .await
        .expect("send succeeds");
    assert_eq!(receipt.id, "R-42");

    let requests = t.envelopes_of::<OrderCreated>();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.status(), Some(MessageStatus::Completed));
    assert_eq!(request.id_host, t.bus.host().id_host);

    let response_id = request
        .id_corresponding_message
        .expect("request is correlated to its response");
    let response = t.envelope(response_id);
    assert_eq!(response.status(), Some(MessageStatus::Completed));
    assert_eq!(
        response.id_corresponding_message,
        Some(request.id_handler_message)
    );
    assert_eq!(t.envelope_count(), 2);

    assert_eq!(
        t.statuses_of(request.id_handler_message),
        vec![
            MessageStatus::Created,
            MessageStatus::InProcess,
            MessageStatus::Completed
        ]
    );
    let log = t.log_of(request.id_handler_message);
    assert_eq!(log.last().map(|row| row.message.as_str()), Some(details::RESPONSE_CREATED));
    assert!(log.iter().all(|row| row.id_host == Some(t.bus.host().id_host)));

    let persistence = t.bus.persistence();
    let stored: Option<OrderCreated> = persistence
        .load_payload(request.id_handler_message)
        .await
        .expect("payload loads");
    assert_eq!(stored, Some(OrderCreated { order_id: 42 }));
    let stored_reply: Option<Receipt> = persistence
        .load_payload(response_id)
        .await
        .expect("payload loads");
    assert_eq!(stored_reply, Some(receipt));

    assert_eq!(t.app.calls(), vec!["receipts:42".to_string()]);
}

#[tokio::test]
async fn test_find_response_for_follows_correlation() {
    let t = build_bus(receipts_registry()).await;
    t.bus.send(OrderCreated { order_id: 7 }).await.expect("send succeeds");

    let request = &t.envelopes_of::<OrderCreated>()[0];
    let response = t
        .bus
        .persistence()
        .find_response_for(request.id_handler_message)
        .await
        .expect("lookup succeeds")
        .expect("response exists");
    assert_eq!(Some(response.id_handler_message), request.id_corresponding_message);
}

#[tokio::test]
async fn test_fire_and_forget_send_completes_without_response() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderShipped, _, _>("shipping", |_| {
            |event: &OrderShipped, context: &HandlerContext<App>| -> Result<(), HandlerFailure> {
                context.app().record(format!("shipped:{}", event.order_id));
                Ok(())
            }
        })
        .expect("handler registers");
    let t = build_bus(handlers).await;

    t.bus.send(OrderShipped { order_id: 3 }).await.expect("send succeeds");

    let envelopes = t.envelopes_of::<OrderShipped>();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].status(), Some(MessageStatus::Completed));
    assert_eq!(envelopes[0].id_corresponding_message, None);
    assert_eq!(t.envelope_count(), 1);
    assert_eq!(t.app.calls(), vec!["shipped:3".to_string()]);
}

#[tokio::test]
async fn test_send_without_handler_persists_nothing() {
    let t = build_bus(new_registry()).await;

    let err = t
        .bus
        .send(OrderCreated { order_id: 1 })
        .await
        .expect_err("no handler is registered");

    assert!(err.is_infrastructure());
    assert_eq!(err.envelope_id(), None);
    assert!(err.failures()[0].error.contains("no handler registered"));
    assert_eq!(err.client_message(), Some(details::DEFAULT_CLIENT_MESSAGE));
    assert_eq!(t.envelope_count(), 0);
}

#[tokio::test]
async fn test_send_with_several_handlers_invokes_only_the_first() {
    let handlers = new_registry();
    for name in ["primary", "secondary"] {
        handlers
            .register_handler::<OrderCreated, _, _>(name, move |_| {
                move |order: &OrderCreated, context: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                    context.app().record(name);
                    Ok(Receipt {
                        id: format!("{name}-{}", order.order_id),
                    })
                }
            })
            .expect("handler registers");
    }
    let t = build_bus(handlers).await;

    let receipt = t.bus.send(OrderCreated { order_id: 5 }).await.expect("send succeeds");

    assert_eq!(receipt.id, "primary-5");
    assert_eq!(t.app.calls(), vec!["primary".to_string()]);
}

#[tokio::test]
async fn test_handler_context_describes_the_dispatch() {
    let handlers = new_registry();
    handlers
        .register_async_handler::<Inspect, _, _>("inspector", |_| Inspector)
        .expect("handler registers");
    let t = build_bus(handlers).await;

    let session = Uuid::new_v4();
    let trace = TraceInfo::new_root().with_correlation_id("req-1");
    let observed = t
        .bus
        .send_with(
            Inspect {
                label: "first".to_string(),
                scratch: 7,
            },
            SendOptions::new()
                .with_session(session)
                .with_timeout(Duration::from_secs(5))
                .with_trace(trace.clone()),
        )
        .await
        .expect("send succeeds");

    assert_eq!(observed.scratch, 7);
    assert_eq!(observed.host_id, t.bus.host().id_host);
    assert_eq!(observed.trace_id, trace.trace_id);
    assert_eq!(observed.session_id, Some(session));
    assert_eq!(observed.timeout, Some(Duration::from_secs(5)));
    assert!(observed.owns_transaction);

    let envelope = t.envelope(observed.envelope_id);
    assert_eq!(envelope.id_session, Some(session));
    assert_eq!(envelope.status(), Some(MessageStatus::Completed));

    let log = t.log_of(observed.envelope_id);
    let annotation = log
        .iter()
        .find(|row| row.message == "inspected")
        .expect("handler annotation committed");
    assert_eq!(annotation.status(), None);
    assert_eq!(annotation.detail.as_deref(), Some("first"));
    assert_eq!(annotation.trace_id, Some(trace.trace_id));
}

#[tokio::test]
async fn test_roundtrip_hands_handler_the_persisted_copy() {
    let handlers = new_registry();
    handlers
        .register_async_handler::<Inspect, _, _>("inspector", |_| Inspector)
        .expect("handler registers");
    let t = build_bus(handlers).await;

    let message = Inspect {
        label: "roundtrip".to_string(),
        scratch: 9,
    };
    let observed = t
        .bus
        .send_with(message.clone(), SendOptions::new().with_roundtrip(true))
        .await
        .expect("send succeeds");
    assert_eq!(observed.label, "roundtrip");
    assert_eq!(observed.scratch, 0, "skipped field is not persisted");

    let observed = t.bus.send(message).await.expect("send succeeds");
    assert_eq!(observed.scratch, 9);
}

#[tokio::test]
async fn test_default_timeout_comes_from_config() {
    let handlers = new_registry();
    handlers
        .register_async_handler::<Inspect, _, _>("inspector", |_| Inspector)
        .expect("handler registers");
    let mut config = BusConfig::default();
    config.dispatch.default_timeout_seconds = Some(30);
    let t = build_bus_with_config(handlers, config).await;

    let observed = t
        .bus
        .send(Inspect {
            label: "timeout".to_string(),
            scratch: 0,
        })
        .await
        .expect("send succeeds");
    assert_eq!(observed.timeout, Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_processor_is_built_once_per_message_type() {
    let t = build_bus(receipts_registry()).await;

    for order_id in 0..3 {
        t.bus.send(OrderCreated { order_id }).await.expect("send succeeds");
    }
    let stats = t.bus.processor_stats();
    assert_eq!(stats.constructed, 1);
    assert_eq!(stats.cached, 1);

    // A failing dispatch of another type still builds exactly one more
    let _ = t.bus.send(OrderShipped { order_id: 1 }).await;
    let _ = t.bus.send(OrderShipped { order_id: 2 }).await;
    assert_eq!(t.bus.processor_stats().constructed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_share_one_processor() {
    let t = build_bus(receipts_registry()).await;

    let mut tasks = Vec::new();
    for order_id in 0..16 {
        let bus = t.bus.clone();
        tasks.push(tokio::spawn(async move {
            bus.send(OrderCreated { order_id }).await
        }));
    }
    for task in tasks {
        let receipt = task.await.expect("task joins").expect("send succeeds");
        assert!(receipt.id.starts_with("R-"));
    }

    assert_eq!(t.bus.processor_stats().constructed, 1);
    let requests = t.envelopes_of::<OrderCreated>();
    assert_eq!(requests.len(), 16);
    assert!(requests
        .iter()
        .all(|row| row.status() == Some(MessageStatus::Completed)));
}

#[tokio::test]
async fn test_singleton_handlers_are_built_once() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("counted", |app| {
            app.factory_called();
            |order: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Ok(Receipt {
                    id: order.order_id.to_string(),
                })
            }
        })
        .expect("handler registers");
    let t = build_bus(handlers).await;

    assert_eq!(t.app.factory_calls(), 0, "processors are built lazily");
    for order_id in 0..3 {
        t.bus.send(OrderCreated { order_id }).await.expect("send succeeds");
    }
    assert_eq!(t.app.factory_calls(), 1);
}

#[tokio::test]
async fn test_transient_handlers_are_built_per_dispatch() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("counted", |app| {
            app.factory_called();
            |order: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Ok(Receipt {
                    id: order.order_id.to_string(),
                })
            }
        })
        .expect("handler registers");
    let mut config = BusConfig::default();
    config.dispatch.handler_lifetime = ServiceLifetime::Transient;
    let t = build_bus_with_config(handlers, config).await;

    for order_id in 0..3 {
        t.bus.send(OrderCreated { order_id }).await.expect("send succeeds");
    }
    assert_eq!(t.app.factory_calls(), 3);
}

#[tokio::test]
async fn test_interceptor_wraps_successful_send() {
    let handlers = receipts_registry();
    handlers.set_default_interceptor("tracing", |_| TracingInterceptor::default());
    let t = build_bus(handlers).await;

    let receipt = t.bus.send(OrderCreated { order_id: 8 }).await.expect("send succeeds");
    assert_eq!(receipt.id, "R-8");
    assert_eq!(
        t.envelopes_of::<OrderCreated>()[0].status(),
        Some(MessageStatus::Completed)
    );
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_dispatch_futures_can_be_spawned() {
    let t = build_bus(receipts_registry()).await;

    let send = t.bus.send(OrderCreated { order_id: 1 });
    assert_send(&send);
    assert_eq!(send.await.expect("send succeeds").id, "R-1");

    let publish = t.bus.publish(OrderShipped { order_id: 1 });
    assert_send(&publish);
    publish.await.expect("publish without handlers completes");

    let bus = t.bus.clone();
    let receipt = tokio::spawn(async move { bus.send(OrderCreated { order_id: 2 }).await })
        .await
        .expect("task joins")
        .expect("send succeeds");
    assert_eq!(receipt.id, "R-2");
}

#[tokio::test]
async fn test_handler_registered_after_a_failed_send_is_used() {
    let handlers = new_registry();
    let t = build_bus(Arc::clone(&handlers)).await;

    let err = t
        .bus
        .send(OrderCreated { order_id: 1 })
        .await
        .expect_err("no handler yet");
    assert!(!err.is_handler_error());

    handlers
        .register_handler::<OrderCreated, _, _>("late-receipts", |_| {
            |order: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Ok(Receipt {
                    id: format!("L-{}", order.order_id),
                })
            }
        })
        .expect("handler registers");

    let receipt = t
        .bus
        .send(OrderCreated { order_id: 2 })
        .await
        .expect("late handler answers");
    assert_eq!(receipt.id, "L-2");
    assert_eq!(t.bus.processor_stats().constructed, 2);

    t.bus.send(OrderCreated { order_id: 3 }).await.expect("send succeeds");
    assert_eq!(t.bus.processor_stats().constructed, 2, "rebuilt once per change");
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Quote {
    amount: u64,
}

impl Message for Quote {
    type Reply = Booking;
}

/// Reply that is also a message with its own logical name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Booking {
    amount: u64,
}

impl Message for Booking {
    type Reply = ();

    fn message_name() -> &'static str {
        "orders.Booking"
    }
}

fn quote_registry() -> Arc<HandlerRegistry<App>> {
    let handlers = new_registry();
    handlers
        .register_handler::<Quote, _, _>("quotes", |_| {
            |quote: &Quote, _: &HandlerContext<App>| -> Result<Booking, HandlerFailure> {
                Ok(Booking {
                    amount: quote.amount,
                })
            }
        })
        .expect("handler registers");
    handlers
}

async fn response_type_of_quote(t: &TestBus) -> Uuid {
    t.bus.send(Quote { amount: 5 }).await.expect("send succeeds");
    let request = &t.envelopes_of::<Quote>()[0];
    let response_id = request.id_corresponding_message.expect("correlated");
    t.envelope(response_id).id_message_type
}

#[tokio::test]
async fn test_reply_type_id_does_not_depend_on_registration_order() {
    let reply_first = build_bus(quote_registry()).await;
    let reply_first_id = response_type_of_quote(&reply_first).await;
    reply_first
        .bus
        .handlers()
        .registered_type::<Booking>()
        .expect("message registers");

    let message_first = build_bus(quote_registry()).await;
    let booking = message_first
        .bus
        .handlers()
        .registered_type::<Booking>()
        .expect("message registers");
    let message_first_id = response_type_of_quote(&message_first).await;

    assert_eq!(reply_first_id, message_first_id);
    assert_eq!(
        reply_first_id,
        TypeRegistry::id_for_name(std::any::type_name::<Booking>())
    );
    assert_eq!(booking.id, TypeRegistry::id_for_name("orders.Booking"));
    assert_eq!(
        reply_first
            .bus
            .handlers()
            .registered_type::<Booking>()
            .expect("message registers")
            .id,
        booking.id
    );
}
