//! PostgreSQL backend tests
//!
//! Need `DATABASE_URL`; run with `cargo test -- --ignored`. Each test gets a
//! fresh database from SQLx and creates the bus schema itself.

use crate::common::*;
use durabus::bus::{HandlerContext, HandlerFailure, MessageBus, SendOptions};
use durabus::config::SchemaConfig;
use durabus::database::PgMessageStore;
use durabus::error::StorageError;
use durabus::persistence::{
    HostInitializer, HostMetadata, MessagePersistence, MessageTypeKey, NewEnvelope,
};
use durabus::registry::TypeRegistry;
use durabus::{HostKind, MessageStatus};
use sqlx::PgPool;
use std::sync::Arc;

async fn migrated_store(pool: PgPool) -> PgMessageStore {
    let store = PgMessageStore::new(pool, SchemaConfig::default());
    store.migrate().await.expect("schema created");
    store
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_pg_migrations_are_idempotent(pool: PgPool) -> sqlx::Result<()> {
    let store = migrated_store(pool).await;
    store.migrate().await.expect("second run is a no-op");
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_pg_send_persists_correlated_envelopes(pool: PgPool) -> sqlx::Result<()> {
    let store = migrated_store(pool).await;
    let app = Arc::new(App::default());
    let bus = MessageBus::builder(Arc::clone(&app))
        .store(Arc::new(store))
        .handlers(receipts_registry())
        .build()
        .await
        .expect("bus builds");

    let receipt = bus
        .send(OrderCreated { order_id: 42 })
        .await
        .expect("send succeeds");
    assert_eq!(receipt.id, "R-42");

    let failing = bus
        .send_with(OrderShipped { order_id: 1 }, SendOptions::new())
        .await
        .expect_err("no handler for OrderShipped");
    assert!(failing.is_infrastructure());
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_pg_handler_failure_aborts_envelope(pool: PgPool) -> sqlx::Result<()> {
    let store = migrated_store(pool).await;
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("ledger", |_| {
            |_: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Err(HandlerFailure::new("bad state"))
            }
        })
        .expect("handler registers");
    let bus = MessageBus::builder(Arc::new(App::default()))
        .store(Arc::new(store))
        .handlers(handlers)
        .build()
        .await
        .expect("bus builds");

    let err = bus
        .send(OrderCreated { order_id: 42 })
        .await
        .expect_err("handler fails");
    let envelope_id = err.envelope_id().expect("envelope was persisted");

    let persistence = bus.persistence();
    let envelope = persistence
        .find_envelope(envelope_id)
        .await
        .expect("lookup succeeds")
        .expect("row exists");
    assert_eq!(envelope.status(), Some(MessageStatus::Aborted));
    assert_eq!(envelope.id_corresponding_message, None);

    let log = persistence.status_log(envelope_id).await.expect("log loads");
    assert!(log
        .iter()
        .any(|row| row.detail.as_deref().is_some_and(|d| d.contains("bad state"))));
    Ok(())
}

#[sqlx::test(migrations = false)]
#[ignore = "requires PostgreSQL"]
async fn test_pg_stale_sync_token_is_rejected(pool: PgPool) -> sqlx::Result<()> {
    let store = migrated_store(pool).await;
    let persistence = MessagePersistence::new(Arc::new(store));
    // Envelopes reference their host
    let host = HostInitializer::new()
        .initialize(&persistence, &HostMetadata::new(HostKind::Worker, "pg-tests"))
        .await
        .expect("host initialized");
    let envelope = NewEnvelope {
        host_id: host.id_host,
        message_type: MessageTypeKey {
            id: TypeRegistry::id_for_name("orders.OrderCreated"),
            name: "orders.OrderCreated".to_string(),
        },
        session_id: None,
        trace_id: None,
        roundtrip: false,
    };

    let saved = persistence
        .create_request_envelope(None, &OrderCreated { order_id: 1 }, &envelope)
        .await
        .expect("envelope created")
        .envelope;
    persistence
        .complete_envelope(None, &saved, envelope.host_id, None, "done")
        .await
        .expect("first writer wins");

    let err = persistence
        .complete_envelope(None, &saved, envelope.host_id, None, "again")
        .await
        .expect_err("stale token");
    assert!(matches!(err, StorageError::ConcurrencyConflict { .. }));
    Ok(())
}
