//! Host registration

use crate::common::{new_registry, App};
use durabus::bus::MessageBus;
use durabus::database::{InMemoryMessageStore, MemoryTable};
use durabus::error::StorageError;
use durabus::persistence::{HostInitializer, HostMetadata, MessagePersistence};
use durabus::HostKind;
use std::sync::Arc;

fn metadata() -> HostMetadata {
    HostMetadata::new(HostKind::Worker, "orders-service").with_machine_name("node-1")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_initialization_writes_one_host() {
    let store = InMemoryMessageStore::new();
    let persistence = Arc::new(MessagePersistence::new(Arc::new(store.clone())));
    let initializer = Arc::new(HostInitializer::new());

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let persistence = Arc::clone(&persistence);
        let initializer = Arc::clone(&initializer);
        tasks.push(tokio::spawn(async move {
            initializer.initialize(&persistence, &metadata()).await
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        let host = task.await.expect("task joins").expect("host initialized");
        ids.push(host.id_host);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1, "every caller sees the same host");
    assert_eq!(initializer.write_count(), 1);

    let tables = store.tables();
    assert_eq!(tables.hosts.len(), 1);
    assert_eq!(tables.host_types.len(), 1);
    let host = &tables.hosts[&ids[0]];
    assert_eq!(host.application_name, "orders-service");
    assert_eq!(host.machine_name, "node-1");
    assert_eq!(host.runtime_unique_key, persistence.runtime_key());
    assert_eq!(
        tables.host_types[&host.id_host_type].name,
        HostKind::Worker.name()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cached_host_is_readable_while_others_initialize() {
    let persistence = Arc::new(MessagePersistence::new(Arc::new(InMemoryMessageStore::new())));
    let initializer = Arc::new(HostInitializer::new());
    let host = initializer
        .initialize(&persistence, &metadata())
        .await
        .expect("host initialized");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let persistence = Arc::clone(&persistence);
        let initializer = Arc::clone(&initializer);
        tasks.push(tokio::spawn(async move {
            for _ in 0..100 {
                initializer
                    .initialize(&persistence, &metadata())
                    .await
                    .expect("cached host returned");
            }
        }));
    }

    for _ in 0..1_000 {
        assert_eq!(initializer.host().map(|h| h.id_host), Some(host.id_host));
        tokio::task::yield_now().await;
    }
    for task in tasks {
        task.await.expect("task joins");
    }
    assert_eq!(initializer.write_count(), 1);
}

#[tokio::test]
async fn test_failed_initialization_can_be_retried() {
    let store = InMemoryMessageStore::new();
    let persistence = MessagePersistence::new(Arc::new(store.clone()));
    let initializer = HostInitializer::new();
    store.inject_row_count(MemoryTable::Host, 0);

    let err = initializer
        .initialize(&persistence, &metadata())
        .await
        .expect_err("host insert reports zero rows");
    assert!(matches!(err, StorageError::UnexpectedRowCount { actual: 0, .. }));
    assert!(initializer.host().is_none());
    assert_eq!(initializer.write_count(), 0);
    assert!(store.tables().host_types.is_empty(), "host type rolled back too");

    let host = initializer
        .initialize(&persistence, &metadata())
        .await
        .expect("retry succeeds");
    assert_eq!(initializer.host().map(|h| h.id_host), Some(host.id_host));
    assert_eq!(initializer.write_count(), 1);
}

#[tokio::test]
async fn test_buses_share_an_initializer() {
    let store = InMemoryMessageStore::new();
    let initializer = Arc::new(HostInitializer::new());

    let mut hosts = Vec::new();
    for _ in 0..2 {
        let bus = MessageBus::builder(Arc::new(App::default()))
            .store(Arc::new(store.clone()))
            .handlers(new_registry())
            .host_initializer(Arc::clone(&initializer))
            .build()
            .await
            .expect("bus builds");
        hosts.push(bus.host().id_host);
    }

    assert_eq!(hosts[0], hosts[1]);
    assert_eq!(store.tables().hosts.len(), 1);
}

#[test]
fn test_host_type_id_is_stable_per_kind() {
    let worker = HostMetadata::new(HostKind::Worker, "a");
    let other_app = HostMetadata::new(HostKind::Worker, "b");
    let bus = HostMetadata::new(HostKind::MessageBus, "a");
    let custom = HostMetadata::new(HostKind::Custom("scheduler".into()), "a");

    assert_eq!(worker.host_type_id(), other_app.host_type_id());
    assert_ne!(worker.host_type_id(), bus.host_type_id());
    assert_ne!(custom.host_type_id(), bus.host_type_id());
}
