//! Messages, application context and bus builders shared by the
//! integration tests.

use async_trait::async_trait;
use durabus::bus::{AsyncHandler, HandlerContext, HandlerFailure, Message, MessageBus};
use durabus::config::BusConfig;
use durabus::database::InMemoryMessageStore;
use durabus::models::{HandlerMessage, HandlerMessageLog};
use durabus::registry::{HandlerRegistry, TypeRegistry};
use durabus::{LogLevel, MessageStatus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
}

impl Message for OrderCreated {
    type Reply = Receipt;

    fn message_name() -> &'static str {
        "orders.OrderCreated"
    }
}

/// Event and fire-and-forget command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub order_id: u64,
}

impl Message for OrderShipped {
    type Reply = ();

    fn message_name() -> &'static str {
        "orders.OrderShipped"
    }
}

/// Request whose `scratch` field never reaches the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspect {
    pub label: String,
    #[serde(skip)]
    pub scratch: u32,
}

impl Message for Inspect {
    type Reply = Observed;
}

/// What a handler saw of its dispatch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observed {
    pub label: String,
    pub scratch: u32,
    pub envelope_id: Uuid,
    pub host_id: Uuid,
    pub trace_id: Uuid,
    pub session_id: Option<Uuid>,
    pub timeout: Option<Duration>,
    pub owns_transaction: bool,
}

/// Request whose handler sleeps for `millis`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowJob {
    pub millis: u64,
}

impl Message for SlowJob {
    type Reply = String;
}

/// Application context handed to every handler
#[derive(Debug, Default)]
pub struct App {
    calls: Mutex<Vec<String>>,
    factory_calls: AtomicUsize,
}

impl App {
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn factory_called(&self) {
        self.factory_calls.fetch_add(1, Ordering::SeqCst);
    }

    pub fn factory_calls(&self) -> usize {
        self.factory_calls.load(Ordering::SeqCst)
    }
}

/// Reports the dispatch it ran in and annotates the audit log
pub struct Inspector;

#[async_trait]
impl AsyncHandler<Inspect, App> for Inspector {
    async fn handle(
        &self,
        message: &Inspect,
        context: &HandlerContext<App>,
    ) -> Result<Observed, HandlerFailure> {
        context
            .log(LogLevel::Information, "inspected", Some(message.label.clone()))
            .await
            .map_err(|e| HandlerFailure::new(e.to_string()))?;
        context.app().record("inspector");

        Ok(Observed {
            label: message.label.clone(),
            scratch: message.scratch,
            envelope_id: context.envelope_id(),
            host_id: context.host_id(),
            trace_id: context.trace().trace_id,
            session_id: context.session_id(),
            timeout: context.timeout(),
            owns_transaction: context.owns_transaction(),
        })
    }
}

pub struct Sleeper;

#[async_trait]
impl AsyncHandler<SlowJob, App> for Sleeper {
    async fn handle(
        &self,
        message: &SlowJob,
        context: &HandlerContext<App>,
    ) -> Result<String, HandlerFailure> {
        context.app().record("sleeper started");
        tokio::time::sleep(Duration::from_millis(message.millis)).await;
        context.app().record("sleeper finished");
        Ok("done".to_string())
    }
}

pub fn new_registry() -> Arc<HandlerRegistry<App>> {
    durabus::logging::init_structured_logging();
    Arc::new(HandlerRegistry::new(Arc::new(TypeRegistry::new())))
}

/// Registry with a `receipts` handler answering `OrderCreated`
pub fn receipts_registry() -> Arc<HandlerRegistry<App>> {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("receipts", |_| {
            |order: &OrderCreated, context: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                context.app().record(format!("receipts:{}", order.order_id));
                Ok(Receipt {
                    id: format!("R-{}", order.order_id),
                })
            }
        })
        .expect("handler registers");
    handlers
}

pub struct TestBus {
    pub bus: MessageBus<App>,
    pub store: InMemoryMessageStore,
    pub app: Arc<App>,
}

impl TestBus {
    /// Committed envelopes of message type `M`
    pub fn envelopes_of<M: Message>(&self) -> Vec<HandlerMessage> {
        let type_id = self
            .bus
            .handlers()
            .registered_type::<M>()
            .expect("type registers")
            .id;
        let mut rows: Vec<HandlerMessage> = self
            .store
            .tables()
            .handler_messages
            .into_values()
            .filter(|row| row.id_message_type == type_id)
            .collect();
        rows.sort_by_key(|row| row.time_created_utc);
        rows
    }

    pub fn envelope(&self, id: Uuid) -> HandlerMessage {
        self.store
            .tables()
            .handler_messages
            .remove(&id)
            .expect("envelope committed")
    }

    /// Committed audit rows of one envelope, oldest first
    pub fn log_of(&self, id: Uuid) -> Vec<HandlerMessageLog> {
        self.store
            .tables()
            .handler_message_logs
            .into_iter()
            .filter(|row| row.id_handler_message == id)
            .collect()
    }

    pub fn statuses_of(&self, id: Uuid) -> Vec<MessageStatus> {
        self.log_of(id).iter().filter_map(HandlerMessageLog::status).collect()
    }

    pub fn envelope_count(&self) -> usize {
        self.store.tables().handler_messages.len()
    }
}

pub async fn build_bus(handlers: Arc<HandlerRegistry<App>>) -> TestBus {
    build_bus_with_config(handlers, BusConfig::default()).await
}

pub async fn build_bus_with_config(
    handlers: Arc<HandlerRegistry<App>>,
    config: BusConfig,
) -> TestBus {
    build_bus_on(InMemoryMessageStore::new(), handlers, config).await
}

/// Bus over a store the caller keeps a handle to
pub async fn build_bus_on(
    store: InMemoryMessageStore,
    handlers: Arc<HandlerRegistry<App>>,
    config: BusConfig,
) -> TestBus {
    let app = Arc::new(App::default());
    let bus = MessageBus::builder(Arc::clone(&app))
        .config(config)
        .store(Arc::new(store.clone()))
        .handlers(handlers)
        .machine_name("test-node")
        .build()
        .await
        .expect("bus builds");
    TestBus { bus, store, app }
}
