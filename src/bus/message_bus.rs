//! # Message Bus
//!
//! The dispatcher. `send` runs the single handler of a request and returns its
//! reply; `publish` fans an event out to every registered handler.
//!
//! ## Dispatch flow
//!
//! 1. Resolve (or build once, then reuse) the handler processor for `M`.
//! 2. Persist the request envelope and move it to InProcess. Without a
//!    caller transaction this is committed on its own before any handler
//!    runs, so a crash mid-handler leaves an InProcess row behind.
//! 3. Run the handler(s) inside the unit of work, through the interceptor
//!    when one is configured.
//! 4. On success persist the response (or mark the envelope Completed) and
//!    commit the owned transaction.
//! 5. On failure roll back the owned transaction and record the envelope as
//!    Aborted in a fresh one. A caller transaction is marked rollback-only
//!    and never committed, rolled back or disposed here.
//!
//! Handler problems never escape as panics or Rust errors of other types:
//! every call returns [`DispatchResult`].

use super::context::{HandlerContext, MessageTypeInfo};
use super::message::{is_fire_and_forget, Message, SendOptions, TraceInfo};
use super::outcome::{DispatchError, DispatchResult, HandlerFailure, PublishReceipt};
use super::processor::{HandlerProcessor, ProcessorCache, ProcessorStats};
use crate::config::{BusConfig, DispatchConfig};
use crate::constants::{details, HostKind};
use crate::database::{MessageStore, PgMessageStore};
use crate::error::{BusError, BusResult, StorageError};
use crate::logging::log_dispatch_operation;
use crate::models::Host;
use crate::persistence::{
    EnvelopeNote, HostInitializer, HostMetadata, MessageLogger, MessagePersistence,
    MessageTypeKey, NewEnvelope, SavedEnvelope,
};
use crate::registry::{HandlerRegistry, TypeDescriptor, TypeRegistry};
use crate::serialization::MessageSerializer;
use crate::topology::Scenario;
use crate::transaction::TransactionContext;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct BusInner<C> {
    app: Arc<C>,
    persistence: Arc<MessagePersistence>,
    host: Arc<Host>,
    handlers: Arc<HandlerRegistry<C>>,
    processors: ProcessorCache,
    dispatch: DispatchConfig,
    scenarios: Vec<Scenario>,
}

/// Durable request/response and publish/subscribe dispatcher.
///
/// Cheap to clone; clones share the processor cache and host.
pub struct MessageBus<C> {
    inner: Arc<BusInner<C>>,
}

impl<C> Clone for MessageBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for MessageBus<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("host_id", &self.inner.host.id_host)
            .field("persistence", &self.inner.persistence)
            .field("scenarios", &self.inner.scenarios.len())
            .finish()
    }
}

/// One in-flight dispatch after its envelope has been persisted
struct Dispatch<M> {
    envelope: SavedEnvelope,
    message: M,
    transaction: TransactionContext,
    owned: bool,
    trace: TraceInfo,
    session_id: Option<Uuid>,
    timeout: Option<Duration>,
    message_type: MessageTypeInfo,
}

impl<C: Send + Sync + 'static> MessageBus<C> {
    pub fn builder(app: Arc<C>) -> MessageBusBuilder<C> {
        MessageBusBuilder::new(app)
    }

    pub fn app(&self) -> &Arc<C> {
        &self.inner.app
    }

    /// The host row this process registered at startup
    pub fn host(&self) -> &Arc<Host> {
        &self.inner.host
    }

    pub fn persistence(&self) -> &Arc<MessagePersistence> {
        &self.inner.persistence
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry<C>> {
        &self.inner.handlers
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.inner.scenarios
    }

    pub fn dispatch_config(&self) -> &DispatchConfig {
        &self.inner.dispatch
    }

    pub fn processor_stats(&self) -> ProcessorStats {
        self.inner.processors.stats()
    }

    /// Open a unit of work callers can pass via [`SendOptions::in_transaction`]
    pub async fn begin_transaction(&self) -> BusResult<TransactionContext> {
        Ok(self.inner.persistence.begin().await?)
    }

    pub async fn send<M: Message>(&self, message: M) -> DispatchResult<M::Reply> {
        self.send_with(message, SendOptions::default()).await
    }

    pub async fn send_with<M: Message>(
        &self,
        message: M,
        options: SendOptions,
    ) -> DispatchResult<M::Reply> {
        self.send_with_cancellation(message, options, CancellationToken::new())
            .await
    }

    /// Request/response dispatch to the first registered handler of `M`.
    pub async fn send_with_cancellation<M: Message>(
        &self,
        message: M,
        options: SendOptions,
        cancellation: CancellationToken,
    ) -> DispatchResult<M::Reply> {
        let started = Instant::now();
        let processor = self.processor::<M>()?;
        let type_name = processor.message_type().name.clone();

        match processor.handler_names().as_slice() {
            [] => {
                return Err(self.reject(
                    &type_name,
                    HandlerFailure::dispatcher(format!("no handler registered for {type_name}")),
                ));
            }
            [_] => {}
            [first, ignored @ ..] => {
                warn!(
                    message_type = %type_name,
                    handler = %first,
                    ignored = ?ignored,
                    "Several handlers registered for a request; only the first is invoked"
                );
            }
        }

        let dispatch = self.prepare(&processor, message, options).await?;
        let context = self.context(&dispatch, &cancellation);

        let outcome = match Self::invoke(&processor, 0, &dispatch.message, &context, &cancellation).await {
            Ok(reply) => self.complete_send(&dispatch, &reply).await.map(|()| reply),
            Err(failure) => Err(failure),
        };

        let result = match outcome {
            Ok(reply) => Ok(reply),
            Err(failure) => Err(self.fail(&dispatch, vec![failure]).await),
        };
        self.cleanup(&dispatch, "send", &result, started).await;
        result
    }

    pub async fn publish<M: Message>(&self, event: M) -> DispatchResult<PublishReceipt> {
        self.publish_with(event, SendOptions::default()).await
    }

    pub async fn publish_with<M: Message>(
        &self,
        event: M,
        options: SendOptions,
    ) -> DispatchResult<PublishReceipt> {
        self.publish_with_cancellation(event, options, CancellationToken::new())
            .await
    }

    /// Fan-out dispatch. Every handler runs even when an earlier one fails;
    /// any failure rolls back the whole unit of work.
    pub async fn publish_with_cancellation<M: Message>(
        &self,
        event: M,
        options: SendOptions,
        cancellation: CancellationToken,
    ) -> DispatchResult<PublishReceipt> {
        let started = Instant::now();
        let processor = self.processor::<M>()?;
        let dispatch = self.prepare(&processor, event, options).await?;
        let context = self.context(&dispatch, &cancellation).in_fan_out();

        let handler_count = processor.handler_count();
        if handler_count == 0 {
            warn!(
                envelope_id = %dispatch.envelope.id,
                message_type = %dispatch.message_type.name,
                "No handlers registered for event"
            );
        }

        let mut failures = Vec::new();
        let mut succeeded = Vec::new();
        for index in 0..handler_count {
            match Self::invoke(&processor, index, &dispatch.message, &context, &cancellation).await {
                Ok(_) => {
                    if let Some(name) = processor.handler_names().get(index) {
                        succeeded.push((*name).to_string());
                    }
                }
                Err(failure) => {
                    failures.push(failure);
                    if cancellation.is_cancelled() {
                        break;
                    }
                }
            }
        }

        let outcome = if failures.is_empty() {
            self.complete_publish(&dispatch, handler_count)
                .await
                .map_err(|failure| vec![failure])
        } else {
            Err(failures)
        };

        let result = match outcome {
            Ok(()) => Ok(PublishReceipt {
                envelope_id: dispatch.envelope.id,
                handlers_invoked: handler_count,
            }),
            Err(failures) => Err(self.fail(&dispatch, failures).await.with_succeeded(succeeded)),
        };
        self.cleanup(&dispatch, "publish", &result, started).await;
        result
    }

    /// Log host shutdown and release the store
    pub async fn shutdown(&self) {
        info!(
            host_id = %self.inner.host.id_host,
            processors = self.inner.processors.stats().cached,
            "Message bus shutting down"
        );
        self.inner.persistence.store().close().await;
    }

    fn processor<M: Message>(&self) -> DispatchResult<Arc<HandlerProcessor<M, C>>> {
        let inner = &self.inner;
        let registered = inner.handlers.registered_type::<M>().map_err(|e| {
            self.reject(M::message_name(), HandlerFailure::dispatcher(e.to_string()))
        })?;
        let name = registered.name.clone();
        let generation = inner.handlers.generation_for::<M>();

        inner
            .processors
            .get_or_build(generation, || {
                debug!(message_type = %registered.name, "Building handler processor");
                HandlerProcessor::build(
                    &inner.app,
                    registered,
                    inner.handlers.handlers_for::<M>(),
                    inner.handlers.interceptor_for::<M>(),
                    inner.dispatch.handler_lifetime,
                    inner.dispatch.interceptor_lifetime,
                )
            })
            .ok_or_else(|| {
                self.reject(
                    &name,
                    HandlerFailure::dispatcher(format!(
                        "cached processor for {name} has an unexpected type"
                    )),
                )
            })
    }

    /// Persist the envelope and open the business transaction
    async fn prepare<M: Message>(
        &self,
        processor: &HandlerProcessor<M, C>,
        message: M,
        options: SendOptions,
    ) -> DispatchResult<Dispatch<M>> {
        let inner = &self.inner;
        let registered = processor.message_type();
        let trace = options.trace.unwrap_or_default();
        let roundtrip = options
            .message
            .roundtrip
            .unwrap_or(inner.dispatch.roundtrip_payloads);
        let new_envelope = NewEnvelope {
            host_id: inner.host.id_host,
            message_type: MessageTypeKey {
                id: registered.id,
                name: registered.name.clone(),
            },
            session_id: options.message.session_id,
            trace_id: Some(trace.trace_id),
            roundtrip,
        };

        let caller_transaction = options.transaction;
        let saved = inner
            .persistence
            .create_request_envelope(caller_transaction.as_ref(), &message, &new_envelope)
            .await
            .map_err(|e| self.reject(&registered.name, HandlerFailure::storage(&e)))?;

        let owned = caller_transaction.is_none();
        let transaction = match caller_transaction {
            Some(tx) => tx,
            None => match inner.persistence.begin().await {
                Ok(tx) => tx,
                Err(e) => {
                    let failure = HandlerFailure::storage(&e);
                    self.record_abort(None, &saved.envelope, &trace, std::slice::from_ref(&failure))
                        .await;
                    return Err(DispatchError::from_failures(
                        Some(saved.envelope.id),
                        registered.name.clone(),
                        vec![self.with_default_client_message(failure)],
                    ));
                }
            },
        };

        Ok(Dispatch {
            envelope: saved.envelope,
            message: saved.message.unwrap_or(message),
            transaction,
            owned,
            trace,
            session_id: options.message.session_id,
            timeout: options
                .message
                .timeout
                .or_else(|| inner.dispatch.default_timeout()),
            message_type: MessageTypeInfo {
                id: registered.id,
                name: registered.name.clone(),
                rust_name: registered.descriptor.rust_name(),
            },
        })
    }

    fn context<M>(&self, dispatch: &Dispatch<M>, cancellation: &CancellationToken) -> HandlerContext<C> {
        let host_id = self.inner.host.id_host;
        HandlerContext::new(
            Arc::clone(&self.inner.app),
            dispatch.transaction.clone(),
            dispatch.owned,
            dispatch.trace.clone(),
            host_id,
            dispatch.envelope.id,
            dispatch.session_id,
            dispatch.timeout,
            dispatch.message_type.clone(),
            cancellation.clone(),
            MessageLogger::for_host(host_id),
        )
    }

    async fn invoke<M: Message>(
        processor: &HandlerProcessor<M, C>,
        index: usize,
        message: &M,
        context: &HandlerContext<C>,
        cancellation: &CancellationToken,
    ) -> Result<M::Reply, HandlerFailure> {
        let result = tokio::select! {
            biased;
            _ = cancellation.cancelled() => Err(HandlerFailure::cancelled()),
            result = processor.invoke(index, message, context) => result,
        };
        result.map_err(|failure| {
            if failure.handler.is_some() {
                return failure;
            }
            match processor.handler_names().get(index) {
                Some(name) => failure.with_handler(*name),
                None => failure,
            }
        })
    }

    async fn complete_send<M: Message>(
        &self,
        dispatch: &Dispatch<M>,
        reply: &M::Reply,
    ) -> Result<(), HandlerFailure> {
        let inner = &self.inner;
        let host_id = inner.host.id_host;
        let tx = Some(&dispatch.transaction);

        if is_fire_and_forget::<M>() {
            inner
                .persistence
                .complete_envelope(
                    tx,
                    &dispatch.envelope,
                    host_id,
                    Some(dispatch.trace.trace_id),
                    &format!("{} completed", dispatch.message_type.name),
                )
                .await
                .map_err(|e| HandlerFailure::storage(&e))?;
        } else {
            let reply_type = inner
                .handlers
                .types()
                .get_or_register(&TypeDescriptor::of::<M::Reply>())
                .map_err(|e| HandlerFailure::dispatcher(e.to_string()))?;
            let response = NewEnvelope {
                host_id,
                message_type: MessageTypeKey {
                    id: reply_type.id,
                    name: reply_type.name,
                },
                session_id: dispatch.session_id,
                trace_id: Some(dispatch.trace.trace_id),
                roundtrip: false,
            };
            inner
                .persistence
                .create_response_envelope(tx, &dispatch.envelope, reply, &response)
                .await
                .map_err(|e| HandlerFailure::storage(&e))?;
        }

        self.commit_owned(dispatch).await
    }

    async fn complete_publish<M: Message>(
        &self,
        dispatch: &Dispatch<M>,
        handler_count: usize,
    ) -> Result<(), HandlerFailure> {
        self.inner
            .persistence
            .complete_envelope(
                Some(&dispatch.transaction),
                &dispatch.envelope,
                self.inner.host.id_host,
                Some(dispatch.trace.trace_id),
                &format!(
                    "{} published to {handler_count} handler(s)",
                    dispatch.message_type.name
                ),
            )
            .await
            .map_err(|e| HandlerFailure::storage(&e))?;
        self.commit_owned(dispatch).await
    }

    async fn commit_owned<M>(&self, dispatch: &Dispatch<M>) -> Result<(), HandlerFailure> {
        if !dispatch.owned {
            return Ok(());
        }
        dispatch
            .transaction
            .commit()
            .await
            .map_err(|e| HandlerFailure::storage(&StorageError::from(e)))
    }

    /// Undo the unit of work and record the envelope as Aborted
    async fn fail<M>(&self, dispatch: &Dispatch<M>, failures: Vec<HandlerFailure>) -> DispatchError {
        let failures: Vec<_> = failures
            .into_iter()
            .map(|f| self.with_default_client_message(f))
            .collect();

        for failure in &failures {
            error!(
                envelope_id = %dispatch.envelope.id,
                message_type = %dispatch.message_type.name,
                handler = failure.handler.as_deref().unwrap_or("-"),
                kind = %failure.kind,
                error = %failure.error,
                "{}",
                failure.detail.as_deref().unwrap_or(details::UNHANDLED_HANDLER_EXCEPTION)
            );
        }

        if dispatch.owned {
            if let Err(e) = dispatch.transaction.rollback().await {
                error!(
                    envelope_id = %dispatch.envelope.id,
                    error = %e,
                    "Rollback of failed dispatch failed"
                );
            }
            self.record_abort(None, &dispatch.envelope, &dispatch.trace, &failures)
                .await;
        } else {
            dispatch.transaction.mark_rollback_only();
            self.record_abort(
                Some(&dispatch.transaction),
                &dispatch.envelope,
                &dispatch.trace,
                &failures,
            )
            .await;
        }

        DispatchError::from_failures(
            Some(dispatch.envelope.id),
            dispatch.message_type.name.clone(),
            failures,
        )
    }

    /// Abort writes are best effort: a failure here is logged and never
    /// replaces the dispatch error
    async fn record_abort(
        &self,
        tx: Option<&TransactionContext>,
        envelope: &SavedEnvelope,
        trace: &TraceInfo,
        failures: &[HandlerFailure],
    ) {
        let notes: Vec<EnvelopeNote> = failures
            .iter()
            .map(|failure| EnvelopeNote {
                message: failure.describe(),
                detail: Some(match &failure.handler {
                    Some(handler) => format!("{handler}: {}", failure.error),
                    None => failure.error.clone(),
                }),
            })
            .collect();

        if let Err(e) = self
            .inner
            .persistence
            .abort_envelope(tx, envelope, self.inner.host.id_host, Some(trace.trace_id), &notes)
            .await
        {
            error!(
                envelope_id = %envelope.id,
                error = %e,
                "Failed to record envelope as Aborted"
            );
        }
    }

    async fn cleanup<M, T>(
        &self,
        dispatch: &Dispatch<M>,
        operation: &str,
        result: &DispatchResult<T>,
        started: Instant,
    ) {
        if dispatch.owned {
            dispatch.transaction.dispose().await;
        }
        let status = match result {
            Ok(_) => "completed",
            Err(e) if e.is_handler_error() => "handler_error",
            Err(_) => "infrastructure_error",
        };
        let elapsed = started.elapsed().as_millis();
        debug!(
            envelope_id = %dispatch.envelope.id,
            message_type = %dispatch.message_type.rust_name,
            elapsed_ms = elapsed as u64,
            "exiting {operation}"
        );
        log_dispatch_operation(
            operation,
            &dispatch.message_type.name,
            Some(dispatch.envelope.id),
            status,
            Some(elapsed),
            None,
        );
    }

    /// Infrastructure error raised before any envelope exists
    fn reject(&self, message_type: &str, failure: HandlerFailure) -> DispatchError {
        let failure = self.with_default_client_message(failure);
        error!(
            message_type,
            kind = %failure.kind,
            error = %failure.error,
            "{}",
            details::UNHANDLED_DISPATCHER_EXCEPTION
        );
        log_dispatch_operation(
            "dispatch_rejected",
            message_type,
            None,
            "infrastructure_error",
            None,
            Some(&failure.error),
        );
        DispatchError::from_failures(None, message_type, vec![failure])
    }

    fn with_default_client_message(&self, mut failure: HandlerFailure) -> HandlerFailure {
        if failure.client_message.is_none() {
            failure.client_message = Some(self.inner.dispatch.default_client_message.clone());
        }
        failure
    }
}

/// Assembles a [`MessageBus`]: store, registries, host and topology.
pub struct MessageBusBuilder<C> {
    app: Arc<C>,
    config: BusConfig,
    store: Option<Arc<dyn MessageStore>>,
    serializer: Option<Arc<dyn MessageSerializer>>,
    handlers: Option<Arc<HandlerRegistry<C>>>,
    host_initializer: Option<Arc<HostInitializer>>,
    host_kind: HostKind,
    machine_name: Option<String>,
    scenarios: Vec<Scenario>,
}

impl<C: Send + Sync + 'static> MessageBusBuilder<C> {
    pub fn new(app: Arc<C>) -> Self {
        Self {
            app,
            config: BusConfig::default(),
            store: None,
            serializer: None,
            handlers: None,
            host_initializer: None,
            host_kind: HostKind::MessageBus,
            machine_name: None,
            scenarios: Vec::new(),
        }
    }

    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Use this store instead of connecting to `database.connection_string`
    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn serializer(mut self, serializer: Arc<dyn MessageSerializer>) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn handlers(mut self, handlers: Arc<HandlerRegistry<C>>) -> Self {
        self.handlers = Some(handlers);
        self
    }

    /// Share one initializer between buses of the same process
    pub fn host_initializer(mut self, initializer: Arc<HostInitializer>) -> Self {
        self.host_initializer = Some(initializer);
        self
    }

    pub fn host_kind(mut self, kind: HostKind) -> Self {
        self.host_kind = kind;
        self
    }

    pub fn machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = Some(machine_name.into());
        self
    }

    pub fn scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    pub async fn build(self) -> BusResult<MessageBus<C>> {
        self.config.validate()?;

        let store: Arc<dyn MessageStore> = match self.store {
            Some(store) => store,
            None => {
                if self.config.database.connection_url().is_none() {
                    return Err(BusError::InvalidSetup(
                        "no message store supplied and database.connection_string is not set"
                            .to_string(),
                    ));
                }
                let store =
                    PgMessageStore::connect(&self.config.database, self.config.schema.clone())
                        .await?;
                store.migrate().await?;
                Arc::new(store)
            }
        };

        let persistence = Arc::new(match self.serializer {
            Some(serializer) => MessagePersistence::with_serializer(store, serializer),
            None => MessagePersistence::new(store),
        });
        let handlers = self
            .handlers
            .unwrap_or_else(|| Arc::new(HandlerRegistry::new(Arc::new(TypeRegistry::new()))));

        let mut metadata =
            HostMetadata::new(self.host_kind, self.config.host.application_name.clone());
        if let Some(machine_name) = self.machine_name {
            metadata = metadata.with_machine_name(machine_name);
        }
        let host = self
            .host_initializer
            .unwrap_or_default()
            .initialize(&persistence, &metadata)
            .await?;

        for scenario in &self.scenarios {
            if !scenario.is_enabled() {
                continue;
            }
            for unhandled in scenario.unhandled_message_types(&handlers) {
                warn!(
                    scenario = scenario.name(),
                    message_type = %unhandled.name,
                    "Queue message type has no registered handler"
                );
            }
        }

        let stats = handlers.stats();
        info!(
            host_id = %host.id_host,
            backend = persistence.store().backend_name(),
            message_types = stats.message_types,
            handlers = stats.handlers,
            scenarios = self.scenarios.len(),
            "Message bus ready"
        );

        Ok(MessageBus {
            inner: Arc::new(BusInner {
                app: self.app,
                persistence,
                host,
                handlers,
                processors: ProcessorCache::new(),
                dispatch: self.config.dispatch,
                scenarios: self.scenarios,
            }),
        })
    }
}
