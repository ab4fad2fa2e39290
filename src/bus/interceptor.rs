//! # Interceptor Pipeline
//!
//! An interceptor wraps one handler invocation. It sees the invocation as a
//! type-erased future so a single interceptor serves every message type.
//!
//! [`TracingInterceptor`] is the stock implementation: it times the call,
//! turns handler errors and panics into "Unhandled handler exception"
//! failures and undoes the unit of work.

use super::context::HandlerContext;
use super::outcome::{FailureKind, HandlerFailure};
use crate::constants::details;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, error, trace};

/// Type-erased handler reply
pub type ErasedReply = Box<dyn Any + Send>;

/// One pending handler call
pub struct Invocation<'a, C> {
    pub context: &'a HandlerContext<C>,
    pub handler_name: &'a str,
    pub future: BoxFuture<'a, Result<ErasedReply, HandlerFailure>>,
}

#[async_trait]
pub trait Interceptor<C>: Send + Sync {
    async fn intercept(&self, invocation: Invocation<'_, C>) -> Result<ErasedReply, HandlerFailure>;
}

/// Logs entry and exit, and converts failures into rollback.
#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    default_client_message: String,
}

impl Default for TracingInterceptor {
    fn default() -> Self {
        Self::new(details::DEFAULT_CLIENT_MESSAGE)
    }
}

impl TracingInterceptor {
    pub fn new(default_client_message: impl Into<String>) -> Self {
        Self {
            default_client_message: default_client_message.into(),
        }
    }

    async fn undo<C>(&self, context: &HandlerContext<C>) {
        if context.owns_transaction() && !context.is_fan_out() {
            if let Err(e) = context.transaction().rollback().await {
                error!(
                    envelope_id = %context.envelope_id(),
                    error = %e,
                    "Rollback after handler failure failed"
                );
            }
        } else {
            context.transaction().mark_rollback_only();
        }
    }
}

#[async_trait]
impl<C: Send + Sync + 'static> Interceptor<C> for TracingInterceptor {
    async fn intercept(&self, invocation: Invocation<'_, C>) -> Result<ErasedReply, HandlerFailure> {
        let Invocation {
            context,
            handler_name,
            future,
        } = invocation;
        let message_type = context.message_type().rust_name;

        if !context.transaction().is_active() {
            let failure = HandlerFailure {
                kind: FailureKind::Interceptor,
                handler: Some(handler_name.to_string()),
                error: format!(
                    "transaction {} is {}",
                    context.transaction().id(),
                    context.transaction().state()
                ),
                detail: Some(details::UNHANDLED_INTERCEPTOR_EXCEPTION.to_string()),
                client_message: Some(self.default_client_message.clone()),
            };
            error!(
                envelope_id = %context.envelope_id(),
                message_type,
                handler = handler_name,
                error = %failure.error,
                "{}",
                details::UNHANDLED_INTERCEPTOR_EXCEPTION
            );
            return Err(failure);
        }

        trace!(
            envelope_id = %context.envelope_id(),
            message_type,
            handler = handler_name,
            "entering"
        );
        let started = Instant::now();

        let outcome = match AssertUnwindSafe(future).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(HandlerFailure::from_panic(panic)),
        };

        match outcome {
            Ok(reply) => {
                debug!(
                    envelope_id = %context.envelope_id(),
                    message_type,
                    handler = handler_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "exiting"
                );
                Ok(reply)
            }
            Err(mut failure) => {
                if failure.detail.is_none() {
                    failure.detail = Some(details::UNHANDLED_HANDLER_EXCEPTION.to_string());
                }
                if failure.client_message.is_none() {
                    failure.client_message = Some(self.default_client_message.clone());
                }
                if failure.handler.is_none() {
                    failure.handler = Some(handler_name.to_string());
                }
                error!(
                    envelope_id = %context.envelope_id(),
                    message_type,
                    handler = handler_name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %failure.error,
                    "{}",
                    details::UNHANDLED_HANDLER_EXCEPTION
                );
                self.undo(context).await;
                Err(failure)
            }
        }
    }
}
