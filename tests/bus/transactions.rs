//! Joining a caller-supplied unit of work

use crate::common::*;
use durabus::bus::{HandlerContext, HandlerFailure, SendOptions, TracingInterceptor};
use durabus::error::TransactionError;
use durabus::transaction::{HookPhase, TransactionState};
use durabus::MessageStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn test_caller_transaction_is_joined_not_committed() {
    let t = build_bus(receipts_registry()).await;
    let tx = t.bus.begin_transaction().await.expect("transaction opens");

    let committed = Arc::new(AtomicBool::new(false));
    {
        let committed = Arc::clone(&committed);
        tx.add_hook(HookPhase::AfterCommit, move || {
            committed.store(true, Ordering::SeqCst);
            Ok(())
        });
    }

    let receipt = t
        .bus
        .send_with(
            OrderCreated { order_id: 42 },
            SendOptions::new().in_transaction(tx.clone()),
        )
        .await
        .expect("send succeeds");
    assert_eq!(receipt.id, "R-42");

    assert!(tx.is_active(), "the bus leaves the caller's transaction open");
    assert!(!committed.load(Ordering::SeqCst));
    assert_eq!(t.envelope_count(), 0, "nothing is visible before the caller commits");

    tx.commit().await.expect("caller commits");
    assert!(committed.load(Ordering::SeqCst));

    let requests = t.envelopes_of::<OrderCreated>();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].status(), Some(MessageStatus::Completed));
    assert!(requests[0].id_corresponding_message.is_some());
    assert_eq!(t.envelope_count(), 2);
}

#[tokio::test]
async fn test_handler_sees_the_joined_transaction() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("tx-aware", |_| {
            |order: &OrderCreated, context: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                context.app().record(context.transaction().id().to_string());
                Ok(Receipt {
                    id: format!("owned={}-{}", context.owns_transaction(), order.order_id),
                })
            }
        })
        .expect("handler registers");
    let t = build_bus(handlers).await;
    let tx = t.bus.begin_transaction().await.expect("transaction opens");

    let receipt = t
        .bus
        .send_with(
            OrderCreated { order_id: 1 },
            SendOptions::new().in_transaction(tx.clone()),
        )
        .await
        .expect("send succeeds");

    assert_eq!(receipt.id, "owned=false-1");
    assert_eq!(t.app.calls(), vec![tx.id().to_string()]);
    tx.rollback().await.expect("caller rolls back");
    assert_eq!(t.envelope_count(), 0);
}

#[tokio::test]
async fn test_failure_marks_caller_transaction_rollback_only() {
    let handlers = new_registry();
    handlers
        .register_handler::<OrderCreated, _, _>("ledger", |_| {
            |_: &OrderCreated, _: &HandlerContext<App>| -> Result<Receipt, HandlerFailure> {
                Err(HandlerFailure::new("bad state"))
            }
        })
        .expect("handler registers");
    handlers.set_default_interceptor("tracing", |_| TracingInterceptor::default());
    let t = build_bus(handlers).await;
    let tx = t.bus.begin_transaction().await.expect("transaction opens");

    let err = t
        .bus
        .send_with(
            OrderCreated { order_id: 42 },
            SendOptions::new().in_transaction(tx.clone()),
        )
        .await
        .expect_err("handler fails");
    assert!(err.is_handler_error());

    assert!(tx.is_rollback_only());
    assert_eq!(tx.state(), TransactionState::Active, "not rolled back by the bus");

    let commit = tx.commit().await;
    assert!(matches!(commit, Err(TransactionError::RollbackOnly(id)) if id == tx.id()));
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert_eq!(t.envelope_count(), 0);
}

#[tokio::test]
async fn test_inactive_caller_transaction_is_rejected() {
    let t = build_bus(receipts_registry()).await;
    let tx = t.bus.begin_transaction().await.expect("transaction opens");
    tx.commit().await.expect("empty commit");

    let err = t
        .bus
        .send_with(
            OrderCreated { order_id: 1 },
            SendOptions::new().in_transaction(tx),
        )
        .await
        .expect_err("transaction already committed");

    assert!(err.is_infrastructure());
    assert_eq!(err.envelope_id(), None);
    assert!(t.app.calls().is_empty());
    assert_eq!(t.envelope_count(), 0);
}

#[tokio::test]
async fn test_owned_transaction_commits_once_per_dispatch() {
    let t = build_bus(receipts_registry()).await;
    let before = t.store.write_counts();

    t.bus.send(OrderCreated { order_id: 1 }).await.expect("send succeeds");

    let after = t.store.write_counts();
    // Request committed on its own, then the business transaction
    assert_eq!(after.commits - before.commits, 2);
    assert_eq!(after.rollbacks, before.rollbacks);
}
