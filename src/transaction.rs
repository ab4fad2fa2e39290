//! # Transaction Context
//!
//! A scoped unit of work shared by the dispatcher, the persistence layer and
//! handlers. The context wraps one open [`StoreTransaction`] and carries
//! ordered lifecycle hooks.
//!
//! ## Lifecycle
//!
//! `Active → {Committed, RolledBack} → Disposed`. Commit and rollback are
//! only meaningful while active; `rollback` and `dispose` are idempotent
//! afterwards.
//!
//! ## Hooks
//!
//! Hooks run in registration order. A failing before-commit hook turns the
//! commit into a rollback; failures of every other hook are logged and
//! swallowed.
//!
//! ```rust,no_run
//! use durabus::database::InMemoryMessageStore;
//! use durabus::transaction::{HookPhase, TransactionContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryMessageStore::new());
//! let tx = TransactionContext::begin(store.as_ref()).await?;
//! tx.add_hook(HookPhase::AfterCommit, || {
//!     tracing::info!("order durable");
//!     Ok(())
//! });
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::database::{MessageStore, StoreTransaction};
use crate::error::TransactionError;
use parking_lot::Mutex as SyncMutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// State of a [`TransactionContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
    Disposed,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Disposed => write!(f, "disposed"),
        }
    }
}

/// Point in the lifecycle at which a hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPhase {
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
    BeforeDispose,
}

pub type TransactionHook = Box<dyn FnOnce() -> Result<(), String> + Send>;

#[derive(Default)]
struct HookSet {
    before_commit: Vec<TransactionHook>,
    after_commit: Vec<TransactionHook>,
    before_rollback: Vec<TransactionHook>,
    after_rollback: Vec<TransactionHook>,
    before_dispose: Vec<TransactionHook>,
}

impl HookSet {
    fn slot(&mut self, phase: HookPhase) -> &mut Vec<TransactionHook> {
        match phase {
            HookPhase::BeforeCommit => &mut self.before_commit,
            HookPhase::AfterCommit => &mut self.after_commit,
            HookPhase::BeforeRollback => &mut self.before_rollback,
            HookPhase::AfterRollback => &mut self.after_rollback,
            HookPhase::BeforeDispose => &mut self.before_dispose,
        }
    }
}

type StoreSlot = Option<Box<dyn StoreTransaction>>;

/// Exclusive, owned access to the live store transaction of a context.
///
/// Holds no borrow of the context, so futures that keep it across an
/// `.await` stay `Send`.
pub struct StoreGuard {
    slot: OwnedMutexGuard<StoreSlot>,
}

impl Deref for StoreGuard {
    type Target = dyn StoreTransaction;

    fn deref(&self) -> &Self::Target {
        match self.slot.as_deref() {
            Some(store_tx) => store_tx,
            None => unreachable!("StoreGuard is only built over an open transaction"),
        }
    }
}

impl DerefMut for StoreGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.slot.as_deref_mut() {
            Some(store_tx) => store_tx,
            None => unreachable!("StoreGuard is only built over an open transaction"),
        }
    }
}

/// Shared handle to one unit of work. Clones refer to the same transaction.
#[derive(Clone)]
pub struct TransactionContext {
    id: Uuid,
    store_tx: Arc<Mutex<StoreSlot>>,
    state: Arc<SyncMutex<TransactionState>>,
    rollback_only: Arc<AtomicBool>,
    hooks: Arc<SyncMutex<HookSet>>,
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}

impl TransactionContext {
    /// Open a new transaction on `store`
    pub async fn begin(store: &dyn MessageStore) -> Result<Self, TransactionError> {
        let id = Uuid::new_v4();
        let store_tx = store
            .begin()
            .await
            .map_err(|e| TransactionError::BeginFailed(e.to_string()))?;
        debug!(transaction_id = %id, backend = store.backend_name(), "Transaction opened");
        Ok(Self::from_store_transaction(id, store_tx))
    }

    pub fn from_store_transaction(id: Uuid, store_tx: Box<dyn StoreTransaction>) -> Self {
        Self {
            id,
            store_tx: Arc::new(Mutex::new(Some(store_tx))),
            state: Arc::new(SyncMutex::new(TransactionState::Active)),
            rollback_only: Arc::new(AtomicBool::new(false)),
            hooks: Arc::new(SyncMutex::new(HookSet::default())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Force any later commit to roll back instead
    pub fn mark_rollback_only(&self) {
        if !self.rollback_only.swap(true, Ordering::SeqCst) {
            debug!(transaction_id = %self.id, "Transaction marked rollback-only");
        }
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.load(Ordering::SeqCst)
    }

    pub fn add_hook<F>(&self, phase: HookPhase, hook: F)
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        self.hooks.lock().slot(phase).push(Box::new(hook));
    }

    /// Exclusive access to the live store transaction.
    ///
    /// The guard must be dropped before calling `commit`, `rollback` or
    /// `dispose` on the same context.
    pub async fn store(&self) -> Result<StoreGuard, TransactionError> {
        let slot = Arc::clone(&self.store_tx).lock_owned().await;
        if slot.is_none() {
            return Err(TransactionError::NotActive(self.id));
        }
        Ok(StoreGuard { slot })
    }

    pub async fn commit(&self) -> Result<(), TransactionError> {
        let mut slot = self.store_tx.lock().await;
        if self.state() != TransactionState::Active || slot.is_none() {
            return Err(TransactionError::NotActive(self.id));
        }

        if self.is_rollback_only() {
            self.rollback_locked(&mut slot).await?;
            return Err(TransactionError::RollbackOnly(self.id));
        }

        let hooks = std::mem::take(&mut self.hooks.lock().before_commit);
        for hook in hooks {
            if let Err(reason) = hook() {
                warn!(transaction_id = %self.id, reason = %reason, "Before-commit hook failed, rolling back");
                if let Err(rollback_err) = self.rollback_locked(&mut slot).await {
                    error!(transaction_id = %self.id, error = %rollback_err, "Rollback after hook failure failed");
                }
                return Err(TransactionError::HookFailed {
                    transaction_id: self.id,
                    reason,
                });
            }
        }

        let Some(store_tx) = slot.take() else {
            return Err(TransactionError::NotActive(self.id));
        };
        if let Err(e) = store_tx.commit().await {
            *self.state.lock() = TransactionState::RolledBack;
            return Err(TransactionError::CommitFailed {
                transaction_id: self.id,
                reason: e.to_string(),
            });
        }
        *self.state.lock() = TransactionState::Committed;
        drop(slot);
        debug!(transaction_id = %self.id, "Transaction committed");

        self.run_hooks(HookPhase::AfterCommit);
        Ok(())
    }

    /// Roll back if still active; a no-op otherwise
    pub async fn rollback(&self) -> Result<(), TransactionError> {
        let mut slot = self.store_tx.lock().await;
        if self.state() != TransactionState::Active {
            return Ok(());
        }
        self.rollback_locked(&mut slot).await
    }

    /// Release the transaction, rolling back if it was never completed.
    /// Rollback failures are logged, never returned.
    pub async fn dispose(&self) {
        if self.state() == TransactionState::Disposed {
            return;
        }
        if let Err(e) = self.rollback().await {
            error!(transaction_id = %self.id, error = %e, "Rollback during dispose failed");
        }
        self.run_hooks(HookPhase::BeforeDispose);
        *self.state.lock() = TransactionState::Disposed;
        debug!(transaction_id = %self.id, "Transaction disposed");
    }

    async fn rollback_locked(
        &self,
        slot: &mut MutexGuard<'_, StoreSlot>,
    ) -> Result<(), TransactionError> {
        self.run_hooks(HookPhase::BeforeRollback);

        let result = match slot.take() {
            Some(store_tx) => store_tx.rollback().await,
            None => Ok(()),
        };
        *self.state.lock() = TransactionState::RolledBack;

        if let Err(e) = result {
            return Err(TransactionError::RollbackFailed {
                transaction_id: self.id,
                reason: e.to_string(),
            });
        }
        debug!(transaction_id = %self.id, "Transaction rolled back");
        self.run_hooks(HookPhase::AfterRollback);
        Ok(())
    }

    fn run_hooks(&self, phase: HookPhase) {
        let hooks = std::mem::take(self.hooks.lock().slot(phase));
        for hook in hooks {
            if let Err(reason) = hook() {
                warn!(transaction_id = %self.id, phase = ?phase, reason = %reason, "Transaction hook failed");
            }
        }
    }
}
