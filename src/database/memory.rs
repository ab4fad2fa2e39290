//! Transactional in-memory store.
//!
//! Each transaction stages its writes locally and sees its own writes on
//! read. Commit re-checks every compare-and-swap against the committed rows
//! and applies the whole batch under one lock; rollback or drop discards it.

use super::store::{MessageStore, StoreTransaction};
use crate::error::{StorageError, StorageResult};
use crate::models::{
    EnvelopeUpdate, HandlerMessage, HandlerMessageLog, Host, HostType, MessageBody,
    MessageTypeRow,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Committed contents of every table.
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    pub host_types: HashMap<Uuid, HostType>,
    pub message_types: HashMap<Uuid, MessageTypeRow>,
    pub hosts: HashMap<Uuid, Host>,
    pub message_bodies: HashMap<Uuid, MessageBody>,
    pub handler_messages: HashMap<Uuid, HandlerMessage>,
    pub handler_message_logs: Vec<HandlerMessageLog>,
}

/// Committed write counters, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub host_types: usize,
    pub message_types: usize,
    pub hosts: usize,
    pub message_bodies: usize,
    pub handler_messages: usize,
    pub handler_message_updates: usize,
    pub handler_message_logs: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

/// Table selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryTable {
    Host,
    MessageBody,
    HandlerMessage,
    HandlerMessageLog,
}

#[derive(Debug, Default)]
struct Shared {
    tables: MemoryTables,
    counts: WriteCounts,
    injected_row_counts: HashMap<MemoryTable, u64>,
}

/// In-memory [`MessageStore`] with real commit/rollback semantics
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStore {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the committed tables
    pub fn tables(&self) -> MemoryTables {
        self.shared.lock().tables.clone()
    }

    pub fn write_counts(&self) -> WriteCounts {
        self.shared.lock().counts
    }

    /// Make the next insert into `table` report `affected` rows, simulating
    /// a driver or schema fault.
    pub fn inject_row_count(&self, table: MemoryTable, affected: u64) {
        self.shared.lock().injected_row_counts.insert(table, affected);
    }

    fn take_injected(&self, table: MemoryTable) -> Option<u64> {
        self.shared.lock().injected_row_counts.remove(&table)
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn backend_name(&self) -> &'static str {
        "in_memory"
    }

    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            staged: MemoryTables::default(),
            updated: HashMap::new(),
            base_tokens: HashMap::new(),
            update_count: 0,
        }))
    }

    async fn close(&self) {}
}

struct MemoryTransaction {
    store: InMemoryMessageStore,
    staged: MemoryTables,
    /// Committed envelopes modified by this transaction, current view
    updated: HashMap<Uuid, HandlerMessage>,
    /// Sync token of each committed envelope when this transaction first touched it
    base_tokens: HashMap<Uuid, Uuid>,
    update_count: usize,
}

impl MemoryTransaction {
    fn committed_message(&self, id: Uuid) -> Option<HandlerMessage> {
        self.store
            .shared
            .lock()
            .tables
            .handler_messages
            .get(&id)
            .cloned()
    }

    fn duplicate(table: &str, key: Uuid) -> StorageError {
        StorageError::DuplicateKey {
            table: table.to_string(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_host_type_if_absent(&mut self, row: &HostType) -> StorageResult<u64> {
        let exists = self.staged.host_types.contains_key(&row.id_host_type)
            || self
                .store
                .shared
                .lock()
                .tables
                .host_types
                .contains_key(&row.id_host_type);
        if exists {
            return Ok(0);
        }
        self.staged.host_types.insert(row.id_host_type, row.clone());
        Ok(1)
    }

    async fn insert_message_type_if_absent(
        &mut self,
        row: &MessageTypeRow,
    ) -> StorageResult<u64> {
        let exists = self.staged.message_types.contains_key(&row.id_message_type)
            || self
                .store
                .shared
                .lock()
                .tables
                .message_types
                .contains_key(&row.id_message_type);
        if exists {
            return Ok(0);
        }
        self.staged
            .message_types
            .insert(row.id_message_type, row.clone());
        Ok(1)
    }

    async fn insert_host(&mut self, row: &Host) -> StorageResult<u64> {
        if let Some(affected) = self.store.take_injected(MemoryTable::Host) {
            return Ok(affected);
        }
        if self.staged.hosts.contains_key(&row.id_host)
            || self.store.shared.lock().tables.hosts.contains_key(&row.id_host)
        {
            return Err(Self::duplicate("Host", row.id_host));
        }
        self.staged.hosts.insert(row.id_host, row.clone());
        Ok(1)
    }

    async fn insert_message_body(&mut self, row: &MessageBody) -> StorageResult<u64> {
        if let Some(affected) = self.store.take_injected(MemoryTable::MessageBody) {
            return Ok(affected);
        }
        if self.staged.message_bodies.contains_key(&row.id_message_body)
            || self
                .store
                .shared
                .lock()
                .tables
                .message_bodies
                .contains_key(&row.id_message_body)
        {
            return Err(Self::duplicate("MessageBody", row.id_message_body));
        }
        self.staged
            .message_bodies
            .insert(row.id_message_body, row.clone());
        Ok(1)
    }

    async fn insert_handler_message(&mut self, row: &HandlerMessage) -> StorageResult<u64> {
        if let Some(affected) = self.store.take_injected(MemoryTable::HandlerMessage) {
            return Ok(affected);
        }
        if self
            .staged
            .handler_messages
            .contains_key(&row.id_handler_message)
            || self.committed_message(row.id_handler_message).is_some()
        {
            return Err(Self::duplicate("HandlerMessage", row.id_handler_message));
        }
        self.staged
            .handler_messages
            .insert(row.id_handler_message, row.clone());
        Ok(1)
    }

    async fn update_handler_message(&mut self, update: &EnvelopeUpdate) -> StorageResult<u64> {
        let id = update.id_handler_message;

        if let Some(row) = self.staged.handler_messages.get_mut(&id) {
            return Ok(u64::from(update.apply_to(row)));
        }
        if let Some(row) = self.updated.get_mut(&id) {
            let applied = update.apply_to(row);
            self.update_count += usize::from(applied);
            return Ok(u64::from(applied));
        }

        let Some(mut row) = self.committed_message(id) else {
            return Ok(0);
        };
        let base = row.sync_token;
        if !update.apply_to(&mut row) {
            return Ok(0);
        }
        self.base_tokens.insert(id, base);
        self.updated.insert(id, row);
        self.update_count += 1;
        Ok(1)
    }

    async fn insert_handler_message_log(
        &mut self,
        row: &HandlerMessageLog,
    ) -> StorageResult<u64> {
        if let Some(affected) = self.store.take_injected(MemoryTable::HandlerMessageLog) {
            return Ok(affected);
        }
        self.staged.handler_message_logs.push(row.clone());
        Ok(1)
    }

    async fn fetch_handler_message(&mut self, id: Uuid) -> StorageResult<Option<HandlerMessage>> {
        if let Some(row) = self.staged.handler_messages.get(&id) {
            return Ok(Some(row.clone()));
        }
        if let Some(row) = self.updated.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(self.committed_message(id))
    }

    async fn fetch_message_body(&mut self, id: Uuid) -> StorageResult<Option<MessageBody>> {
        if let Some(row) = self.staged.message_bodies.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .store
            .shared
            .lock()
            .tables
            .message_bodies
            .get(&id)
            .cloned())
    }

    async fn fetch_handler_message_logs(
        &mut self,
        id_handler_message: Uuid,
    ) -> StorageResult<Vec<HandlerMessageLog>> {
        let mut rows: Vec<HandlerMessageLog> = self
            .store
            .shared
            .lock()
            .tables
            .handler_message_logs
            .iter()
            .filter(|row| row.id_handler_message == id_handler_message)
            .cloned()
            .collect();
        rows.extend(
            self.staged
                .handler_message_logs
                .iter()
                .filter(|row| row.id_handler_message == id_handler_message)
                .cloned(),
        );
        Ok(rows)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let mut shared = this.store.shared.lock();

        // Validate everything before touching the committed tables
        for (id, base) in &this.base_tokens {
            let current = shared.tables.handler_messages.get(id).map(|r| r.sync_token);
            if current != Some(*base) {
                return Err(StorageError::ConcurrencyConflict {
                    envelope_id: *id,
                    expected_token: *base,
                });
            }
        }
        if let Some(id) = this
            .staged
            .hosts
            .keys()
            .find(|id| shared.tables.hosts.contains_key(id))
        {
            return Err(Self::duplicate("Host", *id));
        }
        if let Some(id) = this
            .staged
            .handler_messages
            .keys()
            .find(|id| shared.tables.handler_messages.contains_key(id))
        {
            return Err(Self::duplicate("HandlerMessage", *id));
        }

        let shared = &mut *shared;
        let (tables, counts) = (&mut shared.tables, &mut shared.counts);
        for (id, row) in this.staged.host_types {
            if let std::collections::hash_map::Entry::Vacant(slot) = tables.host_types.entry(id) {
                slot.insert(row);
                counts.host_types += 1;
            }
        }
        for (id, row) in this.staged.message_types {
            if let std::collections::hash_map::Entry::Vacant(slot) =
                tables.message_types.entry(id)
            {
                slot.insert(row);
                counts.message_types += 1;
            }
        }
        counts.hosts += this.staged.hosts.len();
        tables.hosts.extend(this.staged.hosts);
        counts.message_bodies += this.staged.message_bodies.len();
        tables.message_bodies.extend(this.staged.message_bodies);
        counts.handler_messages += this.staged.handler_messages.len();
        tables.handler_messages.extend(this.staged.handler_messages);
        counts.handler_message_updates += this.update_count;
        tables.handler_messages.extend(this.updated);
        counts.handler_message_logs += this.staged.handler_message_logs.len();
        tables
            .handler_message_logs
            .extend(this.staged.handler_message_logs);
        counts.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.store.shared.lock().counts.rollbacks += 1;
        Ok(())
    }
}
