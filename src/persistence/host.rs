//! Single-flight host registration.
//!
//! The first caller writes the `HostType` and `Host` rows and caches the
//! result; every concurrent or later caller receives the cached [`Host`].
//! Failures propagate to the caller and leave nothing cached, so a later
//! call retries from scratch.

use super::MessagePersistence;
use crate::constants::HostKind;
use crate::error::StorageResult;
use crate::models::{Host, HostType};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use uuid::Uuid;

/// Namespace for host-type identifiers
const HOST_TYPE_NAMESPACE: Uuid = Uuid::from_u128(0x2b9e_71c4_05d3_4f6a_8a12_c0ff_ee51_7d30);

/// What kind of process is starting, and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMetadata {
    pub kind: HostKind,
    pub application_name: String,
    pub machine_name: String,
}

impl HostMetadata {
    pub fn new(kind: HostKind, application_name: impl Into<String>) -> Self {
        Self {
            kind,
            application_name: application_name.into(),
            machine_name: current_machine_name(),
        }
    }

    pub fn with_machine_name(mut self, machine_name: impl Into<String>) -> Self {
        self.machine_name = machine_name.into();
        self
    }

    /// Stable id for the host kind
    pub fn host_type_id(&self) -> Uuid {
        Uuid::new_v5(&HOST_TYPE_NAMESPACE, self.kind.name().as_bytes())
    }
}

fn current_machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "localhost".to_string())
}

#[derive(Debug, Default)]
pub struct HostInitializer {
    host: OnceCell<Arc<Host>>,
    writes: AtomicUsize,
}

impl HostInitializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn initialize(
        &self,
        persistence: &MessagePersistence,
        metadata: &HostMetadata,
    ) -> StorageResult<Arc<Host>> {
        if let Some(host) = self.host.get() {
            debug!(host_id = %host.id_host, "Host already initialized");
            return Ok(Arc::clone(host));
        }

        let host = self
            .host
            .get_or_try_init(|| self.write_host(persistence, metadata))
            .await?;
        Ok(Arc::clone(host))
    }

    async fn write_host(
        &self,
        persistence: &MessagePersistence,
        metadata: &HostMetadata,
    ) -> StorageResult<Arc<Host>> {
        let host_type = HostType {
            id_host_type: metadata.host_type_id(),
            name: metadata.kind.name().to_string(),
        };
        let host = Host {
            id_host: Uuid::new_v4(),
            id_host_type: host_type.id_host_type,
            application_name: metadata.application_name.clone(),
            machine_name: metadata.machine_name.clone(),
            process_id: i32::try_from(std::process::id()).unwrap_or(i32::MAX),
            runtime_unique_key: persistence.runtime_key(),
            time_created_utc: Utc::now(),
        };

        persistence.insert_host(&host_type, &host).await?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        info!(
            host_id = %host.id_host,
            kind = %metadata.kind,
            application = %host.application_name,
            machine = %host.machine_name,
            "Host initialized"
        );
        Ok(Arc::new(host))
    }

    /// The cached host, if initialization has completed
    pub fn host(&self) -> Option<Arc<Host>> {
        self.host.get().cloned()
    }

    /// Number of durable host writes performed
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}
