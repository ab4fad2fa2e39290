//! Pipeline components and their queues.

use super::queue::{ComponentQueue, QueueBuilder, QueueSummary};
use crate::error::TopologyError;
use crate::registry::TypeDescriptor;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

const ENTITY: &str = "component";

/// Stage of a pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Inbound,
    BusinessProcess,
    Outbound,
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => write!(f, "inbound"),
            Self::BusinessProcess => write!(f, "business_process"),
            Self::Outbound => write!(f, "outbound"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    name: String,
    kind: ComponentKind,
    runtime_type: TypeDescriptor,
    throttle_delay: Duration,
    inactivity_timeout: Duration,
    shutdown_timeout: Duration,
    queues: Vec<ComponentQueue>,
}

impl Component {
    pub fn inbound(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name, ComponentKind::Inbound)
    }

    pub fn business_process(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name, ComponentKind::BusinessProcess)
    }

    pub fn outbound(name: impl Into<String>) -> ComponentBuilder {
        ComponentBuilder::new(name, ComponentKind::Outbound)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// The type that implements this component
    pub fn runtime_type(&self) -> &TypeDescriptor {
        &self.runtime_type
    }

    pub fn throttle_delay(&self) -> Duration {
        self.throttle_delay
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    pub fn queues(&self) -> &[ComponentQueue] {
        &self.queues
    }

    pub fn queue(&self, name: &str) -> Option<&ComponentQueue> {
        self.queues.iter().find(|q| q.name() == name)
    }

    pub fn summary(&self) -> ComponentSummary {
        ComponentSummary {
            name: self.name.clone(),
            kind: self.kind,
            runtime_type: self.runtime_type.rust_name().to_string(),
            throttle_delay_ms: self.throttle_delay.as_millis() as u64,
            inactivity_timeout_seconds: self.inactivity_timeout.as_secs(),
            shutdown_timeout_seconds: self.shutdown_timeout.as_secs(),
            queues: self.queues.iter().map(ComponentQueue::summary).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSummary {
    pub name: String,
    pub kind: ComponentKind,
    pub runtime_type: String,
    pub throttle_delay_ms: u64,
    pub inactivity_timeout_seconds: u64,
    pub shutdown_timeout_seconds: u64,
    pub queues: Vec<QueueSummary>,
}

/// Fluent builder for [`Component`]
#[derive(Debug, Clone)]
pub struct ComponentBuilder {
    name: String,
    kind: ComponentKind,
    runtime_type: Option<TypeDescriptor>,
    throttle_delay: Duration,
    inactivity_timeout: Option<Duration>,
    shutdown_timeout: Option<Duration>,
    queues: Vec<QueueBuilder>,
}

impl ComponentBuilder {
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            runtime_type: None,
            throttle_delay: Duration::ZERO,
            inactivity_timeout: None,
            shutdown_timeout: None,
            queues: Vec::new(),
        }
    }

    pub fn runtime<T: 'static>(mut self) -> Self {
        self.runtime_type = Some(TypeDescriptor::of::<T>());
        self
    }

    pub fn throttle_delay(mut self, delay: Duration) -> Self {
        self.throttle_delay = delay;
        self
    }

    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    pub fn queue(mut self, queue: QueueBuilder) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Validate the component's own fields, then each queue in order
    pub fn build(self) -> Result<Component, TopologyError> {
        if self.name.trim().is_empty() {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "name",
            });
        }
        let Some(runtime_type) = self.runtime_type else {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "runtime_type",
            });
        };
        let inactivity_timeout = required_timeout(&self.name, "inactivity_timeout", self.inactivity_timeout)?;
        let shutdown_timeout = required_timeout(&self.name, "shutdown_timeout", self.shutdown_timeout)?;

        let mut seen = HashSet::new();
        let mut queues = Vec::with_capacity(self.queues.len());
        for builder in self.queues {
            let queue = builder.build()?;
            if !seen.insert(queue.name().to_string()) {
                return Err(TopologyError::DuplicateName {
                    entity: "queue",
                    name: queue.name().to_string(),
                    owner: self.name,
                });
            }
            queues.push(queue);
        }

        Ok(Component {
            name: self.name,
            kind: self.kind,
            runtime_type,
            throttle_delay: self.throttle_delay,
            inactivity_timeout,
            shutdown_timeout,
            queues,
        })
    }
}

fn required_timeout(
    name: &str,
    field: &'static str,
    value: Option<Duration>,
) -> Result<Duration, TopologyError> {
    match value {
        None => Err(TopologyError::MissingField {
            entity: ENTITY,
            name: name.to_string(),
            field,
        }),
        Some(timeout) if timeout.is_zero() => Err(TopologyError::InvalidValue {
            entity: ENTITY,
            name: name.to_string(),
            field,
            reason: "must be positive".to_string(),
        }),
        Some(timeout) => Ok(timeout),
    }
}
