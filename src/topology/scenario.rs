//! Scenarios: a named pipeline of inbound, business-process and outbound
//! components.
//!
//! Building a scenario validates, in order, the scenario's own fields, each
//! component (its fields, then its queues) and name uniqueness. Only then
//! is every distinct queue message type registered, once, in the
//! [`TypeRegistry`].

use super::component::{Component, ComponentBuilder, ComponentKind, ComponentSummary};
use super::queue::ComponentQueue;
use crate::error::TopologyError;
use crate::logging::log_registry_operation;
use crate::registry::{HandlerRegistry, RegisteredType, TypeRegistry};
use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

const ENTITY: &str = "scenario";

/// A validated, frozen pipeline description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    name: String,
    description: String,
    enabled: bool,
    components: Vec<Component>,
    message_types: Vec<RegisteredType>,
}

impl Scenario {
    pub fn builder(name: impl Into<String>) -> ScenarioBuilder {
        ScenarioBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Components ordered inbound, business process, outbound
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_of(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.iter().filter(move |c| c.kind() == kind)
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.name() == name)
    }

    pub fn queues(&self) -> impl Iterator<Item = (&Component, &ComponentQueue)> {
        self.components
            .iter()
            .flat_map(|c| c.queues().iter().map(move |q| (c, q)))
    }

    /// Distinct queue message types, in first-declared order
    pub fn message_types(&self) -> &[RegisteredType] {
        &self.message_types
    }

    /// Queue message types that no handler is registered for
    pub fn unhandled_message_types<C>(&self, handlers: &HandlerRegistry<C>) -> Vec<&RegisteredType>
    where
        C: Send + Sync + 'static,
    {
        self.message_types
            .iter()
            .filter(|t| !handlers.has_handlers(t.descriptor.type_id()))
            .collect()
    }

    pub fn summary(&self) -> ScenarioSummary {
        ScenarioSummary {
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            components: self.components.iter().map(Component::summary).collect(),
            message_types: self.message_types.iter().map(|t| t.name.clone()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioSummary {
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub components: Vec<ComponentSummary>,
    pub message_types: Vec<String>,
}

/// Fluent builder for [`Scenario`]
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    description: Option<String>,
    enabled: bool,
    components: Vec<ComponentBuilder>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            enabled: true,
            components: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn component(mut self, component: ComponentBuilder) -> Self {
        self.components.push(component);
        self
    }

    pub fn build(self, types: &TypeRegistry) -> Result<Scenario, TopologyError> {
        if self.name.trim().is_empty() {
            return Err(TopologyError::MissingField {
                entity: ENTITY,
                name: self.name,
                field: "name",
            });
        }
        let description = match self.description {
            Some(d) if !d.trim().is_empty() => d,
            _ => {
                return Err(TopologyError::MissingField {
                    entity: ENTITY,
                    name: self.name,
                    field: "description",
                })
            }
        };

        let mut builders = self.components;
        // Stable: declaration order is kept within each stage
        builders.sort_by_key(ComponentBuilder::kind);

        let mut seen = HashSet::new();
        let mut components = Vec::with_capacity(builders.len());
        for builder in builders {
            let component = builder.build()?;
            if !seen.insert(component.name().to_string()) {
                return Err(TopologyError::DuplicateName {
                    entity: "component",
                    name: component.name().to_string(),
                    owner: self.name,
                });
            }
            components.push(component);
        }

        let mut registered_ids = HashSet::new();
        let mut message_types = Vec::new();
        for component in &components {
            for queue in component.queues() {
                if registered_ids.contains(&queue.message_type().type_id()) {
                    continue;
                }
                let registered = types.get_or_register_message(queue.message_type())?;
                registered_ids.insert(queue.message_type().type_id());
                message_types.push(registered);
            }
        }

        info!(
            scenario = %self.name,
            components = components.len(),
            message_types = message_types.len(),
            enabled = self.enabled,
            "Scenario built"
        );
        log_registry_operation(
            "scenario_built",
            Some(&self.name),
            "ok",
            Some(&format!("{} message types", message_types.len())),
        );

        Ok(Scenario {
            name: self.name,
            description,
            enabled: self.enabled,
            components,
            message_types,
        })
    }
}
