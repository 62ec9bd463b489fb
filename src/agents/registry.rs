//! Static name → factory table used to materialize agents from configuration.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::agents::agent::Agent;
use crate::agents::executor::AgentHandle;
use crate::config::AgentDescriptor;
use crate::error::{ButlerError, Result};

/// Builds an agent from its descriptor.
pub type AgentFactory = Arc<dyn Fn(&AgentDescriptor) -> Result<Arc<dyn Agent>> + Send + Sync>;

/// An agent that was enabled but could not be constructed.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoadFailure {
    pub agent: String,
    pub reason: String,
}

#[derive(Default)]
pub struct LoadOutcome {
    pub agents: BTreeMap<String, Arc<AgentHandle>>,
    pub failures: Vec<LoadFailure>,
    pub disabled: Vec<String>,
}

impl LoadOutcome {
    pub fn loaded_names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

#[derive(Default, Clone)]
pub struct AgentRegistry {
    factories: HashMap<String, AgentFactory>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AgentDescriptor) -> Result<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        if self
            .factories
            .insert(name.to_string(), Arc::new(factory))
            .is_some()
        {
            debug!("Replaced agent factory: {}", name);
        } else {
            debug!("Registered agent factory: {}", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Construct one agent. Unknown names are a typed error.
    pub fn create(&self, descriptor: &AgentDescriptor) -> Result<Arc<dyn Agent>> {
        let factory = self
            .factories
            .get(&descriptor.name)
            .ok_or_else(|| ButlerError::UnknownAgent(descriptor.name.clone()))?;

        factory(descriptor).map_err(|e| {
            ButlerError::AgentLoadError {
                agent: descriptor.name.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Materialize every enabled descriptor. A failing agent is logged and
    /// skipped; loading never aborts.
    pub fn load(&self, descriptors: &[AgentDescriptor]) -> LoadOutcome {
        info!("Loading enabled agents...");
        let mut outcome = LoadOutcome::default();

        for descriptor in descriptors {
            if !descriptor.enabled {
                debug!("Agent {} is disabled, not loading", descriptor.name);
                outcome.disabled.push(descriptor.name.clone());
                continue;
            }

            if outcome.agents.contains_key(&descriptor.name) {
                error!("Failed to load agent '{}': already loaded", descriptor.name);
                outcome.failures.push(LoadFailure {
                    agent: descriptor.name.clone(),
                    reason: "agent is configured more than once".to_string(),
                });
                continue;
            }

            match self.create(descriptor) {
                Ok(agent) => {
                    info!("Successfully loaded agent: {}", descriptor.name);
                    outcome.agents.insert(
                        descriptor.name.clone(),
                        Arc::new(AgentHandle::new(descriptor.clone(), agent)),
                    );
                }
                Err(e) => {
                    error!("Failed to load agent '{}': {}", descriptor.name, e);
                    outcome.failures.push(LoadFailure {
                        agent: descriptor.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Agent loading complete: {} loaded, {} failed, {} disabled",
            outcome.agents.len(),
            outcome.failures.len(),
            outcome.disabled.len()
        );
        outcome
    }
}
