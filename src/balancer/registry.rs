use std::collections::HashMap;
use std::sync::Arc;

use super::{Balancer, ModelGroup, build_balancer};

/// Model-group name to balancer mapping.
///
/// Populated once at startup, then shared behind an `Arc`. Membership of a
/// group can still change at runtime through the balancer's own lock.
#[derive(Default)]
pub struct ModelGroupRegistry {
    groups: HashMap<String, Arc<dyn Balancer>>,
}

impl ModelGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from the configured groups, in order.
    pub fn from_groups(groups: &[ModelGroup]) -> Self {
        let mut registry = Self::new();
        for group in groups {
            registry.register(group);
        }
        registry
    }

    /// Install a balancer for `group`, replacing any earlier one under the
    /// same name.
    pub fn register(&mut self, group: &ModelGroup) {
        let balancer = build_balancer(group.strategy);
        for backend in &group.models {
            balancer.add(backend.clone());
        }

        if self
            .groups
            .insert(group.name.clone(), balancer)
            .is_some()
        {
            tracing::warn!(group = %group.name, "Model group registered twice; keeping the last definition");
        }
        tracing::debug!(
            group = %group.name,
            strategy = %group.strategy,
            backends = group.models.len(),
            "Model group registered"
        );
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Balancer>> {
        self.groups.get(name).cloned()
    }

    /// Registered group names, sorted.
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl std::fmt::Debug for ModelGroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGroupRegistry")
            .field("groups", &self.group_names())
            .finish()
    }
}
