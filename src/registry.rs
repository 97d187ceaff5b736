//! Tool registry with per-role capability grants.
//!
//! The registry is the single catalog of callable actions. Each definition
//! names the roles permitted to offer it to their model; the per-role grant
//! sets are maintained incrementally on every register/unregister so that
//! `tools_for_role` always reflects live state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::agents::Role;
use crate::schema::ToolDefinition;

/// Registry shared across concurrently running tasks.
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

/// Errors from registry mutations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid tool definition: {0}")]
    InvalidToolDefinition(String),
}

/// Catalog of tool definitions and the roles allowed to use each.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    grants: HashMap<Role, HashSet<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh registry for sharing across tasks.
    pub fn shared() -> SharedRegistry {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Store a definition and grant it to every role in `allowed_agents`.
    ///
    /// Re-registration under the same name overwrites the prior definition
    /// and its grants (no versioning). Idempotent for identical definitions.
    ///
    /// # Errors
    /// `RegistryError::InvalidToolDefinition` when name or description is
    /// empty; nothing is mutated on error.
    pub fn register(&mut self, definition: ToolDefinition) -> Result<(), RegistryError> {
        if definition.name.is_empty() {
            return Err(RegistryError::InvalidToolDefinition(
                "tool name is required".to_string(),
            ));
        }
        if definition.description.is_empty() {
            return Err(RegistryError::InvalidToolDefinition(format!(
                "tool '{}' has no description",
                definition.name
            )));
        }
        if definition.allowed_agents.is_empty() {
            return Err(RegistryError::InvalidToolDefinition(format!(
                "tool '{}' grants no roles",
                definition.name
            )));
        }

        // Overwrite semantics: old grants for this name go away first.
        self.revoke_all(&definition.name);
        for role in &definition.allowed_agents {
            self.grants
                .entry(*role)
                .or_default()
                .insert(definition.name.clone());
        }

        tracing::debug!(
            tool = %definition.name,
            roles = ?definition.allowed_agents,
            "registered tool"
        );
        self.tools.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Remove a definition and strip it from every role's grant set.
    ///
    /// Returns `false` when the name was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        if self.tools.remove(name).is_none() {
            return false;
        }
        self.revoke_all(name);
        tracing::debug!(tool = %name, "unregistered tool");
        true
    }

    fn revoke_all(&mut self, name: &str) {
        for granted in self.grants.values_mut() {
            granted.remove(name);
        }
    }

    /// Full definitions currently permitted to `role`, sorted by name.
    ///
    /// Empty for a role with no grants.
    pub fn tools_for_role(&self, role: Role) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .grants
            .get(&role)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| self.tools.get(n).cloned())
                    .collect()
            })
            .unwrap_or_default();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
