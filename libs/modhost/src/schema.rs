//! Registry filled during the `configure_schema` phase.
//!
//! Modules describe the persistent entities they own. The host keeps the
//! registrations in the order they arrived, which is the resolved module order, so
//! a storage backend consuming them creates dependencies' tables first.

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEntry {
    pub module: String,
    pub name: String,
    pub definition: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("schema '{name}' registered by '{module}' is already owned by '{owner}'")]
    Duplicate {
        module: String,
        name: String,
        owner: String,
    },
}

#[derive(Debug, Default)]
pub struct SchemaRegistry {
    entries: RwLock<Vec<SchemaEntry>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema item on behalf of `module`.
    ///
    /// # Errors
    /// Returns `SchemaError::Duplicate` if `name` is already registered.
    pub fn register(
        &self,
        module: &str,
        name: impl Into<String>,
        definition: serde_json::Value,
    ) -> Result<(), SchemaError> {
        let name = name.into();
        let mut w = self.entries.write();
        if let Some(existing) = w.iter().find(|e| e.name == name) {
            return Err(SchemaError::Duplicate {
                module: module.to_owned(),
                name,
                owner: existing.module.clone(),
            });
        }
        tracing::debug!(module, schema = %name, "Registered schema");
        w.push(SchemaEntry {
            module: module.to_owned(),
            name,
            definition,
        });
        Ok(())
    }

    /// Snapshot of all registrations in arrival order.
    #[must_use]
    pub fn entries(&self) -> Vec<SchemaEntry> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn entries_for(&self, module: &str) -> Vec<SchemaEntry> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.module == module)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
