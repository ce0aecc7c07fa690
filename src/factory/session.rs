use crate::core::{ProviderError, Result};
use crate::introspect::LoadState;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A managed entity instance as tracked by the runtime.
///
/// Carries the per-attribute load bookkeeping the introspection utilities
/// query. Anything that is not a `ManagedEntity` is unknown to this
/// provider's runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedEntity {
    entity_class: String,
    id: String,
    fields: BTreeMap<String, Value>,
    loaded_attrs: BTreeSet<String>,
    fully_loaded: bool,
}

impl ManagedEntity {
    pub fn new(entity_class: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_class: entity_class.into(),
            id: id.into(),
            fields: BTreeMap::new(),
            loaded_attrs: BTreeSet::new(),
            fully_loaded: true,
        }
    }

    /// Sets a field value and marks the attribute loaded.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        self.loaded_attrs.insert(name.clone());
        self.fields.insert(name, value.into());
        self
    }

    /// Declares an attribute that has not been fetched yet.
    ///
    /// A lazily-fetched attribute makes the whole instance partially loaded.
    pub fn with_unloaded_field(mut self, name: impl Into<String>) -> Self {
        self.loaded_attrs.remove(&name.into());
        self.fully_loaded = false;
        self
    }

    pub fn entity_class(&self) -> &str {
        &self.entity_class
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Load classification for the whole instance or a single attribute.
    ///
    /// A `None` attribute is the whole-object query.
    pub fn load_state(&self, attribute: Option<&str>) -> LoadState {
        match attribute {
            None => {
                if self.fully_loaded {
                    LoadState::Loaded
                } else {
                    LoadState::NotLoaded
                }
            }
            Some(attr) => {
                if self.loaded_attrs.contains(attr) {
                    LoadState::Loaded
                } else {
                    LoadState::NotLoaded
                }
            }
        }
    }
}

/// Storage seam a session delegates to.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn persist(&self, entity: ManagedEntity) -> Result<()>;
    async fn find(&self, entity_class: &str, id: &str) -> Result<Option<ManagedEntity>>;
    async fn remove(&self, entity_class: &str, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Closed,
}

/// Unit-of-work handle produced by a factory handle.
///
/// Loads and persists managed entities against the broker that opened it.
pub struct Session {
    id: u64,
    state: SessionState,
    backend: Box<dyn SessionBackend>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(id: u64, backend: Box<dyn SessionBackend>) -> Self {
        Self {
            id,
            state: SessionState::Active,
            backend,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Err(ProviderError::Closed("session is closed".into()));
        }
        Ok(())
    }

    pub async fn persist(&mut self, entity: ManagedEntity) -> Result<()> {
        self.ensure_active()?;
        self.backend.persist(entity).await
    }

    pub async fn find(&mut self, entity_class: &str, id: &str) -> Result<Option<ManagedEntity>> {
        self.ensure_active()?;
        self.backend.find(entity_class, id).await
    }

    pub async fn remove(&mut self, entity_class: &str, id: &str) -> Result<bool> {
        self.ensure_active()?;
        self.backend.remove(entity_class, id).await
    }

    /// Idempotent close.
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }
}
