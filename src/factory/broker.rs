use super::session::{ManagedEntity, Session, SessionBackend};
use crate::config::{ConfigurationSnapshot, DEFAULT_BROKER_ALIAS, MAPPING_FILE_NAMES};
use crate::core::{ProviderError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// The underlying broker/connection factory behind a factory handle.
///
/// Constructed once per factory handle by a [`BrokerBuilder`]; everything a
/// handle does after construction goes through this seam.
#[async_trait]
pub trait BrokerFactory: Send + Sync {
    /// Family name used in diagnostics.
    fn name(&self) -> &str;

    async fn open_session(&self, id: u64) -> Result<Session>;

    /// Releases the broker's resources. Called once, from the owning handle.
    async fn shutdown(&self) -> Result<()>;

    /// Schema-synchronization capability, if this family supports it.
    fn schema_sync(&self) -> Option<&dyn SchemaSync> {
        None
    }
}

/// Capability marker for broker families that can synchronize schema
/// mappings. Checked instead of a concrete-type cast.
#[async_trait]
pub trait SchemaSync: Send + Sync {
    async fn synchronize(&self, snapshot: &ConfigurationSnapshot) -> Result<()>;
}

/// Builds a broker factory from an immutable configuration snapshot.
///
/// Construction may perform blocking I/O (opening connections); the pool
/// never holds a global lock across a call to this.
#[async_trait]
pub trait BrokerBuilder: Send + Sync {
    async fn build(&self, snapshot: &ConfigurationSnapshot) -> Result<Arc<dyn BrokerFactory>>;
}

/// Alias table selecting the broker factory family.
///
/// `register` is public so tests and embedders can install their own
/// builders next to the built-in `memory` family.
pub struct BrokerRegistry {
    builders: RwLock<HashMap<String, Arc<dyn BrokerBuilder>>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        let mut builders: HashMap<String, Arc<dyn BrokerBuilder>> = HashMap::new();
        builders.insert(DEFAULT_BROKER_ALIAS.to_string(), Arc::new(MemoryBrokerBuilder));
        Self {
            builders: RwLock::new(builders),
        }
    }

    pub fn register(&self, alias: impl Into<String>, builder: Arc<dyn BrokerBuilder>) -> Result<()> {
        let mut builders = self.builders.write()?;
        builders.insert(alias.into(), builder);
        Ok(())
    }

    pub fn builder(&self, alias: &str) -> Result<Option<Arc<dyn BrokerBuilder>>> {
        let builders = self.builders.read()?;
        Ok(builders.get(alias).cloned())
    }

    pub fn aliases(&self) -> Result<Vec<String>> {
        let builders = self.builders.read()?;
        let mut aliases: Vec<String> = builders.keys().cloned().collect();
        aliases.sort();
        Ok(aliases)
    }
}

impl Default for BrokerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for the built-in in-memory broker family.
pub struct MemoryBrokerBuilder;

#[async_trait]
impl BrokerBuilder for MemoryBrokerBuilder {
    async fn build(&self, snapshot: &ConfigurationSnapshot) -> Result<Arc<dyn BrokerFactory>> {
        Ok(Arc::new(InMemoryBrokerFactory::open(snapshot)?))
    }
}

type EntityStore = Arc<tokio::sync::RwLock<HashMap<(String, String), ManagedEntity>>>;

/// In-memory broker factory: entity state tracking over a process-local map.
///
/// The connection locator, when present, must use the `mem:` scheme; a
/// malformed locator is a construction failure, not a resolution failure.
#[derive(Debug)]
pub struct InMemoryBrokerFactory {
    connection_url: Option<String>,
    store: EntityStore,
    synchronized: Mutex<Vec<String>>,
}

impl InMemoryBrokerFactory {
    pub fn open(snapshot: &ConfigurationSnapshot) -> Result<Self> {
        let connection_url = snapshot.connection_url().map(str::to_string);
        if let Some(url) = &connection_url {
            if !url.starts_with("mem:") {
                return Err(ProviderError::Construction(format!(
                    "unrecognized connection URL for the memory broker family: {url}"
                )));
            }
        }
        if let Some(driver) = snapshot.connection_driver() {
            debug!(driver, "memory broker ignores the configured driver");
        }

        Ok(Self {
            connection_url,
            store: Arc::new(tokio::sync::RwLock::new(HashMap::new())),
            synchronized: Mutex::new(Vec::new()),
        })
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.connection_url.as_deref()
    }

    /// Mapping names recorded by schema synchronization, in call order.
    pub fn synchronized_mappings(&self) -> Vec<String> {
        self.synchronized
            .lock()
            .map(|names| names.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrokerFactory for InMemoryBrokerFactory {
    fn name(&self) -> &str {
        DEFAULT_BROKER_ALIAS
    }

    async fn open_session(&self, id: u64) -> Result<Session> {
        Ok(Session::new(
            id,
            Box::new(InMemorySessionBackend {
                store: Arc::clone(&self.store),
            }),
        ))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut store = self.store.write().await;
        let evicted = store.len();
        store.clear();
        debug!(evicted, "memory broker shut down");
        Ok(())
    }

    fn schema_sync(&self) -> Option<&dyn SchemaSync> {
        Some(self)
    }
}

#[async_trait]
impl SchemaSync for InMemoryBrokerFactory {
    async fn synchronize(&self, snapshot: &ConfigurationSnapshot) -> Result<()> {
        let mut names: Vec<String> = snapshot
            .environment()
            .get(MAPPING_FILE_NAMES)
            .and_then(|value| value.as_array())
            .map(|files| {
                files
                    .iter()
                    .filter_map(|file| file.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(action) = snapshot.synchronize_mappings_action() {
            debug!(action, "running schema action");
        }

        let mut synchronized = self.synchronized.lock()?;
        synchronized.append(&mut names);
        Ok(())
    }
}

struct InMemorySessionBackend {
    store: EntityStore,
}

#[async_trait]
impl SessionBackend for InMemorySessionBackend {
    async fn persist(&self, entity: ManagedEntity) -> Result<()> {
        let mut store = self.store.write().await;
        store.insert(
            (entity.entity_class().to_string(), entity.id().to_string()),
            entity,
        );
        Ok(())
    }

    async fn find(&self, entity_class: &str, id: &str) -> Result<Option<ManagedEntity>> {
        let store = self.store.read().await;
        Ok(store
            .get(&(entity_class.to_string(), id.to_string()))
            .cloned())
    }

    async fn remove(&self, entity_class: &str, id: &str) -> Result<bool> {
        let mut store = self.store.write().await;
        Ok(store
            .remove(&(entity_class.to_string(), id.to_string()))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::properties::CONNECTION_URL;
    use crate::config::{Configuration, Properties};

    fn snapshot(props: Properties) -> ConfigurationSnapshot {
        Configuration::from_properties(Some("unit"), props)
            .unwrap()
            .snapshot()
    }

    #[test]
    fn test_registry_has_memory_family() {
        let registry = BrokerRegistry::new();
        assert!(registry.builder(DEFAULT_BROKER_ALIAS).unwrap().is_some());
        assert!(registry.builder("remote").unwrap().is_none());
        assert_eq!(registry.aliases().unwrap(), vec!["memory"]);
    }

    #[test]
    fn test_memory_broker_rejects_foreign_scheme() {
        let err = InMemoryBrokerFactory::open(&snapshot(
            Properties::new().with(CONNECTION_URL, "jdbc:invalid:url"),
        ))
        .unwrap_err();
        assert!(matches!(err, ProviderError::Construction(_)));
    }

    #[test]
    fn test_memory_broker_url_is_optional() {
        let broker = InMemoryBrokerFactory::open(&snapshot(Properties::new())).unwrap();
        assert!(broker.connection_url().is_none());
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let broker =
            InMemoryBrokerFactory::open(&snapshot(Properties::new().with(CONNECTION_URL, "mem:t")))
                .unwrap();

        let mut session = broker.open_session(1).await.unwrap();
        session
            .persist(ManagedEntity::new("crm::Customer", "1").with_field("name", "Alice"))
            .await
            .unwrap();

        let found = session.find("crm::Customer", "1").await.unwrap().unwrap();
        assert_eq!(found.field("name"), Some(&serde_json::json!("Alice")));

        assert!(session.remove("crm::Customer", "1").await.unwrap());
        assert!(session.find("crm::Customer", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shutdown_clears_store() {
        let broker = InMemoryBrokerFactory::open(&snapshot(Properties::new())).unwrap();

        let mut session = broker.open_session(1).await.unwrap();
        session
            .persist(ManagedEntity::new("crm::Customer", "1"))
            .await
            .unwrap();

        broker.shutdown().await.unwrap();

        let mut session = broker.open_session(2).await.unwrap();
        assert!(session.find("crm::Customer", "1").await.unwrap().is_none());
    }
}
