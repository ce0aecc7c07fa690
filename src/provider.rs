use crate::config::properties::{CONNECTION_URL, PROVIDER_PROPERTY};
use crate::config::{
    Configuration, ConfigurationSnapshot, DEFAULT_BROKER_ALIAS, DescriptorResolver, JAR_FILE_URLS,
    MAPPING_FILE_NAMES, PERSISTENCE_UNIT_ROOT_URL, Properties, PropertyValue, RegistryResolver,
    UnitDescriptor,
};
use crate::core::{ProviderError, Result};
use crate::factory::{BrokerRegistry, FactoryHandle, FactoryKey, FactoryPool};
use crate::introspect::{self, LoadState};
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::sync::Arc;
use tracing::{debug, info};

/// Canonical provider name accepted in the `provider` property.
pub const PROVIDER_NAME: &str = "persistkit::PersistenceProvider";

/// Unit name used when a factory is resolved from caller properties alone.
const ANONYMOUS_UNIT: &str = "default";

/// Whether the process runs under a managed container.
///
/// Affects class-loading strategy only; pooling behavior is identical
/// either way.
pub fn running_under_managed_container() -> bool {
    std::env::var("PERSISTKIT_CONTAINER")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// The provider entry point.
///
/// Normalizes the by-name, by-name-plus-resource, and by-descriptor call
/// shapes into one internal resolution that converges on
/// [`FactoryPool::get_or_create`]. The pool, descriptor resolver, and
/// broker registry are injected at construction so embedders and tests can
/// swap them without touching process-global state.
pub struct PersistenceProvider {
    pool: Arc<FactoryPool>,
    resolver: Arc<dyn DescriptorResolver>,
    brokers: Arc<BrokerRegistry>,
}

impl Default for PersistenceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistenceProvider {
    pub fn new() -> Self {
        Self {
            pool: FactoryPool::new(),
            resolver: Arc::new(RegistryResolver::new()),
            brokers: Arc::new(BrokerRegistry::new()),
        }
    }

    pub fn with_pool(mut self, pool: Arc<FactoryPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DescriptorResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_broker_registry(mut self, brokers: Arc<BrokerRegistry>) -> Self {
        self.brokers = brokers;
        self
    }

    pub fn pool(&self) -> &Arc<FactoryPool> {
        &self.pool
    }

    pub fn broker_registry(&self) -> &Arc<BrokerRegistry> {
        &self.brokers
    }

    /// Broker family used when the configuration names none.
    pub fn default_broker_alias(&self) -> &'static str {
        DEFAULT_BROKER_ALIAS
    }

    /// True iff the property map does not bind the unit to a different
    /// provider implementation.
    ///
    /// A missing map or missing `provider` entry accepts; a string naming
    /// this provider or a type reference to it accepts. Any other value,
    /// including non-string, non-type values, rejects without error.
    pub fn accept_provider(&self, properties: Option<&Properties>) -> bool {
        let Some(properties) = properties else {
            return true;
        };
        match properties.get(PROVIDER_PROPERTY) {
            None => true,
            Some(PropertyValue::Str(name)) => {
                name == PROVIDER_NAME || name == std::any::type_name::<PersistenceProvider>()
            }
            Some(PropertyValue::Type(type_ref)) => {
                type_ref.id() == TypeId::of::<PersistenceProvider>()
            }
            Some(_) => false,
        }
    }

    /// Resolves `name` against the descriptor registry and returns a
    /// factory handle, or `None` when the configuration is absent.
    pub async fn create_entity_manager_factory(
        &self,
        name: Option<&str>,
        properties: Option<&Properties>,
    ) -> Result<Option<FactoryHandle>> {
        self.create_factory(name, None, properties).await
    }

    /// Like [`Self::create_entity_manager_factory`], consulting the unit
    /// document at `resource` instead of the registry.
    pub async fn create_entity_manager_factory_from_resource(
        &self,
        name: Option<&str>,
        resource: Option<&str>,
        properties: Option<&Properties>,
    ) -> Result<Option<FactoryHandle>> {
        self.create_factory(name, resource, properties).await
    }

    /// Container-managed entry path: the descriptor is supplied directly.
    pub async fn create_container_entity_manager_factory(
        &self,
        descriptor: Option<&UnitDescriptor>,
        properties: Option<&Properties>,
    ) -> Result<Option<FactoryHandle>> {
        let Some(descriptor) = descriptor else {
            return Ok(None);
        };
        if running_under_managed_container() {
            debug!(unit = %descriptor.name, "managed container environment detected");
        }

        let Some(snapshot) = self.configure(descriptor, properties, false)? else {
            return Ok(None);
        };
        self.acquire(snapshot).await.map(Some)
    }

    /// Copies the descriptor's location metadata into the configuration's
    /// environment map, replacing any prior map.
    pub fn set_persistence_environment_info(
        &self,
        config: &mut Configuration,
        descriptor: &UnitDescriptor,
    ) {
        let mut environment = Map::new();
        if let Some(root_url) = &descriptor.root_url {
            environment.insert(
                PERSISTENCE_UNIT_ROOT_URL.to_string(),
                Value::String(root_url.clone()),
            );
        }
        environment.insert(
            MAPPING_FILE_NAMES.to_string(),
            Value::Array(
                descriptor
                    .mapping_file_names
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        environment.insert(
            JAR_FILE_URLS.to_string(),
            Value::Array(
                descriptor
                    .jar_file_urls
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
        );
        config.set_environment(environment);
    }

    /// Generates schema for a named unit.
    ///
    /// `Ok(false)` is the recoverable channel: no name, an explicitly empty
    /// property map (which disables configuration inference), or a unit
    /// that does not resolve. A `None` map defers to unit defaults.
    pub async fn generate_schema(
        &self,
        name: Option<&str>,
        properties: Option<&Properties>,
    ) -> Result<bool> {
        let Some(name) = name else {
            return Ok(false);
        };
        if properties.is_some_and(Properties::is_empty) {
            debug!(unit = name, "empty property map disables configuration inference");
            return Ok(false);
        }

        let Some(snapshot) = self.resolve(Some(name), None, properties)? else {
            return Ok(false);
        };
        self.generate_schema_for_snapshot(snapshot).await?;
        Ok(true)
    }

    /// Generates schema for a caller-supplied descriptor.
    ///
    /// A missing descriptor is a no-op; an explicitly empty property map is
    /// an invalid-configuration error because this path has no recoverable
    /// channel.
    pub async fn generate_schema_for_unit(
        &self,
        descriptor: Option<&UnitDescriptor>,
        properties: Option<&Properties>,
    ) -> Result<()> {
        let Some(descriptor) = descriptor else {
            debug!("no descriptor supplied, skipping schema generation");
            return Ok(());
        };
        if properties.is_some_and(Properties::is_empty) {
            return Err(ProviderError::InvalidConfiguration(
                "an empty property map disables configuration inference for schema generation"
                    .into(),
            ));
        }

        let Some(snapshot) = self.configure(descriptor, properties, false)? else {
            return Err(ProviderError::InvalidConfiguration(format!(
                "unit {:?} is bound to a different provider",
                descriptor.name
            )));
        };
        self.generate_schema_for_snapshot(snapshot).await
    }

    /// Runs schema synchronization through the factory's capability.
    ///
    /// Invalid-argument when the handle is absent or its broker family has
    /// no schema capability; closed-resource when the handle is closed.
    pub async fn synchronize_mappings(&self, factory: Option<&FactoryHandle>) -> Result<()> {
        let Some(handle) = factory else {
            return Err(ProviderError::InvalidArgument(
                "expected a schema-capable entity manager factory but got null".into(),
            ));
        };
        if !handle.is_open() {
            return Err(ProviderError::Closed(
                "entity manager factory is closed".into(),
            ));
        }
        let Some(schema) = handle.broker().schema_sync() else {
            return Err(ProviderError::InvalidArgument(format!(
                "expected a schema-capable broker factory but the {:?} family does not support \
                 schema synchronization",
                handle.broker().name()
            )));
        };
        schema.synchronize(handle.configuration()).await
    }

    pub fn is_loaded(&self, instance: Option<&dyn Any>) -> LoadState {
        introspect::is_loaded(instance)
    }

    pub fn is_loaded_with_reference(
        &self,
        instance: Option<&dyn Any>,
        attribute: Option<&str>,
    ) -> LoadState {
        introspect::is_loaded_with_reference(instance, attribute)
    }

    pub fn is_loaded_without_reference(
        &self,
        instance: Option<&dyn Any>,
        attribute: Option<&str>,
    ) -> LoadState {
        introspect::is_loaded_without_reference(instance, attribute)
    }

    async fn create_factory(
        &self,
        name: Option<&str>,
        resource: Option<&str>,
        properties: Option<&Properties>,
    ) -> Result<Option<FactoryHandle>> {
        let Some(snapshot) = self.resolve(name, resource, properties)? else {
            return Ok(None);
        };
        self.acquire(snapshot).await.map(Some)
    }

    /// The by-name resolution path: locate a descriptor, merge, and freeze.
    ///
    /// `Ok(None)` covers every recoverable failure: no unit, a rejected
    /// provider binding, or mandatory connection properties missing after
    /// the merge.
    fn resolve(
        &self,
        name: Option<&str>,
        resource: Option<&str>,
        properties: Option<&Properties>,
    ) -> Result<Option<ConfigurationSnapshot>> {
        let descriptor = match (name, resource) {
            (None, Some(_)) => None,
            (None, None) => Self::anonymous_descriptor(properties),
            (Some(name), _) => self.resolver.resolve(Some(name), resource)?,
        };
        let Some(descriptor) = descriptor else {
            return Ok(None);
        };

        self.configure(&descriptor, properties, true)
    }

    /// Merges caller properties over the descriptor's and freezes the
    /// configuration. With `require_connection` set, a merge that leaves no
    /// connection locator is a recoverable resolution failure.
    fn configure(
        &self,
        descriptor: &UnitDescriptor,
        properties: Option<&Properties>,
        require_connection: bool,
    ) -> Result<Option<ConfigurationSnapshot>> {
        let caller = properties.cloned().unwrap_or_default();
        let merged = caller.merged_over(&descriptor.properties);

        if !self.accept_provider(Some(&merged)) {
            debug!(unit = %descriptor.name, "unit is bound to a different provider");
            return Ok(None);
        }

        let mut config = Configuration::from_properties(Some(&descriptor.name), merged)?;
        if require_connection && config.connection_url().is_none() {
            debug!(
                unit = %descriptor.name,
                "mandatory connection properties are not inferable"
            );
            return Ok(None);
        }

        self.set_persistence_environment_info(&mut config, descriptor);
        Ok(Some(config.snapshot()))
    }

    fn anonymous_descriptor(properties: Option<&Properties>) -> Option<UnitDescriptor> {
        let properties = properties?;
        if properties.contains_key(CONNECTION_URL) {
            Some(UnitDescriptor::new(ANONYMOUS_UNIT))
        } else {
            None
        }
    }

    async fn acquire(&self, snapshot: ConfigurationSnapshot) -> Result<FactoryHandle> {
        let key = FactoryKey::from_snapshot(&snapshot);
        let pooling = snapshot.pooling_enabled();
        let brokers = Arc::clone(&self.brokers);
        self.pool
            .get_or_create(key, pooling, move || async move {
                Self::construct(&brokers, &snapshot).await
            })
            .await
    }

    async fn construct(
        brokers: &BrokerRegistry,
        snapshot: &ConfigurationSnapshot,
    ) -> Result<FactoryHandle> {
        let alias = snapshot.broker_alias();
        let builder = brokers.builder(alias)?.ok_or_else(|| {
            ProviderError::Construction(format!(
                "no broker factory family registered for alias {alias:?}"
            ))
        })?;
        let broker = builder.build(snapshot).await?;
        info!(unit = ?snapshot.unit_name(), alias, "entity manager factory constructed");
        Ok(FactoryHandle::new(broker, snapshot.clone()))
    }

    async fn generate_schema_for_snapshot(&self, snapshot: ConfigurationSnapshot) -> Result<()> {
        // Schema generation never goes through the pool: the factory is
        // private to this call and closed before returning.
        let handle = Self::construct(&self.brokers, &snapshot).await?;
        let synchronized = self.synchronize_mappings(Some(&handle)).await;
        let closed = handle.close().await;
        synchronized?;
        closed
    }
}
