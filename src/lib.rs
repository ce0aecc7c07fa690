// ============================================================================
// persistkit Library
// ============================================================================
//
// Persistence-unit bootstrap layer: resolves a named unit (or a supplied
// deployment descriptor) into a merged configuration, mints or reuses a
// pooled broker factory for it, and returns a factory handle that produces
// unit-of-work sessions.

pub mod config;
pub mod core;
pub mod factory;
pub mod introspect;
pub mod provider;

// Re-export main types for convenience
pub use core::{ProviderError, Result};

pub use config::{
    Configuration, ConfigurationSnapshot, DEFAULT_BROKER_ALIAS, DescriptorResolver, Properties,
    PropertyValue, RegistryResolver, TypeRef, UnitDescriptor, UnitDocument,
};
pub use factory::{
    BrokerBuilder, BrokerFactory, BrokerRegistry, FactoryHandle, FactoryKey, FactoryPool,
    InMemoryBrokerFactory, ManagedEntity, SchemaSync, Session, SessionBackend,
};
pub use introspect::{LoadState, is_loaded, is_loaded_with_reference, is_loaded_without_reference};
pub use provider::{PROVIDER_NAME, PersistenceProvider, running_under_managed_container};

/// Recognized property names.
pub mod properties {
    pub use crate::config::properties::{
        BROKER_FACTORY, CONNECTION_DRIVER_NAME, CONNECTION_PASSWORD, CONNECTION_URL,
        CONNECTION_USER_NAME, FACTORY_POOL, PROVIDER_PROPERTY, SYNCHRONIZE_MAPPINGS,
    };
    pub use crate::config::{JAR_FILE_URLS, MAPPING_FILE_NAMES, PERSISTENCE_UNIT_ROOT_URL};
}
