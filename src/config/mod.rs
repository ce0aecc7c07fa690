pub mod descriptor;
pub mod properties;
pub mod resolver;

pub use descriptor::{UnitDescriptor, UnitDocument};
pub use properties::{Properties, PropertyValue, TypeRef};
pub use resolver::{DescriptorResolver, RegistryResolver};

use crate::core::{ProviderError, Result};
use properties::{
    BROKER_FACTORY, CONNECTION_DRIVER_NAME, CONNECTION_URL, CONNECTION_USER_NAME, FACTORY_POOL,
    SYNCHRONIZE_MAPPINGS,
};
use serde_json::{Map, Value};

/// Alias of the broker factory family used when none is configured.
pub const DEFAULT_BROKER_ALIAS: &str = "memory";

/// Environment key holding a unit's root URL.
pub const PERSISTENCE_UNIT_ROOT_URL: &str = "PersistenceUnitRootUrl";
/// Environment key holding a unit's mapping file names.
pub const MAPPING_FILE_NAMES: &str = "MappingFileNames";
/// Environment key holding a unit's JAR file URLs.
pub const JAR_FILE_URLS: &str = "JarFileUrls";

/// Merged configuration for one persistence unit.
///
/// Built from descriptor-supplied defaults overridden by caller-supplied
/// properties; the pooling flag is parsed eagerly so an unrecognized token
/// fails here rather than deep inside factory construction.
#[derive(Debug, Clone)]
pub struct Configuration {
    unit_name: Option<String>,
    properties: Properties,
    pooling: bool,
    environment: Map<String, Value>,
}

impl Configuration {
    pub fn from_properties(unit_name: Option<&str>, properties: Properties) -> Result<Self> {
        let pooling = match properties.get(FACTORY_POOL) {
            None => false,
            Some(value) => value.as_bool_token().ok_or_else(|| {
                ProviderError::InvalidArgument(format!(
                    "unrecognized value for {FACTORY_POOL}: {value:?}, expected \"true\" or \"false\""
                ))
            })?,
        };

        Ok(Self {
            unit_name: unit_name.map(str::to_string),
            properties,
            pooling,
            environment: Map::new(),
        })
    }

    pub fn unit_name(&self) -> Option<&str> {
        self.unit_name.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn pooling_enabled(&self) -> bool {
        self.pooling
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_URL)
    }

    pub fn connection_driver(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_DRIVER_NAME)
    }

    pub fn connection_user(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_USER_NAME)
    }

    /// Configured broker alias, falling back to the documented default.
    pub fn broker_alias(&self) -> &str {
        self.properties
            .get_str(BROKER_FACTORY)
            .unwrap_or(DEFAULT_BROKER_ALIAS)
    }

    pub fn environment(&self) -> &Map<String, Value> {
        &self.environment
    }

    /// Replaces the environment map wholesale.
    pub fn set_environment(&mut self, environment: Map<String, Value>) {
        self.environment = environment;
    }

    /// Freezes this configuration into the immutable form handed to the pool.
    pub fn snapshot(&self) -> ConfigurationSnapshot {
        ConfigurationSnapshot {
            unit_name: self.unit_name.clone(),
            properties: self.properties.clone(),
            broker_alias: self.broker_alias().to_string(),
            pooling: self.pooling,
            environment: self.environment.clone(),
        }
    }
}

/// Immutable view of a merged configuration.
///
/// Once handed to the factory pool nothing mutates it; every caller that
/// resolves to the same pooled factory observes the same snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSnapshot {
    unit_name: Option<String>,
    properties: Properties,
    broker_alias: String,
    pooling: bool,
    environment: Map<String, Value>,
}

impl ConfigurationSnapshot {
    pub fn unit_name(&self) -> Option<&str> {
        self.unit_name.as_deref()
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn broker_alias(&self) -> &str {
        &self.broker_alias
    }

    pub fn pooling_enabled(&self) -> bool {
        self.pooling
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_URL)
    }

    pub fn connection_driver(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_DRIVER_NAME)
    }

    pub fn connection_user(&self) -> Option<&str> {
        self.properties.get_str(CONNECTION_USER_NAME)
    }

    pub fn synchronize_mappings_action(&self) -> Option<&str> {
        self.properties.get_str(SYNCHRONIZE_MAPPINGS)
    }

    pub fn environment(&self) -> &Map<String, Value> {
        &self.environment
    }
}
