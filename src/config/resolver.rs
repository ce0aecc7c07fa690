use super::descriptor::{UnitDescriptor, UnitDocument};
use crate::core::{ProviderError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::debug;

/// Resolves a unit name (and optional resource location) to a descriptor.
///
/// A missing unit or missing resource is a recoverable resolution failure
/// (`Ok(None)`); only a resource that exists but cannot be parsed is an
/// error.
pub trait DescriptorResolver: Send + Sync {
    fn resolve(
        &self,
        unit_name: Option<&str>,
        resource: Option<&str>,
    ) -> Result<Option<UnitDescriptor>>;
}

/// In-process descriptor registry with resource-file lookup.
///
/// Units registered programmatically are consulted for by-name resolution;
/// when a resource location is supplied the JSON unit document at that path
/// is read instead.
#[derive(Default)]
pub struct RegistryResolver {
    units: RwLock<HashMap<String, UnitDescriptor>>,
}

impl RegistryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a unit descriptor, replacing any prior unit with that name.
    pub fn register(&self, descriptor: UnitDescriptor) -> Result<()> {
        let mut units = self.units.write()?;
        units.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    /// Loads every unit from a JSON unit document into the registry.
    ///
    /// Returns the number of units loaded.
    pub fn load_resource(&self, path: impl AsRef<Path>) -> Result<usize> {
        let document = Self::read_document(path.as_ref())?.ok_or_else(|| {
            ProviderError::Descriptor(format!(
                "unit document not found: {}",
                path.as_ref().display()
            ))
        })?;

        let count = document.units.len();
        let mut units = self.units.write()?;
        for unit in document.units {
            units.insert(unit.name.clone(), unit);
        }
        Ok(count)
    }

    fn read_document(path: &Path) -> Result<Option<UnitDocument>> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(resource = %path.display(), "unit document not found");
                return Ok(None);
            }
            Err(err) => {
                return Err(ProviderError::Descriptor(format!(
                    "failed to read unit document {}: {err}",
                    path.display()
                )));
            }
        };

        let document: UnitDocument = serde_json::from_str(&raw).map_err(|err| {
            ProviderError::InvalidConfiguration(format!(
                "malformed unit document {}: {err}",
                path.display()
            ))
        })?;
        Ok(Some(document))
    }
}

impl DescriptorResolver for RegistryResolver {
    fn resolve(
        &self,
        unit_name: Option<&str>,
        resource: Option<&str>,
    ) -> Result<Option<UnitDescriptor>> {
        let Some(name) = unit_name else {
            return Ok(None);
        };

        if let Some(resource) = resource {
            let Some(document) = Self::read_document(Path::new(resource))? else {
                return Ok(None);
            };
            let found = document.find(name).cloned();
            if found.is_none() {
                debug!(unit = name, resource, "unit not present in resource document");
            }
            return Ok(found);
        }

        let units = self.units.read()?;
        let found = units.get(name).cloned();
        if found.is_none() {
            debug!(unit = name, "unit not registered");
        }
        Ok(found)
    }
}
