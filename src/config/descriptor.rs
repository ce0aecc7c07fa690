use super::properties::Properties;
use serde::{Deserialize, Serialize};

/// Deployment descriptor for one persistence unit.
///
/// The container-managed analog of a by-name lookup: the caller supplies the
/// unit's location metadata and managed classes directly instead of having
/// them resolved from a unit document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitDescriptor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_url: Option<String>,
    pub mapping_file_names: Vec<String>,
    pub jar_file_urls: Vec<String>,
    pub managed_classes: Vec<String>,
    pub properties: Properties,
}

impl UnitDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn root_url(mut self, url: impl Into<String>) -> Self {
        self.root_url = Some(url.into());
        self
    }

    pub fn add_mapping_file(mut self, name: impl Into<String>) -> Self {
        self.mapping_file_names.push(name.into());
        self
    }

    pub fn add_jar_file(mut self, url: impl Into<String>) -> Self {
        self.jar_file_urls.push(url.into());
        self
    }

    pub fn add_managed_class(mut self, class: impl Into<String>) -> Self {
        self.managed_classes.push(class.into());
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<super::PropertyValue>,
    ) -> Self {
        self.properties.insert(key, value);
        self
    }
}

/// On-disk unit document: a JSON file listing persistence units.
///
/// ```json
/// { "persistence-units": [ { "name": "crm", "properties": { ... } } ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitDocument {
    #[serde(rename = "persistence-units", default)]
    pub units: Vec<UnitDescriptor>,
}

impl UnitDocument {
    pub fn find(&self, name: &str) -> Option<&UnitDescriptor> {
        self.units.iter().find(|unit| unit.name == name)
    }
}
