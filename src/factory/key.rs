use crate::config::ConfigurationSnapshot;

/// Pooling cache key: the subset of configuration that identifies a factory.
///
/// Equality is value-based. Two snapshots that agree on this subset map to
/// the same pooled factory even when they were built from different unit
/// names or property objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FactoryKey {
    broker_alias: String,
    connection_url: Option<String>,
    connection_driver: Option<String>,
    connection_user: Option<String>,
}

impl FactoryKey {
    pub fn from_snapshot(snapshot: &ConfigurationSnapshot) -> Self {
        Self {
            broker_alias: snapshot.broker_alias().to_string(),
            connection_url: snapshot.connection_url().map(str::to_string),
            connection_driver: snapshot.connection_driver().map(str::to_string),
            connection_user: snapshot.connection_user().map(str::to_string),
        }
    }

    pub fn broker_alias(&self) -> &str {
        &self.broker_alias
    }

    pub fn connection_url(&self) -> Option<&str> {
        self.connection_url.as_deref()
    }
}
