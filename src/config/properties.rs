use crate::core::{ProviderError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::any::TypeId;
use std::collections::BTreeMap;

/// Property identifying the provider implementation a unit is bound to.
pub const PROVIDER_PROPERTY: &str = "provider";
/// Connection locator for the underlying data source.
pub const CONNECTION_URL: &str = "ConnectionURL";
/// Driver selecting how the connection locator is interpreted.
pub const CONNECTION_DRIVER_NAME: &str = "ConnectionDriverName";
/// Username presented to the data source.
pub const CONNECTION_USER_NAME: &str = "ConnectionUserName";
/// Password presented to the data source.
pub const CONNECTION_PASSWORD: &str = "ConnectionPassword";
/// Alias selecting the broker factory family.
pub const BROKER_FACTORY: &str = "BrokerFactory";
/// Enables factory pooling. Recognized tokens: "true"/"false". Default false.
pub const FACTORY_POOL: &str = "EntityManagerFactoryPool";
/// Schema action executed by mapping synchronization.
pub const SYNCHRONIZE_MAPPINGS: &str = "SynchronizeMappings";

/// A reference to a Rust type, usable as a property value wherever a type
/// name string is accepted.
#[derive(Debug, Clone, Copy)]
pub struct TypeRef {
    id: TypeId,
    name: &'static str,
}

impl TypeRef {
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeRef {}

/// A single configuration value.
///
/// `Type` exists only programmatically; descriptor documents carry scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Type(TypeRef),
}

impl PropertyValue {
    /// Converts a scalar JSON value into a property value.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Str(s.clone())),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Self::Int).ok_or_else(|| {
                ProviderError::InvalidConfiguration(format!(
                    "non-integer numeric property value: {n}"
                ))
            }),
            other => Err(ProviderError::InvalidConfiguration(format!(
                "unsupported property value: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Interprets the value as a boolean token.
    ///
    /// Only `Bool` values and the strings "true"/"false" (any case) are
    /// recognized; everything else is `None`.
    pub fn as_bool_token(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Str(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Self::Str(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<TypeRef> for PropertyValue {
    fn from(v: TypeRef) -> Self {
        Self::Type(v)
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Str(v) => serializer.serialize_str(v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Type(t) => serializer.serialize_str(t.name()),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

/// Ordered property bag.
///
/// Backed by a `BTreeMap` so a merged bag has a stable iteration order
/// regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties {
    entries: BTreeMap<String, PropertyValue>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.entries.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(PropertyValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.entries.iter()
    }

    /// Merges this bag over `defaults`: entries in `self` win.
    pub fn merged_over(&self, defaults: &Properties) -> Properties {
        let mut merged = defaults.clone();
        for (key, value) in &self.entries {
            merged.entries.insert(key.clone(), value.clone());
        }
        merged
    }
}

impl FromIterator<(String, PropertyValue)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, PropertyValue)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_caller_wins() {
        let defaults = Properties::new()
            .with(CONNECTION_URL, "mem:unit")
            .with(BROKER_FACTORY, "memory");
        let overrides = Properties::new().with(CONNECTION_URL, "mem:override");

        let merged = overrides.merged_over(&defaults);
        assert_eq!(merged.get_str(CONNECTION_URL), Some("mem:override"));
        assert_eq!(merged.get_str(BROKER_FACTORY), Some("memory"));
    }

    #[test]
    fn test_bool_token_recognition() {
        assert_eq!(PropertyValue::from(true).as_bool_token(), Some(true));
        assert_eq!(PropertyValue::from("TRUE").as_bool_token(), Some(true));
        assert_eq!(PropertyValue::from("false").as_bool_token(), Some(false));
        assert_eq!(PropertyValue::from("yes").as_bool_token(), None);
        assert_eq!(PropertyValue::from(1i64).as_bool_token(), None);
    }

    #[test]
    fn test_type_ref_equality_by_id() {
        struct Marker;
        assert_eq!(TypeRef::of::<Marker>(), TypeRef::of::<Marker>());
        assert_ne!(TypeRef::of::<Marker>(), TypeRef::of::<String>());
    }

    #[test]
    fn test_from_json_scalars_only() {
        assert_eq!(
            PropertyValue::from_json(&serde_json::json!("mem:db")).unwrap(),
            PropertyValue::Str("mem:db".into())
        );
        assert_eq!(
            PropertyValue::from_json(&serde_json::json!(42)).unwrap(),
            PropertyValue::Int(42)
        );
        assert!(PropertyValue::from_json(&serde_json::json!([1, 2])).is_err());
        assert!(PropertyValue::from_json(&serde_json::json!(1.5)).is_err());
    }

    #[test]
    fn test_properties_round_trip() {
        let props = Properties::new()
            .with(CONNECTION_URL, "mem:db")
            .with(FACTORY_POOL, true);

        let json = serde_json::to_string(&props).unwrap();
        let back: Properties = serde_json::from_str(&json).unwrap();
        assert_eq!(back, props);
    }
}
