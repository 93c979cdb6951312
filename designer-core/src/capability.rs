//! Entity capabilities used to validate bindings.
//!
//! A [`CapabilityResolver`] answers what a home-automation entity exposes:
//! the kind of its state, its readable attributes, and the services of its
//! domain. [`StaticCapabilities`] is an in-memory table; the server provides
//! a REST-backed resolver.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResolveError;

/// Kind of a readable entity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Free text.
    Text,
    /// Numeric value.
    Number,
    /// On/off or true/false.
    Boolean,
    /// Lists, objects and other structured values.
    Other,
}

impl ValueKind {
    /// Classify an attribute value.
    #[must_use]
    pub fn of_json(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::Text,
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Other,
        }
    }
}

/// Domains whose state is on/off.
const BOOLEAN_DOMAINS: &[&str] = &[
    "binary_sensor",
    "fan",
    "input_boolean",
    "light",
    "lock",
    "siren",
    "switch",
];

/// Classify an entity's state string by its domain and content.
#[must_use]
pub fn classify_state(domain: &str, state: &str) -> ValueKind {
    if BOOLEAN_DOMAINS.contains(&domain) {
        ValueKind::Boolean
    } else if state.parse::<f64>().is_ok_and(f64::is_finite) {
        ValueKind::Number
    } else {
        ValueKind::Text
    }
}

/// Everything an entity exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Entity id.
    pub entity_id: String,
    /// Domain prefix of the entity id.
    pub domain: String,
    /// Kind of the entity state.
    pub state: ValueKind,
    /// Readable attributes and their kinds.
    #[serde(default)]
    pub attributes: BTreeMap<String, ValueKind>,
    /// Invokable services of the domain.
    #[serde(default)]
    pub services: BTreeSet<String>,
}

impl CapabilitySet {
    /// Start a capability set; the domain is taken from the entity id.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, state: ValueKind) -> Self {
        let entity_id = entity_id.into();
        let domain = entity_domain(&entity_id).unwrap_or_default().to_string();
        Self {
            entity_id,
            domain,
            state,
            attributes: BTreeMap::new(),
            services: BTreeSet::new(),
        }
    }

    /// Add a readable attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.attributes.insert(name.into(), kind);
        self
    }

    /// Add an invokable service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.services.insert(service.into());
        self
    }

    /// Kind of the value read by a binding: an attribute, or the state.
    #[must_use]
    pub fn readable(&self, attribute: Option<&str>) -> Option<ValueKind> {
        match attribute {
            Some(name) => self.attributes.get(name).copied(),
            None => Some(self.state),
        }
    }
}

/// Domain prefix of an entity id (`light` for `light.kitchen`).
#[must_use]
pub fn entity_domain(entity_id: &str) -> Option<&str> {
    match entity_id.split_once('.') {
        Some((domain, object)) if !domain.is_empty() && !object.is_empty() => Some(domain),
        _ => None,
    }
}

/// Looks up entity capabilities.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    /// Resolve one entity.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::EntityNotFound`] for unknown entities and
    /// [`ResolveError::Unavailable`] when the platform cannot be reached.
    async fn resolve(&self, entity_id: &str) -> Result<CapabilitySet, ResolveError>;
}

#[async_trait]
impl<T: CapabilityResolver + ?Sized> CapabilityResolver for Arc<T> {
    async fn resolve(&self, entity_id: &str) -> Result<CapabilitySet, ResolveError> {
        (**self).resolve(entity_id).await
    }
}

/// In-memory capability table.
///
/// Marking the table offline makes every lookup fail with
/// [`ResolveError::Unavailable`].
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    entities: Arc<RwLock<HashMap<String, CapabilitySet>>>,
    offline: Arc<RwLock<bool>>,
}

impl StaticCapabilities {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity.
    pub fn insert(&self, caps: CapabilitySet) {
        let mut entities = self
            .entities
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entities.insert(caps.entity_id.clone(), caps);
    }

    /// Builder form of [`Self::insert`].
    #[must_use]
    pub fn with(self, caps: CapabilitySet) -> Self {
        self.insert(caps);
        self
    }

    /// Simulate an upstream outage.
    pub fn set_offline(&self, offline: bool) {
        *self
            .offline
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = offline;
    }
}

#[async_trait]
impl CapabilityResolver for StaticCapabilities {
    async fn resolve(&self, entity_id: &str) -> Result<CapabilitySet, ResolveError> {
        if *self
            .offline
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
        {
            return Err(ResolveError::Unavailable("static table offline".into()));
        }
        let entities = self
            .entities
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        entities
            .get(entity_id)
            .cloned()
            .ok_or_else(|| ResolveError::EntityNotFound(entity_id.to_string()))
    }
}

/// Resolver used when no platform is configured: every lookup is deferred.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredResolver;

#[async_trait]
impl CapabilityResolver for UnconfiguredResolver {
    async fn resolve(&self, _entity_id: &str) -> Result<CapabilitySet, ResolveError> {
        Err(ResolveError::Unavailable(
            "no home-automation platform configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_domain() {
        assert_eq!(entity_domain("light.kitchen"), Some("light"));
        assert_eq!(entity_domain("light."), None);
        assert_eq!(entity_domain("nodot"), None);
        assert_eq!(entity_domain(".x"), None);
    }

    #[test]
    fn test_classify_state() {
        assert_eq!(classify_state("light", "on"), ValueKind::Boolean);
        assert_eq!(classify_state("sensor", "21.5"), ValueKind::Number);
        assert_eq!(classify_state("sensor", "unavailable"), ValueKind::Text);
        assert_eq!(classify_state("sensor", "NaN"), ValueKind::Text);
    }

    #[test]
    fn test_value_kind_of_json() {
        assert_eq!(ValueKind::of_json(&json!(1.5)), ValueKind::Number);
        assert_eq!(ValueKind::of_json(&json!("x")), ValueKind::Text);
        assert_eq!(ValueKind::of_json(&json!(true)), ValueKind::Boolean);
        assert_eq!(ValueKind::of_json(&json!([1])), ValueKind::Other);
    }

    #[test]
    fn test_readable_prefers_attribute() {
        let caps = CapabilitySet::new("light.kitchen", ValueKind::Boolean)
            .with_attribute("brightness", ValueKind::Number);
        assert_eq!(caps.domain, "light");
        assert_eq!(caps.readable(None), Some(ValueKind::Boolean));
        assert_eq!(caps.readable(Some("brightness")), Some(ValueKind::Number));
        assert_eq!(caps.readable(Some("missing")), None);
    }

    #[tokio::test]
    async fn test_static_resolver_lookup_and_outage() {
        let table = StaticCapabilities::new()
            .with(CapabilitySet::new("switch.pump", ValueKind::Boolean).with_service("toggle"));

        let caps = table.resolve("switch.pump").await.expect("resolve");
        assert!(caps.services.contains("toggle"));

        let missing = table.resolve("switch.none").await;
        assert_eq!(missing, Err(ResolveError::EntityNotFound("switch.none".into())));

        table.set_offline(true);
        let down = table.resolve("switch.pump").await;
        assert!(matches!(down, Err(ResolveError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_resolver_defers() {
        let result = UnconfiguredResolver.resolve("light.kitchen").await;
        assert!(result.is_err_and(|e| e.is_retryable()));
    }
}
