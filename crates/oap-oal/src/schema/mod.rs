//! Source schema registry
//!
//! Catalog of the scopes events can belong to, their fields and the
//! decorators that may rewrite an event before extraction. The registry is
//! an explicit object handed to the compiler; nothing is discovered
//! implicitly.

mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use oap_common::{Error, Result};

use crate::source::SourceEvent;

pub use builtin::{default_registry, register_builtin_scopes};

// ============================================================================
// Fields
// ============================================================================

/// Type of a source field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FieldType {
    Int,
    Long,
    Double,
    Bool,
    String,
    Enum { name: String, constants: Vec<String> },
    StringList,
    Map,
    Struct(Vec<Arc<SourceField>>),
}

impl FieldType {
    /// Enum type from its constant names
    pub fn enumeration(name: &str, constants: &[&str]) -> Self {
        Self::Enum {
            name: name.to_string(),
            constants: constants.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Long | Self::Double)
    }

    /// Field of a nested struct
    pub fn nested_field(&self, name: &str) -> Option<&Arc<SourceField>> {
        match self {
            Self::Struct(fields) => fields.iter().find(|f| f.field_name == name),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int => f.write_str("int"),
            Self::Long => f.write_str("long"),
            Self::Double => f.write_str("double"),
            Self::Bool => f.write_str("bool"),
            Self::String => f.write_str("string"),
            Self::Enum { name, .. } => write!(f, "enum {name}"),
            Self::StringList => f.write_str("list<string>"),
            Self::Map => f.write_str("map<string, string>"),
            Self::Struct(_) => f.write_str("struct"),
        }
    }
}

/// A field of a scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceField {
    pub field_name: String,
    pub column_name: String,
    pub field_type: FieldType,
    /// Part of the unit identity
    pub is_id: bool,
    /// Copied into every metric unit of the scope
    pub entity: bool,
    /// Position in the storage sharding key, if any
    pub sharding_key: Option<u8>,
}

impl SourceField {
    /// Plain attribute, column named after the field in snake case
    pub fn new(field_name: &str, field_type: FieldType) -> Self {
        Self {
            field_name: field_name.to_string(),
            column_name: snake_case(field_name),
            field_type,
            is_id: false,
            entity: false,
            sharding_key: None,
        }
    }

    #[must_use]
    pub fn column(mut self, column_name: &str) -> Self {
        self.column_name = column_name.to_string();
        self
    }

    /// Mark as an identity field (implies entity)
    #[must_use]
    pub fn id(mut self) -> Self {
        self.is_id = true;
        self.entity = true;
        self
    }

    #[must_use]
    pub fn entity(mut self) -> Self {
        self.entity = true;
        self
    }

    #[must_use]
    pub fn sharding_key(mut self, index: u8) -> Self {
        self.sharding_key = Some(index);
        self
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.field_type, FieldType::Struct(_))
    }

    pub fn is_map(&self) -> bool {
        matches!(self.field_type, FieldType::Map)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self.field_type, FieldType::Bool)
    }
}

// ============================================================================
// Scopes
// ============================================================================

/// A registered event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScopeDefinition {
    pub id: u32,
    pub name: String,
    /// Catalog the scope belongs to, e.g. `SERVICE`
    pub catalog: Option<String>,
    pub fields: Vec<Arc<SourceField>>,
}

impl ScopeDefinition {
    pub fn new(id: u32, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            catalog: None,
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn catalog(mut self, catalog: &str) -> Self {
        self.catalog = Some(catalog.to_string());
        self
    }

    #[must_use]
    pub fn field(mut self, field: SourceField) -> Self {
        self.fields.push(Arc::new(field));
        self
    }

    /// Look up a top level field
    pub fn get(&self, name: &str) -> Option<&Arc<SourceField>> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    /// Fields copied into every metric unit, in declaration order
    pub fn entity_fields(&self) -> impl Iterator<Item = &Arc<SourceField>> {
        self.fields.iter().filter(|f| f.entity)
    }
}

// ============================================================================
// Decorators
// ============================================================================

/// Post-processes an event before a metric extracts values from it
pub trait SourceDecorator: Send + Sync {
    fn name(&self) -> &str;

    fn decorate(&self, event: &mut SourceEvent);
}

/// Fills fields that are absent from the event with fixed values
pub struct DefaultFieldsDecorator {
    name: String,
    defaults: BTreeMap<String, oap_common::Value>,
}

impl DefaultFieldsDecorator {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            defaults: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn default_value(mut self, field: &str, value: impl Into<oap_common::Value>) -> Self {
        self.defaults.insert(field.to_string(), value.into());
        self
    }
}

impl SourceDecorator for DefaultFieldsDecorator {
    fn name(&self) -> &str {
        &self.name
    }

    fn decorate(&self, event: &mut SourceEvent) {
        for (field, value) in &self.defaults {
            let missing = event.get(field).map_or(true, oap_common::Value::is_null);
            if missing {
                event.set(field.clone(), value.clone());
            }
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registry of scopes and decorators
#[derive(Default)]
pub struct SchemaRegistry {
    scopes: BTreeMap<String, Arc<ScopeDefinition>>,
    decorators: BTreeMap<String, Arc<dyn SourceDecorator>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scope. Names and ids must be unique.
    pub fn register_scope(&mut self, scope: ScopeDefinition) -> Result<()> {
        if self.scopes.contains_key(&scope.name) {
            return Err(Error::Config(format!("scope {} is already registered", scope.name)));
        }
        if let Some(existing) = self.scopes.values().find(|s| s.id == scope.id) {
            return Err(Error::Config(format!(
                "scope id {} of {} is already used by {}",
                scope.id, scope.name, existing.name
            )));
        }
        if scope.fields.iter().all(|f| !f.is_id) {
            return Err(Error::Config(format!("scope {} declares no id field", scope.name)));
        }
        if let Some(field) = scope.fields.iter().find(|f| {
            f.is_id && matches!(f.field_type, FieldType::StringList | FieldType::Map | FieldType::Struct(_))
        }) {
            return Err(Error::Config(format!(
                "id field {}.{} must be a scalar",
                scope.name, field.field_name
            )));
        }
        self.scopes.insert(scope.name.clone(), Arc::new(scope));
        Ok(())
    }

    pub fn register_decorator(&mut self, decorator: Arc<dyn SourceDecorator>) -> Result<()> {
        let name = decorator.name().to_string();
        if self.decorators.contains_key(&name) {
            return Err(Error::Config(format!("decorator {name} is already registered")));
        }
        self.decorators.insert(name, decorator);
        Ok(())
    }

    pub fn scope(&self, name: &str) -> Option<&Arc<ScopeDefinition>> {
        self.scopes.get(name)
    }

    pub fn scope_by_id(&self, id: u32) -> Option<&Arc<ScopeDefinition>> {
        self.scopes.values().find(|s| s.id == id)
    }

    pub fn decorator(&self, name: &str) -> Option<&Arc<dyn SourceDecorator>> {
        self.decorators.get(name)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &Arc<ScopeDefinition>> {
        self.scopes.values()
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .field("decorators", &self.decorators.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// `serviceInstanceName` -> `service_instance_name`
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use oap_common::{TimeBucket, Value};

    fn scope() -> ScopeDefinition {
        ScopeDefinition::new(100, "Canary")
            .field(SourceField::new("entityId", FieldType::String).id())
            .field(SourceField::new("latency", FieldType::Int))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        registry.register_scope(scope()).unwrap();

        let canary = registry.scope("Canary").unwrap();
        assert_eq!(canary.get("latency").unwrap().column_name, "latency");
        assert_eq!(canary.get("entityId").unwrap().column_name, "entity_id");
        assert_eq!(canary.entity_fields().count(), 1);
        assert!(registry.scope_by_id(100).is_some());
    }

    #[test]
    fn test_rejects_duplicates() {
        let mut registry = SchemaRegistry::new();
        registry.register_scope(scope()).unwrap();
        assert!(registry.register_scope(scope()).is_err());

        let same_id = ScopeDefinition::new(100, "Other")
            .field(SourceField::new("entityId", FieldType::String).id());
        assert!(registry.register_scope(same_id).is_err());
    }

    #[test]
    fn test_requires_id_field() {
        let mut registry = SchemaRegistry::new();
        let scope = ScopeDefinition::new(7, "NoId").field(SourceField::new("a", FieldType::Int));
        assert!(registry.register_scope(scope).is_err());

        let scope = ScopeDefinition::new(8, "MapId").field(SourceField::new("tags", FieldType::Map).id());
        let err = registry.register_scope(scope).unwrap_err();
        assert!(err.to_string().contains("MapId.tags"));

        let scope = ScopeDefinition::new(9, "DoubleId").field(SourceField::new("ratio", FieldType::Double).id());
        assert!(registry.register_scope(scope).is_ok());
    }

    #[test]
    fn test_default_fields_decorator() {
        let decorator = DefaultFieldsDecorator::new("Defaults").default_value("layer", "GENERAL");
        let bucket = TimeBucket::minute(202_401_011_230).unwrap();

        let mut event = SourceEvent::new("Service", bucket);
        decorator.decorate(&mut event);
        assert_eq!(event.get("layer"), Some(&Value::from("GENERAL")));

        let mut event = SourceEvent::new("Service", bucket).with("layer", "MESH");
        decorator.decorate(&mut event);
        assert_eq!(event.get("layer"), Some(&Value::from("MESH")));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("serviceInstanceName"), "service_instance_name");
        assert_eq!(snake_case("latency"), "latency");
    }
}
