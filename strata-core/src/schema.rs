//! Schema - Define type schemas for resources
//!
//! A schema lists the input attributes a resource type accepts (with their
//! types and whether they are required) and the output attributes other
//! resources may reference once it has been applied.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::value::Value;

/// Attribute type
#[derive(Debug, Clone)]
pub enum AttributeType {
    /// String
    String,
    /// Integer
    Int,
    /// Boolean
    Bool,
    /// Enum (list of allowed values)
    Enum(Vec<String>),
    /// Custom type (with validation function)
    Custom {
        name: String,
        base: Box<AttributeType>,
        validate: fn(&Value) -> Result<(), String>,
    },
    /// List
    List(Box<AttributeType>),
    /// Map
    Map(Box<AttributeType>),
    /// Nested object with its own attribute schemas
    Object(BTreeMap<String, AttributeSchema>),
}

impl AttributeType {
    /// Check if a value conforms to this type
    ///
    /// References are accepted for every type: their value only exists after
    /// apply. Composed strings are accepted wherever a string is.
    pub fn validate(&self, value: &Value) -> Result<(), TypeError> {
        match (self, value) {
            (_, Value::Ref(_)) => Ok(()),
            (AttributeType::String, Value::String(_) | Value::Concat(_) | Value::JsonEncode(_)) => {
                Ok(())
            }
            (AttributeType::Int, Value::Int(_)) => Ok(()),
            (AttributeType::Bool, Value::Bool(_)) => Ok(()),

            (AttributeType::Enum(variants), Value::String(s)) => {
                if variants.iter().any(|v| v == s) {
                    Ok(())
                } else {
                    Err(TypeError::InvalidEnumVariant {
                        value: s.clone(),
                        expected: variants.clone(),
                    })
                }
            }

            (AttributeType::Custom { base, .. }, v) if v.is_deferred() => base.validate(v),
            (AttributeType::Custom { validate, .. }, v) => {
                validate(v).map_err(|message| TypeError::ValidationFailed { message })
            }

            (AttributeType::List(inner), Value::List(items)) => {
                for (i, item) in items.iter().enumerate() {
                    inner.validate(item).map_err(|e| TypeError::ListItemError {
                        index: i,
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Map(inner), Value::Map(map)) => {
                for (k, v) in map {
                    inner.validate(v).map_err(|e| TypeError::MapValueError {
                        key: k.clone(),
                        inner: Box::new(e),
                    })?;
                }
                Ok(())
            }

            (AttributeType::Object(fields), Value::Map(map)) => {
                for field in fields.values() {
                    if field.required && !map.contains_key(&field.name) {
                        return Err(TypeError::MissingRequired {
                            name: field.name.clone(),
                        });
                    }
                }
                for (k, v) in map {
                    if let Some(field) = fields.get(k) {
                        field
                            .attr_type
                            .validate(v)
                            .map_err(|e| TypeError::MapValueError {
                                key: k.clone(),
                                inner: Box::new(e),
                            })?;
                    }
                }
                Ok(())
            }

            _ => Err(TypeError::TypeMismatch {
                expected: self.type_name(),
                got: value.type_name(),
            }),
        }
    }

    fn type_name(&self) -> String {
        match self {
            AttributeType::String => "String".to_string(),
            AttributeType::Int => "Int".to_string(),
            AttributeType::Bool => "Bool".to_string(),
            AttributeType::Enum(variants) => format!("Enum({})", variants.join(" | ")),
            AttributeType::Custom { name, .. } => name.clone(),
            AttributeType::List(inner) => format!("List<{}>", inner.type_name()),
            AttributeType::Map(inner) => format!("Map<{}>", inner.type_name()),
            AttributeType::Object(_) => "Object".to_string(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Type error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TypeError {
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: String, got: String },

    #[error("Invalid enum variant '{value}', expected one of: {}", .expected.join(", "))]
    InvalidEnumVariant {
        value: String,
        expected: Vec<String>,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Required attribute '{name}' is missing")]
    MissingRequired { name: String },

    #[error("Attribute '{name}': {inner}")]
    AttributeError { name: String, inner: Box<TypeError> },

    #[error("List item at index {index}: {inner}")]
    ListItemError { index: usize, inner: Box<TypeError> },

    #[error("Map value for key '{key}': {inner}")]
    MapValueError { key: String, inner: Box<TypeError> },
}

/// Attribute schema
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: BTreeMap<String, AttributeSchema>,
    /// Attributes only known after apply (e.g., "arn", "domain_name")
    pub outputs: BTreeSet<String>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
            outputs: BTreeSet::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.insert(schema.name.clone(), schema);
        self
    }

    pub fn output(mut self, name: impl Into<String>) -> Self {
        self.outputs.insert(name.into());
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Whether other resources may reference `name` on this type
    pub fn is_referenceable(&self, name: &str) -> bool {
        self.outputs.contains(name) || self.attributes.contains_key(name)
    }

    /// Validate resource attributes
    pub fn validate(&self, attributes: &BTreeMap<String, Value>) -> Result<(), Vec<TypeError>> {
        let mut errors = Vec::new();

        for (name, schema) in &self.attributes {
            if schema.required && !attributes.contains_key(name) {
                errors.push(TypeError::MissingRequired { name: name.clone() });
            }
        }

        for (name, value) in attributes {
            if let Some(schema) = self.attributes.get(name)
                && let Err(e) = schema.attr_type.validate(value)
            {
                errors.push(TypeError::AttributeError {
                    name: name.clone(),
                    inner: Box::new(e),
                });
            }
            // Unknown attributes pass through to the provider untouched
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Schemas by resource type
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ResourceSchema) {
        self.schemas.insert(schema.resource_type.clone(), schema);
    }

    pub fn get(&self, resource_type: &str) -> Option<&ResourceSchema> {
        self.schemas.get(resource_type)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Schemas ordered by resource type
    pub fn schemas(&self) -> Vec<&ResourceSchema> {
        let mut schemas: Vec<_> = self.schemas.values().collect();
        schemas.sort_by(|a, b| a.resource_type.cmp(&b.resource_type));
        schemas
    }
}

impl FromIterator<ResourceSchema> for SchemaRegistry {
    fn from_iter<I: IntoIterator<Item = ResourceSchema>>(iter: I) -> Self {
        let mut registry = Self::new();
        for schema in iter {
            registry.register(schema);
        }
        registry
    }
}

/// Helper functions for common types
pub mod types {
    use super::*;

    /// Non-empty string
    pub fn non_empty_string() -> AttributeType {
        AttributeType::Custom {
            name: "NonEmptyString".to_string(),
            base: Box::new(AttributeType::String),
            validate: |value| match value {
                Value::String(s) if !s.trim().is_empty() => Ok(()),
                Value::String(_) => Err("Value must not be empty".to_string()),
                _ => Err("Expected string".to_string()),
            },
        }
    }

    /// Object built from a list of attribute schemas
    pub fn object(fields: impl IntoIterator<Item = AttributeSchema>) -> AttributeType {
        AttributeType::Object(
            fields
                .into_iter()
                .map(|field| (field.name.clone(), field))
                .collect(),
        )
    }

    /// List of strings
    pub fn string_list() -> AttributeType {
        AttributeType::List(Box::new(AttributeType::String))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_string_type() {
        let t = AttributeType::String;
        assert!(t.validate(&Value::string("hello")).is_ok());
        assert!(t.validate(&Value::concat(["a", "b"])).is_ok());
        assert!(t.validate(&Value::Int(42)).is_err());
    }

    #[test]
    fn references_match_any_type() {
        let r = Value::reference("site/bucket", "arn");
        assert!(AttributeType::Int.validate(&r).is_ok());
        assert!(AttributeType::Bool.validate(&r).is_ok());
        assert!(types::string_list().validate(&r).is_ok());
    }

    #[test]
    fn validate_enum_type() {
        let t = AttributeType::Enum(vec!["always".to_string(), "never".to_string()]);
        assert!(t.validate(&Value::string("always")).is_ok());
        assert!(t.validate(&Value::string("sometimes")).is_err());
    }

    #[test]
    fn custom_type_skips_validator_for_deferred_values() {
        let t = types::non_empty_string();
        assert!(t.validate(&Value::string("")).is_err());
        assert!(t.validate(&Value::string("x")).is_ok());
        assert!(
            t.validate(&Value::concat([Value::reference("a/b", "id")]))
                .is_ok()
        );
    }

    #[test]
    fn validate_object_type() {
        let t = types::object([
            AttributeSchema::new("index_document", AttributeType::String).required(),
            AttributeSchema::new("error_document", AttributeType::String),
        ]);
        assert!(
            t.validate(&Value::map([("index_document", "index.html")]))
                .is_ok()
        );
        assert_eq!(
            t.validate(&Value::map([("error_document", "index.html")])),
            Err(TypeError::MissingRequired {
                name: "index_document".to_string()
            })
        );
        assert!(
            t.validate(&Value::map([("index_document", Value::Int(1))]))
                .is_err()
        );
    }

    #[test]
    fn validate_resource_schema() {
        let schema = ResourceSchema::new("bucket")
            .attribute(AttributeSchema::new("bucket", AttributeType::String).required())
            .attribute(AttributeSchema::new("versioning", AttributeType::Bool))
            .output("arn");

        let attrs: BTreeMap<String, Value> = [
            ("bucket".to_string(), Value::string("example.com")),
            ("versioning".to_string(), Value::Bool(false)),
        ]
        .into_iter()
        .collect();

        assert!(schema.validate(&attrs).is_ok());
        assert!(schema.is_referenceable("arn"));
        assert!(schema.is_referenceable("bucket"));
        assert!(!schema.is_referenceable("domain_name"));
    }

    #[test]
    fn missing_required_attribute() {
        let schema = ResourceSchema::new("bucket")
            .attribute(AttributeSchema::new("bucket", AttributeType::String).required());

        let result = schema.validate(&BTreeMap::new());
        assert_eq!(
            result,
            Err(vec![TypeError::MissingRequired {
                name: "bucket".to_string()
            }])
        );
    }

    #[test]
    fn registry_lookup() {
        let registry: SchemaRegistry = [ResourceSchema::new("a"), ResourceSchema::new("b")]
            .into_iter()
            .collect();
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").is_some());
        assert!(registry.get("c").is_none());

        let types: Vec<_> = registry.schemas().iter().map(|s| s.resource_type.as_str()).collect();
        assert_eq!(types, vec!["a", "b"]);
    }
}
