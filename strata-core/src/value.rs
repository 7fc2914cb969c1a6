//! Value - Literal and deferred attribute values
//!
//! An attribute is either a literal or a reference to an attribute of another
//! resource that does not exist yet. References can be composed (string
//! templates, JSON encoding) and are only evaluated by [`resolve`], once the
//! referenced outputs are known.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::json;
use thiserror::Error;

/// Reference to an attribute of another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Reference {
    /// Fully qualified path of the referenced resource (e.g., "site/bucket")
    pub target: String,
    /// Attribute name on the referenced resource (e.g., "arn")
    pub attribute: String,
}

impl Reference {
    pub fn new(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            attribute: attribute.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Deferred reference to another resource's attribute
    Ref(Reference),
    /// String template; parts are stringified and joined at resolution time
    Concat(Vec<Value>),
    /// Nested value serialized to a JSON string at resolution time
    JsonEncode(Box<Value>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn reference(target: impl Into<String>, attribute: impl Into<String>) -> Self {
        Value::Ref(Reference::new(target, attribute))
    }

    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn concat<I, V>(parts: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Concat(parts.into_iter().map(Into::into).collect())
    }

    pub fn json_encode(value: impl Into<Value>) -> Self {
        Value::JsonEncode(Box::new(value.into()))
    }

    /// Returns true if resolving this value needs outputs of other resources
    pub fn is_deferred(&self) -> bool {
        !self.references().is_empty()
    }

    /// All references contained in this value, in traversal order
    pub fn references(&self) -> Vec<&Reference> {
        let mut refs = Vec::new();
        collect_references(self, &mut refs);
        refs
    }

    /// Render the value for the configuration document.
    ///
    /// Literals become plain JSON. Deferred values stay symbolic:
    /// `{"ref": path, "attribute": name}`, `{"concat": [...]}` and
    /// `{"json_encode": ...}`.
    pub fn to_symbolic_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) => json!(s),
            Value::Int(n) => json!(n),
            Value::Bool(b) => json!(b),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_symbolic_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_symbolic_json()))
                    .collect(),
            ),
            Value::Ref(r) => json!({ "ref": r.target, "attribute": r.attribute }),
            Value::Concat(parts) => {
                json!({ "concat": parts.iter().map(Value::to_symbolic_json).collect::<Vec<_>>() })
            }
            Value::JsonEncode(inner) => json!({ "json_encode": inner.to_symbolic_json() }),
        }
    }

    pub(crate) fn type_name(&self) -> String {
        match self {
            Value::String(_) => "String".to_string(),
            Value::Int(_) => "Int".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::List(_) => "List".to_string(),
            Value::Map(_) => "Map".to_string(),
            Value::Ref(r) => format!("Ref({})", r),
            Value::Concat(_) => "Concat".to_string(),
            Value::JsonEncode(_) => "JsonEncode".to_string(),
        }
    }
}

fn collect_references<'a>(value: &'a Value, refs: &mut Vec<&'a Reference>) {
    match value {
        Value::Ref(r) => refs.push(r),
        Value::List(items) | Value::Concat(items) => {
            for item in items {
                collect_references(item, refs);
            }
        }
        Value::Map(map) => {
            for v in map.values() {
                collect_references(v, refs);
            }
        }
        Value::JsonEncode(inner) => collect_references(inner, refs),
        Value::String(_) | Value::Int(_) | Value::Bool(_) => {}
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_symbolic_json().serialize(serializer)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::String(s.clone())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Value::Ref(r)
    }
}

/// Outputs known after apply: resource path -> attribute name -> value
pub type Outputs = HashMap<String, HashMap<String, serde_json::Value>>;

/// Errors raised while resolving deferred values
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    /// The referenced resource has no recorded output for the attribute.
    /// Cannot happen for a document walked in synthesis order.
    #[error("Unresolved reference to {0}")]
    UnresolvedReference(Reference),

    #[error("Cannot concatenate a {kind} value into a string")]
    NotConcatenable { kind: &'static str },

    #[error("Failed to encode value as JSON: {0}")]
    Encode(String),
}

/// Resolve a value against known outputs
pub fn resolve(value: &Value, outputs: &Outputs) -> Result<serde_json::Value, ResolveError> {
    match value {
        Value::String(s) => Ok(json!(s)),
        Value::Int(n) => Ok(json!(n)),
        Value::Bool(b) => Ok(json!(b)),
        Value::List(items) => items
            .iter()
            .map(|item| resolve(item, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(serde_json::Value::Array),
        Value::Map(map) => {
            let mut object = serde_json::Map::new();
            for (k, v) in map {
                object.insert(k.clone(), resolve(v, outputs)?);
            }
            Ok(serde_json::Value::Object(object))
        }
        Value::Ref(r) => outputs
            .get(&r.target)
            .and_then(|attrs| attrs.get(&r.attribute))
            .cloned()
            .ok_or_else(|| ResolveError::UnresolvedReference(r.clone())),
        Value::Concat(parts) => {
            let mut joined = String::new();
            for part in parts {
                match resolve(part, outputs)? {
                    serde_json::Value::String(s) => joined.push_str(&s),
                    serde_json::Value::Number(n) => joined.push_str(&n.to_string()),
                    serde_json::Value::Bool(b) => joined.push_str(&b.to_string()),
                    serde_json::Value::Null => {
                        return Err(ResolveError::NotConcatenable { kind: "null" });
                    }
                    serde_json::Value::Array(_) => {
                        return Err(ResolveError::NotConcatenable { kind: "list" });
                    }
                    serde_json::Value::Object(_) => {
                        return Err(ResolveError::NotConcatenable { kind: "map" });
                    }
                }
            }
            Ok(serde_json::Value::String(joined))
        }
        Value::JsonEncode(inner) => {
            let resolved = resolve(inner, outputs)?;
            serde_json::to_string(&resolved)
                .map(serde_json::Value::String)
                .map_err(|e| ResolveError::Encode(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> Outputs {
        let mut outputs = Outputs::new();
        outputs.insert(
            "site/bucket".to_string(),
            [
                ("arn".to_string(), json!("arn:aws:s3:::example.com")),
                ("port".to_string(), json!(443)),
            ]
            .into_iter()
            .collect(),
        );
        outputs
    }

    #[test]
    fn literal_resolves_to_itself() {
        let value = Value::map([("enabled", Value::Bool(true)), ("name", "a".into())]);
        assert_eq!(
            resolve(&value, &Outputs::new()).unwrap(),
            json!({ "enabled": true, "name": "a" })
        );
    }

    #[test]
    fn reference_resolves_from_outputs() {
        let value = Value::reference("site/bucket", "arn");
        assert_eq!(
            resolve(&value, &outputs()).unwrap(),
            json!("arn:aws:s3:::example.com")
        );
    }

    #[test]
    fn missing_output_is_unresolved() {
        let value = Value::reference("site/distribution", "arn");
        let err = resolve(&value, &outputs()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnresolvedReference(Reference::new("site/distribution", "arn"))
        );
    }

    #[test]
    fn concat_joins_resolved_parts() {
        let value = Value::concat([
            Value::reference("site/bucket", "arn"),
            "/*".into(),
            ":".into(),
            Value::reference("site/bucket", "port"),
        ]);
        assert_eq!(
            resolve(&value, &outputs()).unwrap(),
            json!("arn:aws:s3:::example.com/*:443")
        );
    }

    #[test]
    fn concat_rejects_structured_parts() {
        let value = Value::concat([Value::list(["a", "b"])]);
        assert_eq!(
            resolve(&value, &Outputs::new()).unwrap_err(),
            ResolveError::NotConcatenable { kind: "list" }
        );
    }

    #[test]
    fn json_encode_resolves_nested_references() {
        let value = Value::json_encode(Value::map([(
            "Resource",
            Value::concat([Value::reference("site/bucket", "arn"), "/*".into()]),
        )]));
        let resolved = resolve(&value, &outputs()).unwrap();
        assert_eq!(
            resolved,
            json!(r#"{"Resource":"arn:aws:s3:::example.com/*"}"#)
        );
    }

    #[test]
    fn references_are_collected_recursively() {
        let value = Value::json_encode(Value::map([
            ("a", Value::reference("site/bucket", "arn")),
            (
                "b",
                Value::list([Value::concat([Value::reference("site/oac", "id")])]),
            ),
        ]));
        let refs: Vec<String> = value.references().iter().map(|r| r.to_string()).collect();
        assert_eq!(refs, vec!["site/bucket.arn", "site/oac.id"]);
        assert!(value.is_deferred());
        assert!(!Value::string("literal").is_deferred());
    }

    #[test]
    fn symbolic_json_keeps_references_unresolved() {
        let value = Value::map([
            ("origin", Value::reference("site/bucket", "domain_name")),
            ("tag", Value::concat(["env-", "prod"])),
        ]);
        assert_eq!(
            value.to_symbolic_json(),
            json!({
                "origin": { "ref": "site/bucket", "attribute": "domain_name" },
                "tag": { "concat": ["env-", "prod"] }
            })
        );
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            value.to_symbolic_json()
        );
    }
}
