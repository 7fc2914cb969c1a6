//! Resource - Declared units of desired infrastructure state

use std::collections::BTreeMap;

use crate::value::{Reference, Value};

/// Desired state declared for a single resource
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Identifier unique within the declaring scope (e.g., "bucket")
    pub logical_id: String,
    /// Resource type (e.g., "aws_s3_bucket")
    pub resource_type: String,
    pub attributes: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
            resource_type: resource_type.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes<I, K>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.attributes
            .extend(attributes.into_iter().map(|(k, v)| (k.into(), v)));
        self
    }

    /// References made by this resource, paired with the attribute using them
    pub fn references(&self) -> Vec<(&str, &Reference)> {
        self.attributes
            .iter()
            .flat_map(|(name, value)| {
                value
                    .references()
                    .into_iter()
                    .map(move |r| (name.as_str(), r))
            })
            .collect()
    }
}

/// Logical IDs and scope names: ASCII alphanumerics, '-' and '_'
pub fn is_valid_logical_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_paired_with_attribute_names() {
        let resource = Resource::new("aws_s3_bucket_policy", "policy")
            .with_attribute("bucket", Value::reference("site/bucket", "bucket"))
            .with_attribute(
                "policy",
                Value::json_encode(Value::map([
                    ("a", Value::reference("site/bucket", "arn")),
                    ("b", Value::reference("site/distribution", "arn")),
                ])),
            )
            .with_attribute("comment", "static");

        let refs: Vec<(&str, String)> = resource
            .references()
            .into_iter()
            .map(|(attr, r)| (attr, r.to_string()))
            .collect();

        assert_eq!(
            refs,
            vec![
                ("bucket", "site/bucket.bucket".to_string()),
                ("policy", "site/bucket.arn".to_string()),
                ("policy", "site/distribution.arn".to_string()),
            ]
        );
    }

    #[test]
    fn logical_id_validation() {
        assert!(is_valid_logical_id("website-s3"));
        assert!(is_valid_logical_id("bucket_policy2"));
        assert!(!is_valid_logical_id(""));
        assert!(!is_valid_logical_id("a/b"));
        assert!(!is_valid_logical_id("with space"));
    }
}
