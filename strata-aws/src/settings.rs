//! Validation of the `aws` provider block and the `s3` backend block
//!
//! Both blocks are plain attribute maps on the construct tree. They are
//! checked here before being attached so a bad region or bucket name fails
//! at declaration time instead of during apply.

use std::collections::BTreeMap;

use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, TypeError, types};
use strata_core::value::Value;
use thiserror::Error;

use crate::schemas::types as aws_types;

pub const PROVIDER_NAME: &str = "aws";
pub const BACKEND_TYPE: &str = "s3";

#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid {block} settings: {}", format_errors(.errors))]
pub struct SettingsError {
    pub block: String,
    pub errors: Vec<TypeError>,
}

fn format_errors(errors: &[TypeError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Settings accepted in the `aws` provider block
///
/// Credentials are not accepted: they never enter the document.
pub fn provider_schema() -> ResourceSchema {
    ResourceSchema::new(PROVIDER_NAME)
        .attribute(AttributeSchema::new("region", aws_types::aws_region()).required())
        .attribute(AttributeSchema::new("profile", types::non_empty_string()))
        .attribute(AttributeSchema::new("default_tags", aws_types::tags()))
}

/// Settings accepted in the `s3` backend block
pub fn s3_backend_schema() -> ResourceSchema {
    ResourceSchema::new(BACKEND_TYPE)
        .attribute(AttributeSchema::new("bucket", aws_types::s3_bucket_name()).required())
        .attribute(AttributeSchema::new("key", types::non_empty_string()).required())
        .attribute(AttributeSchema::new("region", aws_types::aws_region()))
        .attribute(AttributeSchema::new("encrypt", AttributeType::Bool))
}

pub fn validate_provider(settings: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
    validate("provider 'aws'", &provider_schema(), settings)
}

pub fn validate_backend(settings: &BTreeMap<String, Value>) -> Result<(), SettingsError> {
    validate("backend 's3'", &s3_backend_schema(), settings)
}

fn validate(
    block: &str,
    schema: &ResourceSchema,
    settings: &BTreeMap<String, Value>,
) -> Result<(), SettingsError> {
    let mut errors = schema.validate(settings).err().unwrap_or_default();
    for name in settings.keys() {
        if !schema.attributes.contains_key(name) {
            errors.push(TypeError::ValidationFailed {
                message: format!("Unknown setting '{}'", name),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(SettingsError {
            block: block.to_string(),
            errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(entries: Vec<(&str, Value)>) -> BTreeMap<String, Value> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn provider_requires_region() {
        assert!(validate_provider(&settings(vec![("region", Value::string("us-east-1"))])).is_ok());

        let err = validate_provider(&BTreeMap::new()).unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn provider_rejects_credentials() {
        let err = validate_provider(&settings(vec![
            ("region", Value::string("us-east-1")),
            ("secret_key", Value::string("hunter2")),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("Unknown setting 'secret_key'"));
    }

    #[test]
    fn backend_settings() {
        let valid = settings(vec![
            ("bucket", Value::string("site-state")),
            ("key", Value::string("terraform.tfstate")),
            ("encrypt", Value::Bool(true)),
        ]);
        assert!(validate_backend(&valid).is_ok());

        let invalid = settings(vec![
            ("bucket", Value::string("Site_State")),
            ("key", Value::string("")),
        ]);
        let err = validate_backend(&invalid).unwrap_err();
        assert_eq!(err.errors.len(), 2);
        assert_eq!(err.block, "backend 's3'");
    }
}
