//! CloudFront schema definitions

use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types as core_types};

use super::types;

pub const ORIGIN_ACCESS_CONTROL: &str = "aws_cloudfront_origin_access_control";
pub const DISTRIBUTION: &str = "aws_cloudfront_distribution";

fn enum_of(variants: &[&str]) -> AttributeType {
    AttributeType::Enum(variants.iter().map(|v| v.to_string()).collect())
}

/// Returns the schema for origin access controls
pub fn origin_access_control_schema() -> ResourceSchema {
    ResourceSchema::new(ORIGIN_ACCESS_CONTROL)
        .with_description("Lets CloudFront sign requests to a private origin")
        .attribute(AttributeSchema::new("name", core_types::non_empty_string()).required())
        .attribute(AttributeSchema::new("description", AttributeType::String))
        .attribute(
            AttributeSchema::new(
                "origin_access_control_origin_type",
                enum_of(&["s3", "mediastore", "mediapackagev2", "lambda"]),
            )
            .required(),
        )
        .attribute(
            AttributeSchema::new("signing_behavior", enum_of(&["always", "never", "no-override"]))
                .required(),
        )
        .attribute(AttributeSchema::new("signing_protocol", enum_of(&["sigv4"])).required())
        .output("id")
        .output("etag")
}

fn origin() -> AttributeType {
    core_types::object([
        AttributeSchema::new("domain_name", AttributeType::String).required(),
        AttributeSchema::new("origin_id", core_types::non_empty_string()).required(),
        AttributeSchema::new("origin_access_control_id", AttributeType::String),
        AttributeSchema::new("origin_path", AttributeType::String),
    ])
}

fn cache_behavior() -> AttributeType {
    let methods = || AttributeType::List(Box::new(types::http_method()));
    core_types::object([
        AttributeSchema::new("target_origin_id", core_types::non_empty_string()).required(),
        AttributeSchema::new("allowed_methods", methods()).required(),
        AttributeSchema::new("cached_methods", methods()).required(),
        AttributeSchema::new("compress", AttributeType::Bool),
        AttributeSchema::new(
            "viewer_protocol_policy",
            enum_of(&["allow-all", "https-only", "redirect-to-https"]),
        )
        .required(),
        AttributeSchema::new("cache_policy_id", AttributeType::String),
    ])
}

fn restrictions() -> AttributeType {
    core_types::object([AttributeSchema::new(
        "geo_restriction",
        core_types::object([
            AttributeSchema::new(
                "restriction_type",
                enum_of(&["none", "whitelist", "blacklist"]),
            )
            .required(),
            AttributeSchema::new("locations", core_types::string_list()),
        ]),
    )
    .required()])
}

fn viewer_certificate() -> AttributeType {
    core_types::object([
        AttributeSchema::new("acm_certificate_arn", types::cloudfront_certificate_arn()),
        AttributeSchema::new("cloudfront_default_certificate", AttributeType::Bool),
        AttributeSchema::new("ssl_support_method", enum_of(&["sni-only", "vip", "static-ip"])),
        AttributeSchema::new(
            "minimum_protocol_version",
            enum_of(&["TLSv1", "TLSv1.1_2016", "TLSv1.2_2018", "TLSv1.2_2019", "TLSv1.2_2021"]),
        ),
    ])
}

/// Returns the schema for CloudFront distributions
pub fn distribution_schema() -> ResourceSchema {
    ResourceSchema::new(DISTRIBUTION)
        .with_description("A CloudFront distribution serving one or more origins")
        .attribute(AttributeSchema::new("enabled", AttributeType::Bool).required())
        .attribute(
            AttributeSchema::new("origin", AttributeType::List(Box::new(origin()))).required(),
        )
        .attribute(AttributeSchema::new("default_cache_behavior", cache_behavior()).required())
        .attribute(
            AttributeSchema::new("default_root_object", AttributeType::String)
                .with_description("Object returned for requests to the root URL"),
        )
        .attribute(AttributeSchema::new("restrictions", restrictions()).required())
        .attribute(AttributeSchema::new("viewer_certificate", viewer_certificate()).required())
        .attribute(
            AttributeSchema::new(
                "aliases",
                AttributeType::List(Box::new(types::domain_name())),
            )
            .with_description("Custom domains served by the distribution"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .output("id")
        .output("arn")
        .output("domain_name")
        .output("hosted_zone_id")
        .output("etag")
}

/// Returns all CloudFront-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![origin_access_control_schema(), distribution_schema()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strata_core::value::Value;

    const CERT: &str = "arn:aws:acm:us-east-1:123456789012:certificate/abcd-1234";

    fn distribution_attrs(aliases: Value) -> BTreeMap<String, Value> {
        [
            ("enabled", Value::Bool(true)),
            (
                "origin",
                Value::list([Value::map([
                    (
                        "domain_name",
                        Value::reference("site/bucket", "bucket_regional_domain_name"),
                    ),
                    ("origin_id", Value::string("site-s3-origin")),
                    ("origin_access_control_id", Value::reference("site/oac", "id")),
                ])]),
            ),
            (
                "default_cache_behavior",
                Value::map([
                    ("target_origin_id", Value::string("site-s3-origin")),
                    ("allowed_methods", Value::list(["GET", "HEAD", "OPTIONS"])),
                    ("cached_methods", Value::list(["GET", "HEAD", "OPTIONS"])),
                    ("compress", Value::Bool(true)),
                    ("viewer_protocol_policy", Value::string("redirect-to-https")),
                ]),
            ),
            ("default_root_object", Value::string("index.html")),
            (
                "restrictions",
                Value::map([(
                    "geo_restriction",
                    Value::map([("restriction_type", "none")]),
                )]),
            ),
            (
                "viewer_certificate",
                Value::map([
                    ("acm_certificate_arn", CERT),
                    ("ssl_support_method", "sni-only"),
                ]),
            ),
            ("aliases", aliases),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    #[test]
    fn valid_distribution() {
        let attrs = distribution_attrs(Value::list(["example.com", "www.example.com"]));
        assert!(distribution_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn invalid_alias_is_rejected() {
        let attrs = distribution_attrs(Value::list(["example.com", "not a domain"]));
        assert!(distribution_schema().validate(&attrs).is_err());
    }

    #[test]
    fn missing_cache_behavior_is_rejected() {
        let mut attrs = distribution_attrs(Value::list(["example.com"]));
        attrs.remove("default_cache_behavior");
        let errors = distribution_schema().validate(&attrs).unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn certificate_outside_us_east_1_is_rejected() {
        let mut attrs = distribution_attrs(Value::list(["example.com"]));
        attrs.insert(
            "viewer_certificate".to_string(),
            Value::map([(
                "acm_certificate_arn",
                "arn:aws:acm:eu-west-1:123456789012:certificate/abcd",
            )]),
        );
        assert!(distribution_schema().validate(&attrs).is_err());
    }

    #[test]
    fn valid_origin_access_control() {
        let attrs: BTreeMap<String, Value> = [
            ("name", "site-oac"),
            ("origin_access_control_origin_type", "s3"),
            ("signing_behavior", "always"),
            ("signing_protocol", "sigv4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::string(v)))
        .collect();
        assert!(origin_access_control_schema().validate(&attrs).is_ok());
    }

    #[test]
    fn origin_access_control_rejects_unknown_signing_behavior() {
        let attrs: BTreeMap<String, Value> = [
            ("name", "site-oac"),
            ("origin_access_control_origin_type", "s3"),
            ("signing_behavior", "sometimes"),
            ("signing_protocol", "sigv4"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), Value::string(v)))
        .collect();
        assert!(origin_access_control_schema().validate(&attrs).is_err());
    }
}
