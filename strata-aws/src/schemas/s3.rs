//! S3 bucket and bucket policy schema definitions

use strata_core::schema::{AttributeSchema, AttributeType, ResourceSchema, types as core_types};

use super::types;

pub const BUCKET: &str = "aws_s3_bucket";
pub const BUCKET_POLICY: &str = "aws_s3_bucket_policy";

/// Returns the schema for S3 buckets
pub fn bucket_schema() -> ResourceSchema {
    ResourceSchema::new(BUCKET)
        .with_description("An S3 bucket for object storage")
        .attribute(
            AttributeSchema::new("bucket", types::s3_bucket_name())
                .required()
                .with_description("Bucket name, the site domain for website buckets"),
        )
        .attribute(
            AttributeSchema::new(
                "acl",
                AttributeType::Enum(
                    ["private", "public-read", "public-read-write", "authenticated-read"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                ),
            )
            .with_description("The canned ACL for the bucket"),
        )
        .attribute(
            AttributeSchema::new(
                "versioning",
                core_types::object([AttributeSchema::new("enabled", AttributeType::Bool)]),
            )
            .with_description("Versioning configuration"),
        )
        .attribute(
            AttributeSchema::new(
                "cors_rule",
                AttributeType::List(Box::new(core_types::object([
                    AttributeSchema::new(
                        "allowed_methods",
                        AttributeType::List(Box::new(types::http_method())),
                    )
                    .required(),
                    AttributeSchema::new("allowed_origins", core_types::string_list()).required(),
                    AttributeSchema::new("allowed_headers", core_types::string_list()),
                    AttributeSchema::new("max_age_seconds", AttributeType::Int),
                ]))),
            )
            .with_description("Cross-origin access rules"),
        )
        .attribute(
            AttributeSchema::new(
                "website",
                core_types::object([
                    AttributeSchema::new("index_document", core_types::non_empty_string())
                        .required(),
                    AttributeSchema::new("error_document", core_types::non_empty_string()),
                ]),
            )
            .with_description("Static website hosting configuration"),
        )
        .attribute(AttributeSchema::new("tags", types::tags()))
        .output("id")
        .output("arn")
        .output("bucket_domain_name")
        .output("bucket_regional_domain_name")
        .output("region")
}

/// Returns the schema for S3 bucket policies
pub fn bucket_policy_schema() -> ResourceSchema {
    ResourceSchema::new(BUCKET_POLICY)
        .with_description("Resource policy attached to an S3 bucket")
        .attribute(
            AttributeSchema::new("bucket", AttributeType::String)
                .required()
                .with_description("Name of the bucket the policy applies to"),
        )
        .attribute(
            AttributeSchema::new("policy", AttributeType::String)
                .required()
                .with_description("JSON policy document"),
        )
        .output("id")
}

/// Returns all S3-related schemas
pub fn schemas() -> Vec<ResourceSchema> {
    vec![bucket_schema(), bucket_policy_schema()]
}
