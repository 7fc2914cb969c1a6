//! The static site stack
//!
//! A private bucket holds the site, an origin access control lets the CDN
//! sign its requests to the bucket, the distribution serves the site on the
//! custom domains, and the bucket policy admits only that distribution.

use std::collections::BTreeMap;

use strata_aws::schemas::{cloudfront, s3};
use strata_aws::settings::{self, SettingsError};
use strata_core::tree::{ConstructTree, DeclarationError};
use strata_core::value::Value;
use thiserror::Error;

use crate::config::DeploymentConfig;

/// Root scope name, the first segment of every resource path
pub const STACK_NAME: &str = "static-site";

const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Declare the whole stack for `config`
pub fn declare_site(config: &DeploymentConfig) -> Result<ConstructTree, StackError> {
    let mut tree = ConstructTree::new(STACK_NAME).with_schemas(strata_aws::registry());
    let root = tree.root();

    let provider = block([("region", Value::string(&config.region))]);
    settings::validate_provider(&provider)?;
    tree.add_provider(settings::PROVIDER_NAME, provider)?;

    let remote = &config.remote_state;
    let backend = block([
        ("bucket", Value::string(&remote.bucket)),
        ("key", Value::string(&remote.key)),
        ("region", Value::string(&remote.region)),
        ("encrypt", Value::Bool(true)),
    ]);
    settings::validate_backend(&backend)?;
    tree.set_backend(settings::BACKEND_TYPE, backend)?;

    let origin_id = format!("{}-s3-origin", STACK_NAME);

    let bucket = tree.declare(
        root,
        "bucket",
        s3::BUCKET,
        [
            ("bucket", Value::string(&config.domain)),
            ("acl", Value::string("private")),
            ("versioning", Value::map([("enabled", false)])),
            (
                "cors_rule",
                Value::list([Value::map([
                    ("allowed_methods", Value::list(["GET"])),
                    ("allowed_origins", Value::list(config.aliases())),
                ])]),
            ),
            (
                "website",
                Value::map([
                    ("index_document", "index.html"),
                    // Single page app: unknown paths fall back to the index
                    ("error_document", "index.html"),
                ]),
            ),
            ("tags", tags(config, "s3")),
        ],
    )?;

    let oac = tree.declare(
        root,
        "oac",
        cloudfront::ORIGIN_ACCESS_CONTROL,
        [
            ("name", Value::string(format!("{}-oac", STACK_NAME))),
            ("origin_access_control_origin_type", Value::string("s3")),
            ("signing_behavior", Value::string("always")),
            ("signing_protocol", Value::string("sigv4")),
        ],
    )?;

    let origin_domain = tree.output_ref(bucket, "bucket_regional_domain_name")?;
    let oac_id = tree.output_ref(oac, "id")?;
    let cached_methods = || Value::list(["GET", "HEAD", "OPTIONS"]);

    let distribution = tree.declare(
        root,
        "distribution",
        cloudfront::DISTRIBUTION,
        [
            ("enabled", Value::Bool(true)),
            (
                "origin",
                Value::list([Value::map([
                    ("domain_name", origin_domain),
                    ("origin_id", Value::string(&origin_id)),
                    ("origin_access_control_id", oac_id),
                ])]),
            ),
            (
                "default_cache_behavior",
                Value::map([
                    ("target_origin_id", Value::string(&origin_id)),
                    ("allowed_methods", cached_methods()),
                    ("cached_methods", cached_methods()),
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
                    ("acm_certificate_arn", config.acm_cert_arn.as_str()),
                    ("ssl_support_method", "sni-only"),
                ]),
            ),
            ("aliases", Value::list(config.aliases())),
            ("tags", tags(config, "cloud-front")),
        ],
    )?;

    let bucket_name = tree.output_ref(bucket, "bucket")?;
    let bucket_arn = tree.output_ref(bucket, "arn")?;
    let distribution_arn = tree.output_ref(distribution, "arn")?;

    let policy = Value::map([
        ("Version", Value::string(POLICY_VERSION)),
        (
            "Statement",
            Value::list([Value::map([
                ("Effect", Value::string("Allow")),
                (
                    "Principal",
                    Value::map([("Service", "cloudfront.amazonaws.com")]),
                ),
                ("Action", Value::string("s3:GetObject")),
                ("Resource", Value::concat([bucket_arn, Value::string("/*")])),
                (
                    "Condition",
                    Value::map([(
                        "StringEquals",
                        Value::map([("AWS:SourceArn", distribution_arn)]),
                    )]),
                ),
            ])]),
        ),
    ]);

    tree.declare(
        root,
        "bucketPolicy",
        s3::BUCKET_POLICY,
        [
            ("bucket", bucket_name),
            ("policy", Value::json_encode(policy)),
        ],
    )?;

    log::debug!("Declared {} resources in {}", tree.len(), STACK_NAME);
    Ok(tree)
}

fn tags(config: &DeploymentConfig, resource: &str) -> Value {
    Value::map([
        ("env", Value::string(&config.environment)),
        (
            "resourceTag",
            Value::string(format!("{}-{}", STACK_NAME, resource)),
        ),
    ])
}

fn block<const N: usize>(entries: [(&str, Value); N]) -> BTreeMap<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::s3_backend_config;
    use crate::config::tests::complete_args;
    use serde_json::json;
    use strata_core::synth::synthesize;
    use strata_core::value::Outputs;
    use strata_state::BackendConfig;

    fn config() -> DeploymentConfig {
        DeploymentConfig::from_args(&complete_args()).unwrap()
    }

    #[test]
    fn site_synthesizes_in_dependency_order() {
        let doc = synthesize(&declare_site(&config()).unwrap()).unwrap();
        assert_eq!(
            doc.paths(),
            vec![
                "static-site/bucket",
                "static-site/oac",
                "static-site/distribution",
                "static-site/bucketPolicy",
            ]
        );
        assert_eq!(
            doc.find("static-site/bucketPolicy").unwrap().depends_on,
            vec!["static-site/bucket", "static-site/distribution"]
        );
    }

    #[test]
    fn document_carries_provider_and_backend_but_no_credentials() {
        let doc = synthesize(&declare_site(&config()).unwrap()).unwrap();
        let json = doc.to_json_pretty().unwrap();
        assert!(!json.contains("AKIAEXAMPLE"));
        assert!(!json.contains("s3cr3t-value"));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["provider"]["aws"], json!({ "region": "ap-northeast-1" }));
        assert_eq!(value["backend"]["type"], json!("s3"));
        assert_eq!(value["backend"]["config"]["key"], json!("terraform.tfstate"));
        assert_eq!(value["backend"]["config"]["encrypt"], json!(true));
    }

    #[test]
    fn backend_block_matches_state_location() {
        let config = config();
        let tree = declare_site(&config).unwrap();
        let declared = BackendConfig::from_settings(tree.backend().unwrap());
        let used = s3_backend_config(&config.remote_state);

        for key in ["bucket", "key", "region"] {
            assert_eq!(declared.get_string(key), used.get_string(key), "{}", key);
        }
        assert_eq!(declared.get_string("secret_key"), None);
    }

    #[test]
    fn single_alias_site() {
        let args = crate::config::DeploymentArgs {
            aliases: vec![],
            ..complete_args()
        };
        let config = DeploymentConfig::from_args(&args).unwrap();
        let doc = synthesize(&declare_site(&config).unwrap()).unwrap();
        let distribution = doc.find("static-site/distribution").unwrap();
        assert_eq!(
            distribution.attributes["aliases"],
            Value::list(["example.com"])
        );
    }

    #[test]
    fn policy_resolves_to_a_json_string() {
        let doc = synthesize(&declare_site(&config()).unwrap()).unwrap();
        let mut outputs = Outputs::new();
        outputs.insert(
            "static-site/bucket".to_string(),
            [
                ("bucket".to_string(), json!("example.com")),
                ("arn".to_string(), json!("arn:aws:s3:::example.com")),
            ]
            .into_iter()
            .collect(),
        );
        outputs.insert(
            "static-site/distribution".to_string(),
            [(
                "arn".to_string(),
                json!("arn:aws:cloudfront::123456789012:distribution/E1"),
            )]
            .into_iter()
            .collect(),
        );

        let record = doc.find("static-site/bucketPolicy").unwrap();
        let resolved = record.resolve_attributes(&outputs).unwrap();
        assert_eq!(resolved["bucket"], json!("example.com"));

        let policy: serde_json::Value =
            serde_json::from_str(resolved["policy"].as_str().unwrap()).unwrap();
        let statement = &policy["Statement"][0];
        assert_eq!(statement["Resource"], json!("arn:aws:s3:::example.com/*"));
        assert_eq!(
            statement["Condition"]["StringEquals"]["AWS:SourceArn"],
            json!("arn:aws:cloudfront::123456789012:distribution/E1")
        );
        assert_eq!(statement["Principal"]["Service"], json!("cloudfront.amazonaws.com"));
    }

    #[test]
    fn invalid_domain_never_reaches_the_tree() {
        let mut config = config();
        config.domain = "Not_A_Bucket".to_string();
        assert!(matches!(
            declare_site(&config),
            Err(StackError::Declaration(DeclarationError::InvalidAttribute { .. }))
        ));
    }
}
