//! Deployment configuration
//!
//! Every environment input is read once by clap into [`DeploymentArgs`],
//! validated into a [`DeploymentConfig`], and passed by reference from there.

use std::fmt;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use strata_aws::schemas::types::{
    is_valid_region, validate_bucket_name, validate_cloudfront_certificate_arn,
    validate_domain_name,
};
use strata_state::BackendConfig;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{what} not provided (set {variable})")]
    Missing {
        what: &'static str,
        variable: &'static str,
    },

    #[error("Invalid {variable}: {message}")]
    Invalid {
        variable: &'static str,
        message: String,
    },
}

impl ConfigError {
    fn invalid(variable: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            variable,
            message: message.into(),
        }
    }
}

/// Environment inputs, each also settable as a flag
#[derive(Debug, Clone, Default, Args)]
pub struct DeploymentArgs {
    #[arg(long, env = "AWS_ACCESS_KEY", hide_env_values = true, global = true)]
    pub aws_access_key: Option<String>,

    #[arg(long, env = "AWS_SECRET_KEY", hide_env_values = true, global = true)]
    pub aws_secret_key: Option<String>,

    #[arg(long, env = "AWS_REGION", global = true)]
    pub aws_region: Option<String>,

    /// Bucket holding the remote state
    #[arg(long, env = "REMOTE_STATE_S3_BUCKET_NAME", global = true)]
    pub state_bucket: Option<String>,

    /// Object key of the remote state
    #[arg(long, env = "REMOTE_STATE_KEY", global = true)]
    pub state_key: Option<String>,

    /// Deployment environment, used for tagging
    #[arg(long, env = "ENVIRONMENT", global = true)]
    pub environment: Option<String>,

    /// ACM certificate for the custom domains (must be in us-east-1)
    #[arg(long, env = "ACM_CERT_ARN", global = true)]
    pub acm_cert_arn: Option<String>,

    /// Site domain, also the bucket name
    #[arg(long, env = "WEB_SITE_CUSTOM_DOMAIN", global = true)]
    pub domain: Option<String>,

    /// Additional domains served by the distribution, comma separated
    #[arg(
        long = "alias",
        env = "WEB_SITE_CUSTOM_DOMAIN_WWW",
        value_delimiter = ',',
        global = true
    )]
    pub aliases: Vec<String>,
}

/// Where state is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Local,
    S3,
}

pub const DEFAULT_STATE_KEY: &str = "terraform.tfstate";

/// AWS credentials, checked at startup and only handed to the state backend
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Location of the remote state
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteState {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub credentials: Credentials,
}

impl RemoteState {
    pub fn from_args(args: &DeploymentArgs) -> Result<Self, ConfigError> {
        let credentials = credentials(args)?;
        let region = region(args)?;

        let bucket = required(
            &args.state_bucket,
            "Remote state bucket name",
            "REMOTE_STATE_S3_BUCKET_NAME",
        )?;
        validate_bucket_name(&bucket)
            .map_err(|e| ConfigError::invalid("REMOTE_STATE_S3_BUCKET_NAME", e))?;

        let key = match args.state_key.as_deref().map(str::trim) {
            Some("") => return Err(ConfigError::invalid("REMOTE_STATE_KEY", "must not be empty")),
            Some(key) => key.to_string(),
            None => DEFAULT_STATE_KEY.to_string(),
        };

        Ok(Self {
            bucket,
            key,
            region,
            credentials,
        })
    }
}

/// Validated inputs for declaring the site stack
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentConfig {
    pub remote_state: RemoteState,
    pub region: String,
    pub environment: String,
    pub acm_cert_arn: String,
    pub domain: String,
    /// Further aliases after the domain itself, without duplicates
    pub extra_aliases: Vec<String>,
}

impl DeploymentConfig {
    pub fn from_args(args: &DeploymentArgs) -> Result<Self, ConfigError> {
        let remote_state = RemoteState::from_args(args)?;

        let environment = required(&args.environment, "Environment name", "ENVIRONMENT")?;

        let acm_cert_arn = required(&args.acm_cert_arn, "ACM certificate ARN", "ACM_CERT_ARN")?;
        validate_cloudfront_certificate_arn(&acm_cert_arn)
            .map_err(|e| ConfigError::invalid("ACM_CERT_ARN", e))?;

        let domain = required(&args.domain, "Website domain", "WEB_SITE_CUSTOM_DOMAIN")?;
        validate_domain_name(&domain).map_err(|e| ConfigError::invalid("WEB_SITE_CUSTOM_DOMAIN", e))?;
        validate_bucket_name(&domain)
            .map_err(|e| ConfigError::invalid("WEB_SITE_CUSTOM_DOMAIN", e))?;

        let mut extra_aliases: Vec<String> = Vec::new();
        for alias in args.aliases.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            validate_domain_name(alias)
                .map_err(|e| ConfigError::invalid("WEB_SITE_CUSTOM_DOMAIN_WWW", e))?;
            if alias != domain && !extra_aliases.iter().any(|a| a == alias) {
                extra_aliases.push(alias.to_string());
            }
        }

        Ok(Self {
            region: remote_state.region.clone(),
            remote_state,
            environment,
            acm_cert_arn,
            domain,
            extra_aliases,
        })
    }

    /// Every domain the distribution answers for, the site domain first
    pub fn aliases(&self) -> Vec<String> {
        std::iter::once(self.domain.clone())
            .chain(self.extra_aliases.iter().cloned())
            .collect()
    }
}

/// Settings shared by every command that touches state
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub backend: BackendKind,
    pub state_path: PathBuf,
}

/// Build the state backend configuration for `options`
///
/// Credentials travel in the returned config only; nothing in it is written
/// to the document.
pub fn backend_config(
    options: &StateOptions,
    args: &DeploymentArgs,
) -> Result<BackendConfig, ConfigError> {
    match options.backend {
        BackendKind::Local => Ok(BackendConfig::new("local")
            .with_attribute("path", options.state_path.display().to_string())),
        BackendKind::S3 => {
            let remote = RemoteState::from_args(args)?;
            Ok(s3_backend_config(&remote))
        }
    }
}

pub fn s3_backend_config(remote: &RemoteState) -> BackendConfig {
    BackendConfig::new("s3")
        .with_attribute("bucket", remote.bucket.as_str())
        .with_attribute("key", remote.key.as_str())
        .with_attribute("region", remote.region.as_str())
        .with_attribute("encrypt", true)
        .with_attribute("access_key", remote.credentials.access_key.as_str())
        .with_attribute("secret_key", remote.credentials.secret_key.as_str())
}

fn credentials(args: &DeploymentArgs) -> Result<Credentials, ConfigError> {
    let secret_key = required(&args.aws_secret_key, "AWS secret key", "AWS_SECRET_KEY")?;
    let access_key = required(&args.aws_access_key, "AWS access key", "AWS_ACCESS_KEY")?;
    Ok(Credentials {
        access_key,
        secret_key,
    })
}

fn region(args: &DeploymentArgs) -> Result<String, ConfigError> {
    let region = required(&args.aws_region, "AWS region", "AWS_REGION")?;
    if is_valid_region(&region) {
        Ok(region)
    } else {
        Err(ConfigError::invalid(
            "AWS_REGION",
            format!("'{}' is not a region code", region),
        ))
    }
}

fn required(
    value: &Option<String>,
    what: &'static str,
    variable: &'static str,
) -> Result<String, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing { what, variable }),
    }
}
