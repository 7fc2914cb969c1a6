//! AWS-specific type definitions

use std::sync::LazyLock;

use regex::Regex;
use strata_core::schema::AttributeType;
use strata_core::value::Value;

/// CloudFront only accepts certificates issued in this region
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

/// Partition prefix, geography, ordinal: "eu-south-1", "us-gov-west-1", "cn-north-1"
static REGION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]?)?-[a-z]+-\d{1,2}$").unwrap());

static BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").unwrap());

static DOMAIN_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*\.)?([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

static ACM_CERTIFICATE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:acm:([a-z0-9-]+):\d{12}:certificate/[A-Za-z0-9-]+$").unwrap()
});

/// AWS region type with custom validation
pub fn aws_region() -> AttributeType {
    AttributeType::Custom {
        name: "Region".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) if is_valid_region(s) => Ok(()),
            Value::String(s) => Err(format!(
                "Invalid region '{}', expected a region code such as 'ap-northeast-1'",
                s
            )),
            _ => Err("Expected string".to_string()),
        },
    }
}

/// Whether `region` is shaped like an AWS region code
pub fn is_valid_region(region: &str) -> bool {
    REGION.is_match(region)
}

/// S3 bucket name: 3-63 lowercase letters, digits, dots or hyphens
pub fn s3_bucket_name() -> AttributeType {
    AttributeType::Custom {
        name: "BucketName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => validate_bucket_name(s),
            _ => Err("Expected string".to_string()),
        },
    }
}

pub fn validate_bucket_name(name: &str) -> Result<(), String> {
    if !BUCKET_NAME.is_match(name) {
        return Err(format!(
            "Invalid bucket name '{}': 3-63 lowercase letters, digits, '.' or '-', starting and ending with a letter or digit",
            name
        ));
    }
    if name.contains("..") {
        return Err(format!("Invalid bucket name '{}': consecutive dots", name));
    }
    Ok(())
}

/// Fully qualified domain name, lowercase
pub fn domain_name() -> AttributeType {
    AttributeType::Custom {
        name: "DomainName".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => validate_domain_name(s),
            _ => Err("Expected string".to_string()),
        },
    }
}

pub fn validate_domain_name(name: &str) -> Result<(), String> {
    if name.len() <= 253 && DOMAIN_NAME.is_match(name) {
        Ok(())
    } else {
        Err(format!("Invalid domain name '{}'", name))
    }
}

/// ACM certificate ARN usable by CloudFront (issued in us-east-1)
pub fn cloudfront_certificate_arn() -> AttributeType {
    AttributeType::Custom {
        name: "CertificateArn".to_string(),
        base: Box::new(AttributeType::String),
        validate: |value| match value {
            Value::String(s) => validate_cloudfront_certificate_arn(s),
            _ => Err("Expected string".to_string()),
        },
    }
}

pub fn validate_cloudfront_certificate_arn(arn: &str) -> Result<(), String> {
    let Some(captures) = ACM_CERTIFICATE_ARN.captures(arn) else {
        return Err(format!("Invalid ACM certificate ARN '{}'", arn));
    };
    match captures.get(1).map(|m| m.as_str()) {
        Some(CLOUDFRONT_CERTIFICATE_REGION) => Ok(()),
        Some(region) => Err(format!(
            "Certificate is in {}, CloudFront requires {}",
            region, CLOUDFRONT_CERTIFICATE_REGION
        )),
        None => Err(format!("Invalid ACM certificate ARN '{}'", arn)),
    }
}

/// HTTP methods CloudFront cache behaviors accept
pub fn http_method() -> AttributeType {
    AttributeType::Enum(
        ["GET", "HEAD", "OPTIONS", "PUT", "POST", "PATCH", "DELETE"]
            .into_iter()
            .map(String::from)
            .collect(),
    )
}

/// Resource tags
pub fn tags() -> AttributeType {
    AttributeType::Map(Box::new(AttributeType::String))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_accepts_aws_format() {
        assert!(aws_region().validate(&Value::string("ap-northeast-1")).is_ok());
    }

    #[test]
    fn region_rejects_invalid_region() {
        let result = aws_region().validate(&Value::string("invalid-region"));
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid region"));
        assert!(err.contains("ap-northeast-1"));
    }

    #[test]
    fn region_accepts_regions_opened_later() {
        for region in ["ap-southeast-3", "eu-south-1", "me-central-1", "ap-east-1", "us-gov-west-1"] {
            assert!(is_valid_region(region), "{}", region);
            assert!(aws_region().validate(&Value::string(region)).is_ok(), "{}", region);
        }
        assert!(!is_valid_region("US-EAST-1"));
        assert!(!is_valid_region("us-east"));
    }

    #[test]
    fn region_rejects_availability_zone() {
        assert!(aws_region().validate(&Value::string("ap-northeast-1a")).is_err());
    }

    #[test]
    fn region_accepts_reference() {
        let reference = Value::reference("site/bucket", "region");
        assert!(aws_region().validate(&reference).is_ok());
    }

    #[test]
    fn bucket_names() {
        assert!(validate_bucket_name("example.com").is_ok());
        assert!(validate_bucket_name("my-site-assets").is_ok());
        assert!(validate_bucket_name("ab").is_err());
        assert!(validate_bucket_name("Example.com").is_err());
        assert!(validate_bucket_name("-leading").is_err());
        assert!(validate_bucket_name("double..dot").is_err());
        assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn domain_names() {
        assert!(validate_domain_name("example.com").is_ok());
        assert!(validate_domain_name("www.example.co.uk").is_ok());
        assert!(validate_domain_name("*.example.com").is_ok());
        assert!(validate_domain_name("localhost").is_err());
        assert!(validate_domain_name("exa mple.com").is_err());
        assert!(validate_domain_name("-bad.example.com").is_err());
    }

    #[test]
    fn certificate_arn_must_be_in_us_east_1() {
        assert!(
            validate_cloudfront_certificate_arn(
                "arn:aws:acm:us-east-1:123456789012:certificate/1a2b3c4d-0000-1111-2222-333344445555"
            )
            .is_ok()
        );
        let err = validate_cloudfront_certificate_arn(
            "arn:aws:acm:eu-west-1:123456789012:certificate/1a2b3c4d",
        )
        .unwrap_err();
        assert!(err.contains("us-east-1"));
        assert!(validate_cloudfront_certificate_arn("not-an-arn").is_err());
    }

    #[test]
    fn http_methods_are_uppercase() {
        assert!(http_method().validate(&Value::string("GET")).is_ok());
        assert!(http_method().validate(&Value::string("get")).is_err());
    }
}
