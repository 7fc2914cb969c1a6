//! AWS resource schema definitions

pub mod cloudfront;
pub mod s3;
pub mod types;

use strata_core::schema::{ResourceSchema, SchemaRegistry};

/// Returns all AWS schemas
pub fn all_schemas() -> Vec<ResourceSchema> {
    let mut schemas = Vec::new();
    schemas.extend(s3::schemas());
    schemas.extend(cloudfront::schemas());
    schemas
}

/// Registry holding every AWS schema, ready for a construct tree
pub fn registry() -> SchemaRegistry {
    all_schemas().into_iter().collect()
}
