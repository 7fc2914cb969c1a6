//! Strata AWS
//!
//! Schemas for the AWS resource types a static site needs, plus validation
//! of the `aws` provider block and the `s3` backend block.

pub mod schemas;
pub mod settings;

pub use schemas::{all_schemas, registry};
