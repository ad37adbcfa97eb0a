//! Custom Resource Definitions for the bucket operator
//!
//! This module contains both CRDs managed by the operator and the phase type
//! they share.

mod bucket;
mod bucket_group;
mod types;

pub use bucket::{S3Bucket, S3BucketSpec, S3BucketStatus};
pub use bucket_group::{S3BucketGroup, S3BucketGroupSpec, S3BucketGroupStatus};
pub use types::{BucketPhase, ObservedPhase};
