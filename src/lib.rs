//! Bucket operator - CRD-driven Kubernetes operator for groups of S3 buckets
//!
//! The operator continuously drives cloud storage toward the state declared in two
//! custom resources:
//!
//! - `S3BucketGroup` declares how many buckets a group should have
//! - `S3Bucket` declares that one bucket should be online
//!
//! # Architecture
//!
//! Two level-triggered controllers cooperate through the Kubernetes API:
//! - The group controller fans a group's desired count out into owned `S3Bucket`
//!   records, reaps records whose cloud bucket vanished, and publishes the observed count
//! - The bucket controller walks each `S3Bucket` through `Pending → Online → Offline`
//!   by consulting the cloud provider
//!
//! Neither controller keeps state between passes. Every pass re-reads the store and
//! re-derives the next action, so a crash or an abandoned pass heals on the next wake-up.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (S3BucketGroup, S3Bucket)
//! - [`controller`] - Reconciliation logic for both resources
//! - [`cloud`] - Cloud provider abstraction and the S3 implementation
//! - [`naming`] - Bucket name generation
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod cloud;
pub mod controller;
pub mod crd;
pub mod error;
pub mod naming;

use std::time::Duration;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Interval after which every `S3Bucket` pass is re-invoked, whatever its outcome
///
/// Re-invocation on a timer is what lets the bucket controller notice a bucket that
/// was created but not yet listed, or one that was deleted behind our back.
pub const BUCKET_REQUEUE_INTERVAL: Duration = Duration::from_secs(30);

/// Interval after which every `S3BucketGroup` pass is re-invoked
pub const GROUP_REQUEUE_INTERVAL: Duration = Duration::from_secs(10);

/// Delay between consecutive bucket record creations within one sizing pass
///
/// Must stay below [`GROUP_REQUEUE_INTERVAL`] so a single pass makes visible progress.
pub const CREATION_SPACING: Duration = Duration::from_secs(5);

/// Label on an `S3Bucket` naming the `S3BucketGroup` that owns it
pub const BUCKET_GROUP_LABEL: &str = "bucketGroupName";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "bucket-operator";

/// Default prefix for generated bucket names
pub const DEFAULT_BUCKET_PREFIX: &str = "my-s3-bucket";
