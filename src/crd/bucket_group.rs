//! S3BucketGroup Custom Resource Definition
//!
//! An S3BucketGroup declares how many buckets should exist for a group. The
//! group controller creates the matching S3Bucket records and reports how many
//! of them are still usable.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::BUCKET_GROUP_LABEL;

/// Specification for an S3BucketGroup
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bucketgroup.my.domain",
    version = "v1",
    kind = "S3BucketGroup",
    plural = "s3bucketgroups",
    shortname = "bg",
    status = "S3BucketGroupStatus",
    namespaced,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".spec.desiredBucketCount"}"#,
    printcolumn = r#"{"name":"Observed","type":"integer","jsonPath":".status.bucketCount"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketGroupSpec {
    /// Number of buckets the group should have
    #[serde(default)]
    pub desired_bucket_count: u32,
}

/// Status for an S3BucketGroup
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketGroupStatus {
    /// Number of owned buckets that are not offline, as of the last pass
    #[serde(default)]
    pub bucket_count: u32,
}

impl S3BucketGroupStatus {
    /// Create a new status with the given observed count
    pub fn with_count(bucket_count: u32) -> Self {
        Self { bucket_count }
    }
}

impl S3BucketGroup {
    /// Observed bucket count as last persisted (0 before the first status write)
    pub fn observed_count(&self) -> u32 {
        self.status.as_ref().map(|s| s.bucket_count).unwrap_or(0)
    }

    /// Number of buckets still missing when `observed` buckets exist
    pub fn deficit(&self, observed: u32) -> u32 {
        self.spec.desired_bucket_count.saturating_sub(observed)
    }

    /// Label selector matching every bucket this group owns
    pub fn owned_bucket_selector(&self) -> String {
        format!("{}={}", BUCKET_GROUP_LABEL, self.name_any())
    }
}
