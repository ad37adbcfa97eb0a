//! S3Bucket Custom Resource Definition
//!
//! An S3Bucket represents one cloud bucket. Records are created by the group
//! controller, never by hand, and carry a label naming the group that owns them.

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::BucketPhase;
use super::S3BucketGroup;
use crate::BUCKET_GROUP_LABEL;

/// Specification for an S3Bucket
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "bucket.my.domain",
    version = "v1",
    kind = "S3Bucket",
    plural = "s3buckets",
    status = "S3BucketStatus",
    namespaced,
    printcolumn = r#"{"name":"Desired","type":"string","jsonPath":".spec.phase"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketSpec {
    /// Desired phase of the bucket
    #[serde(default)]
    pub phase: BucketPhase,
}

/// Status for an S3Bucket
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3BucketStatus {
    /// Last confirmed phase; absent until the first reconciliation writes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<BucketPhase>,
}

impl S3BucketStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: BucketPhase) -> Self {
        Self { phase: Some(phase) }
    }
}

impl S3Bucket {
    /// Build a new bucket record owned by `group`
    ///
    /// The record lives in the group's namespace, asks for the bucket to be
    /// online and carries the ownership label used for lookups.
    pub fn owned_by(name: &str, group: &S3BucketGroup) -> Self {
        let mut bucket = S3Bucket::new(
            name,
            S3BucketSpec {
                phase: BucketPhase::Online,
            },
        );
        bucket.metadata.namespace = group.namespace();
        bucket.metadata.labels = Some(BTreeMap::from([(
            BUCKET_GROUP_LABEL.to_string(),
            group.name_any(),
        )]));
        bucket
    }

    /// Observed phase, `None` while still `Unset`
    pub fn observed_phase(&self) -> Option<BucketPhase> {
        self.status.as_ref().and_then(|s| s.phase)
    }

    /// Name of the owning group, read from the ownership label
    pub fn owning_group(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(BUCKET_GROUP_LABEL))
            .map(String::as_str)
    }

    /// Returns true if the bucket is wanted online but its cloud side has vanished
    ///
    /// The bucket controller never leaves `Offline` on its own, so such a record
    /// can only be cleared by deleting it.
    pub fn is_unrecoverable(&self) -> bool {
        self.spec.phase == BucketPhase::Online && self.observed_phase() == Some(BucketPhase::Offline)
    }

    /// Returns true if the bucket counts toward its group's observed size
    pub fn counts_toward_group(&self) -> bool {
        self.observed_phase() != Some(BucketPhase::Offline)
    }
}
