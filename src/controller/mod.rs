//! Controller implementations for the bucket CRDs
//!
//! Both controllers follow the Kubernetes controller pattern: re-read current
//! state, apply at most one corrective step, write back, and always requeue.
//! Neither keeps state between passes.
//!
//! - [`bucket`] drives one `S3Bucket` through its phase state machine
//! - [`bucket_group`] fans an `S3BucketGroup` out into owned `S3Bucket` records

pub mod bucket;
pub mod bucket_group;

use serde::Serialize;

/// Build a status merge patch guarded by the record's last-seen version
///
/// The API server rejects the patch with 409 Conflict when `resource_version`
/// no longer matches, which turns every status write into an optimistic
/// compare-and-swap. A record without a version is patched unconditionally.
pub fn versioned_status_patch<S: Serialize>(
    resource_version: Option<String>,
    status: &S,
) -> serde_json::Value {
    match resource_version {
        Some(rv) => serde_json::json!({
            "metadata": { "resourceVersion": rv },
            "status": status,
        }),
        None => serde_json::json!({ "status": status }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{BucketPhase, S3BucketGroupStatus, S3BucketStatus};

    #[test]
    fn test_patch_carries_resource_version() {
        let patch = versioned_status_patch(
            Some("42".to_string()),
            &S3BucketStatus::with_phase(BucketPhase::Pending),
        );
        assert_eq!(
            patch,
            serde_json::json!({
                "metadata": { "resourceVersion": "42" },
                "status": { "phase": "pending" },
            })
        );
    }

    #[test]
    fn test_patch_without_version_is_unconditional() {
        let patch = versioned_status_patch(None, &S3BucketGroupStatus::with_count(3));
        assert_eq!(patch, serde_json::json!({ "status": { "bucketCount": 3 } }));
    }
}
