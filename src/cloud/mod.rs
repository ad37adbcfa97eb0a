//! Cloud provider abstraction
//!
//! The controllers only need three things from the cloud: which buckets exist,
//! whether one in particular exists, and a way to create one. Provider calls are
//! not idempotent by construction, so callers interpret failures themselves and
//! rely on the next scheduled pass rather than on retries here.

mod s3;

use std::collections::BTreeSet;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

pub use s3::{S3CloudAdapter, S3Config};

use crate::Error;

/// Trait abstracting the cloud bucket API
///
/// This trait allows mocking the cloud provider in tests while using the
/// real S3 client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudAdapter: Send + Sync {
    /// List the names of every bucket visible to this account
    ///
    /// Newly created buckets may take a while to appear here.
    async fn list_bucket_names(&self) -> Result<BTreeSet<String>, Error>;

    /// Create a bucket with the given name
    async fn create_bucket(&self, name: &str) -> Result<(), Error>;

    /// Check whether a bucket with the given name is listed
    ///
    /// A failed list is an error, never "absent".
    async fn bucket_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(self.list_bucket_names().await?.contains(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedListing(std::result::Result<Vec<&'static str>, &'static str>);

    #[async_trait]
    impl CloudAdapter for FixedListing {
        async fn list_bucket_names(&self) -> Result<BTreeSet<String>, Error> {
            match &self.0 {
                Ok(names) => Ok(names.iter().map(|n| n.to_string()).collect()),
                Err(msg) => Err(Error::cloud(*msg)),
            }
        }

        async fn create_bucket(&self, _name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_bucket_exists_is_derived_from_listing() {
        let cloud = FixedListing(Ok(vec!["my-s3-bucket-1", "my-s3-bucket-2"]));
        assert!(cloud.bucket_exists("my-s3-bucket-2").await.unwrap());
        assert!(!cloud.bucket_exists("my-s3-bucket-3").await.unwrap());
    }

    /// Story: a listing outage must not look like a vanished bucket
    #[tokio::test]
    async fn story_list_failure_is_not_absence() {
        let cloud = FixedListing(Err("connection refused"));
        let err = cloud.bucket_exists("my-s3-bucket-1").await.unwrap_err();
        assert!(matches!(err, Error::Cloud(_)));
    }
}
