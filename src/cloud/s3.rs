//! S3 implementation of the cloud adapter
//!
//! Works against AWS and S3-compatible endpoints such as LocalStack
//! (`http://localhost:4566`), which need an endpoint override and path-style
//! addressing.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;

use async_trait::async_trait;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::create_bucket::CreateBucketError;
use aws_sdk_s3::operation::list_buckets::{ListBucketsError, ListBucketsOutput};
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::CloudAdapter;
use crate::Error;

/// Region that rejects an explicit location constraint on bucket creation
const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for the S3 adapter
#[derive(Clone, Debug)]
pub struct S3Config {
    /// Endpoint override (None uses the AWS endpoint for the region)
    pub endpoint: Option<String>,
    /// Region buckets are created in
    pub region: String,
    /// Address buckets as `endpoint/bucket` instead of `bucket.endpoint`
    pub force_path_style: bool,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            force_path_style: true,
        }
    }
}

/// Cloud adapter backed by the AWS S3 SDK
pub struct S3CloudAdapter {
    client: Client,
    region: String,
}

impl S3CloudAdapter {
    /// Build an adapter from the given settings
    ///
    /// Credentials come from the standard AWS provider chain (environment,
    /// profile, instance metadata).
    pub async fn from_config(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.force_path_style)
            .build();

        Self {
            client: Client::from_conf(s3_config),
            region: config.region.clone(),
        }
    }
}

/// Location constraint to send when creating a bucket in `region`
fn location_constraint(region: &str) -> Option<BucketLocationConstraint> {
    (region != DEFAULT_REGION).then(|| BucketLocationConstraint::from(region))
}

/// Collect bucket names across every `ListBuckets` page
///
/// `fetch_page` is called with the continuation token of the previous page
/// (`None` for the first). Any failed page fails the whole listing.
async fn collect_bucket_names<F, Fut>(mut fetch_page: F) -> Result<BTreeSet<String>, Error>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListBucketsOutput, Error>>,
{
    let mut names = BTreeSet::new();
    let mut token = None;
    let mut pages = 0usize;

    loop {
        let page = fetch_page(token.take()).await?;
        pages += 1;
        names.extend(
            page.buckets()
                .iter()
                .filter_map(|b| b.name().map(str::to_string)),
        );

        match page.continuation_token() {
            Some(next) if !next.is_empty() => token = Some(next.to_string()),
            _ => break,
        }
    }

    debug!(count = names.len(), pages, "listed cloud buckets");
    Ok(names)
}

fn list_error<R: Debug>(err: SdkError<ListBucketsError, R>) -> Error {
    Error::cloud(format!(
        "failed to list buckets: {}",
        DisplayErrorContext(&err)
    ))
}

/// Interpret a failed `CreateBucket` call
///
/// `BucketAlreadyOwnedByYou` means a previous pass created the bucket but never
/// recorded the fact, so it counts as success. Anything else is a cloud error.
fn create_outcome<R: Debug>(name: &str, err: SdkError<CreateBucketError, R>) -> Result<(), Error> {
    if err
        .as_service_error()
        .is_some_and(|se| se.is_bucket_already_owned_by_you())
    {
        info!(bucket = %name, "cloud bucket already owned by us");
        return Ok(());
    }
    Err(Error::cloud(format!(
        "failed to create bucket '{}': {}",
        name,
        DisplayErrorContext(&err)
    )))
}

#[async_trait]
impl CloudAdapter for S3CloudAdapter {
    async fn list_bucket_names(&self) -> Result<BTreeSet<String>, Error> {
        collect_bucket_names(|token| {
            let request = self.client.list_buckets().set_continuation_token(token);
            async move { request.send().await.map_err(list_error) }
        })
        .await
    }

    async fn create_bucket(&self, name: &str) -> Result<(), Error> {
        let mut request = self.client.create_bucket().bucket(name);
        if let Some(constraint) = location_constraint(&self.region) {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(constraint)
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                info!(bucket = %name, "cloud bucket created");
                Ok(())
            }
            Err(e) => create_outcome(name, e),
        }
    }
}
