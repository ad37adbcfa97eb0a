//! S3BucketGroup controller implementation
//!
//! Each pass runs three phases in order, and an earlier phase that changes
//! anything ends the pass with an immediate requeue so the next phase always
//! works from a fresh listing:
//!
//! 1. Reap: delete owned buckets that are wanted online but went offline
//! 2. Status sync: persist the number of owned buckets that still count
//! 3. Sizing: create new bucket records for any shortfall
//!
//! Surplus buckets are never deleted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, Preconditions};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::versioned_status_patch;
use crate::crd::{S3Bucket, S3BucketGroup, S3BucketGroupStatus};
use crate::naming::{validate_bucket_name, NameGenerator};
use crate::{Error, CREATION_SPACING, FIELD_MANAGER, GROUP_REQUEUE_INTERVAL};

/// Trait abstracting Kubernetes client operations for S3BucketGroup
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketGroupKubeClient: Send + Sync {
    /// Read the current version of a group, `None` if it no longer exists
    async fn get_group(&self, namespace: &str, name: &str)
        -> Result<Option<S3BucketGroup>, Error>;

    /// List every bucket record labelled as owned by `group`
    async fn list_owned_buckets(&self, group: &S3BucketGroup) -> Result<Vec<S3Bucket>, Error>;

    /// Create a new bucket record
    ///
    /// Fails if a record with the same name already exists.
    async fn create_bucket(&self, bucket: &S3Bucket) -> Result<(), Error>;

    /// Delete a bucket record
    ///
    /// Only the exact record that was listed is deleted; a record that is
    /// already gone counts as deleted.
    async fn delete_bucket(&self, bucket: &S3Bucket) -> Result<(), Error>;

    /// Write a new status for the group
    ///
    /// Fails with a conflict if the group changed since it was read.
    async fn patch_group_status(
        &self,
        group: &S3BucketGroup,
        status: &S3BucketGroupStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct BucketGroupKubeClientImpl {
    client: Client,
}

impl BucketGroupKubeClientImpl {
    /// Create a new BucketGroupKubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn buckets_in(&self, namespace: Option<String>) -> Result<Api<S3Bucket>, Error> {
        let namespace =
            namespace.ok_or_else(|| Error::validation("resource has no namespace"))?;
        Ok(Api::namespaced(self.client.clone(), &namespace))
    }
}

#[async_trait]
impl BucketGroupKubeClient for BucketGroupKubeClientImpl {
    async fn get_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<S3BucketGroup>, Error> {
        let api: Api<S3BucketGroup> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_owned_buckets(&self, group: &S3BucketGroup) -> Result<Vec<S3Bucket>, Error> {
        let api = self.buckets_in(group.namespace())?;
        let lp = ListParams::default().labels(&group.owned_bucket_selector());
        Ok(api.list(&lp).await?.items)
    }

    async fn create_bucket(&self, bucket: &S3Bucket) -> Result<(), Error> {
        let api = self.buckets_in(bucket.namespace())?;
        api.create(&PostParams::default(), bucket).await?;
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &S3Bucket) -> Result<(), Error> {
        let api = self.buckets_in(bucket.namespace())?;
        let dp = DeleteParams {
            preconditions: Some(Preconditions {
                uid: bucket.uid(),
                resource_version: None,
            }),
            ..DeleteParams::default()
        };

        match api.delete(&bucket.name_any(), &dp).await.map_err(Error::from) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(bucket = %bucket.name_any(), "bucket already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn patch_group_status(
        &self,
        group: &S3BucketGroup,
        status: &S3BucketGroupStatus,
    ) -> Result<(), Error> {
        let namespace = group
            .namespace()
            .ok_or_else(|| Error::validation("S3BucketGroup has no namespace"))?;
        let api: Api<S3BucketGroup> = Api::namespaced(self.client.clone(), &namespace);

        let patch = versioned_status_patch(group.resource_version(), status);
        api.patch_status(
            &group.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

/// Controller context for the S3BucketGroup controller
pub struct BucketGroupContext {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn BucketGroupKubeClient>,
    /// Source of names for new bucket records
    pub names: Arc<dyn NameGenerator>,
    /// Delay before a pass that changed nothing is re-invoked
    pub requeue_interval: Duration,
    /// Pause between consecutive bucket creations within one pass
    pub creation_spacing: Duration,
}

impl BucketGroupContext {
    /// Create a context backed by the real Kubernetes client
    pub fn new(client: Client, names: Arc<dyn NameGenerator>) -> Self {
        Self::with_clients(Arc::new(BucketGroupKubeClientImpl::new(client)), names)
    }

    /// Create a context from explicit client implementations
    pub fn with_clients(
        kube: Arc<dyn BucketGroupKubeClient>,
        names: Arc<dyn NameGenerator>,
    ) -> Self {
        Self {
            kube,
            names,
            requeue_interval: GROUP_REQUEUE_INTERVAL,
            creation_spacing: CREATION_SPACING,
        }
    }

    /// Override the requeue interval
    pub fn requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }

    /// Override the pause between consecutive creations
    pub fn creation_spacing(mut self, spacing: Duration) -> Self {
        self.creation_spacing = spacing;
        self
    }
}

/// Outcome of one sizing phase
#[derive(Debug, Default)]
pub struct CreationReport {
    /// Names of the records that were created
    pub created: Vec<String>,
    /// Names that could not be created, with the reason
    pub failed: Vec<(String, Error)>,
}

/// Number of owned buckets that count toward the group's size
pub fn observed_bucket_count(buckets: &[S3Bucket]) -> u32 {
    let count = buckets.iter().filter(|b| b.counts_toward_group()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Reconcile an S3BucketGroup resource
///
/// Reaps unrecoverable buckets, syncs the observed count, then fills any
/// shortfall. Creation failures are logged and skipped; the next pass picks
/// up whatever is still missing.
#[instrument(skip(group, ctx), fields(group = %group.name_any()))]
pub async fn reconcile(
    group: Arc<S3BucketGroup>,
    ctx: Arc<BucketGroupContext>,
) -> Result<Action, Error> {
    let name = group.name_any();
    let namespace = group
        .namespace()
        .ok_or_else(|| Error::validation("S3BucketGroup has no namespace"))?;

    let Some(current) = ctx.kube.get_group(&namespace, &name).await? else {
        info!("bucket group was deleted, skipping reconcile");
        return Ok(Action::requeue(ctx.requeue_interval));
    };

    let buckets = ctx.kube.list_owned_buckets(&current).await?;

    let reaped = reap_unrecoverable(&buckets, &ctx).await;
    if reaped > 0 {
        info!(reaped, "reaped unrecoverable buckets, re-listing before sizing");
        return Ok(Action::requeue(Duration::ZERO));
    }

    let observed = observed_bucket_count(&buckets);
    if observed != current.observed_count() {
        ctx.kube
            .patch_group_status(&current, &S3BucketGroupStatus::with_count(observed))
            .await?;
        info!(
            previous = current.observed_count(),
            observed, "updated observed bucket count"
        );
        return Ok(Action::requeue(Duration::ZERO));
    }

    let desired = current.spec.desired_bucket_count;
    let deficit = current.deficit(observed);
    debug!(desired, observed, deficit, "sizing bucket group");

    if deficit > 0 {
        let report = fill_deficit(&current, deficit, &ctx).await;
        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "sizing pass finished"
        );
    }

    Ok(Action::requeue(ctx.requeue_interval))
}

/// Error policy for S3BucketGroup reconciliation
pub fn error_policy(
    group: Arc<S3BucketGroup>,
    error: &Error,
    ctx: Arc<BucketGroupContext>,
) -> Action {
    if error.is_conflict() {
        warn!(group = %group.name_any(), "bucket group changed during reconciliation, will re-read");
    } else {
        error!(
            ?error,
            group = %group.name_any(),
            retryable = error.is_retryable(),
            "bucket group reconciliation failed"
        );
    }
    Action::requeue(ctx.requeue_interval)
}

/// Map a bucket change to the group that owns it
///
/// Buckets being deleted and buckets without an ownership label map to nothing.
pub fn group_for_bucket(bucket: &S3Bucket) -> Option<ObjectRef<S3BucketGroup>> {
    if bucket.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let group = bucket.owning_group()?;

    let mut obj_ref = ObjectRef::new(group);
    if let Some(namespace) = bucket.namespace() {
        obj_ref = obj_ref.within(&namespace);
    }
    Some(obj_ref)
}

/// Delete every unrecoverable bucket, returning how many were deleted
///
/// Individual failures are logged and skipped.
async fn reap_unrecoverable(buckets: &[S3Bucket], ctx: &BucketGroupContext) -> usize {
    let mut reaped = 0;
    for bucket in buckets.iter().filter(|b| b.is_unrecoverable()) {
        let name = bucket.name_any();
        match ctx.kube.delete_bucket(bucket).await {
            Ok(()) => {
                info!(bucket = %name, "deleted offline bucket");
                reaped += 1;
            }
            Err(e) => warn!(bucket = %name, error = %e, "failed to delete offline bucket"),
        }
    }
    reaped
}

/// Create `deficit` new bucket records, pausing between creations
async fn fill_deficit(
    group: &S3BucketGroup,
    deficit: u32,
    ctx: &BucketGroupContext,
) -> CreationReport {
    let mut report = CreationReport::default();

    for i in 0..deficit {
        if i > 0 && !ctx.creation_spacing.is_zero() {
            tokio::time::sleep(ctx.creation_spacing).await;
        }

        let name = ctx.names.next_name();
        match create_owned_bucket(group, &name, ctx).await {
            Ok(()) => {
                info!(bucket = %name, "created bucket record");
                report.created.push(name);
            }
            Err(e) => {
                warn!(bucket = %name, error = %e, "failed to create bucket record");
                report.failed.push((name, e));
            }
        }
    }

    report
}

async fn create_owned_bucket(
    group: &S3BucketGroup,
    name: &str,
    ctx: &BucketGroupContext,
) -> Result<(), Error> {
    validate_bucket_name(name)?;
    ctx.kube
        .create_bucket(&S3Bucket::owned_by(name, group))
        .await
}
