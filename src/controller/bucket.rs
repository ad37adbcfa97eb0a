//! S3Bucket controller implementation
//!
//! Drives one bucket record's observed phase toward its desired phase:
//!
//! ```text
//! Unset --create--> Pending --listed--> Online --vanished--> Offline
//! ```
//!
//! `Offline` is terminal here; removing the record is the group controller's call.
//! Every pass ends with a requeue after a fixed interval, which is how a bucket
//! that is slow to appear in listings, or one deleted out-of-band, gets noticed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::versioned_status_patch;
use crate::cloud::CloudAdapter;
use crate::crd::{BucketPhase, ObservedPhase, S3Bucket, S3BucketStatus};
use crate::{Error, BUCKET_REQUEUE_INTERVAL, FIELD_MANAGER};

/// Trait abstracting Kubernetes client operations for S3Bucket
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketKubeClient: Send + Sync {
    /// Read the current version of a bucket record, `None` if it no longer exists
    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<S3Bucket>, Error>;

    /// Write a new status for the bucket
    ///
    /// Fails with a conflict if the record changed since `bucket` was read.
    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct BucketKubeClientImpl {
    client: Client,
}

impl BucketKubeClientImpl {
    /// Create a new BucketKubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BucketKubeClient for BucketKubeClientImpl {
    async fn get_bucket(&self, namespace: &str, name: &str) -> Result<Option<S3Bucket>, Error> {
        let api: Api<S3Bucket> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error> {
        let namespace = bucket
            .namespace()
            .ok_or_else(|| Error::validation("S3Bucket has no namespace"))?;
        let api: Api<S3Bucket> = Api::namespaced(self.client.clone(), &namespace);

        let patch = versioned_status_patch(bucket.resource_version(), status);
        api.patch_status(
            &bucket.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

/// Controller context for the S3Bucket controller
pub struct BucketContext {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn BucketKubeClient>,
    /// Cloud provider the buckets live in
    pub cloud: Arc<dyn CloudAdapter>,
    /// Delay before every pass is re-invoked
    pub requeue_interval: Duration,
}

impl BucketContext {
    /// Create a context backed by the real Kubernetes client
    pub fn new(client: Client, cloud: Arc<dyn CloudAdapter>) -> Self {
        Self::with_clients(Arc::new(BucketKubeClientImpl::new(client)), cloud)
    }

    /// Create a context from explicit client implementations
    pub fn with_clients(kube: Arc<dyn BucketKubeClient>, cloud: Arc<dyn CloudAdapter>) -> Self {
        Self {
            kube,
            cloud,
            requeue_interval: BUCKET_REQUEUE_INTERVAL,
        }
    }

    /// Override the requeue interval
    pub fn requeue_interval(mut self, interval: Duration) -> Self {
        self.requeue_interval = interval;
        self
    }
}

/// The single corrective step a pass takes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketAction {
    /// Bucket was online and the cloud no longer lists it
    MarkOffline,
    /// Desired and observed phases agree
    Converged,
    /// Nothing was attempted yet: create the cloud bucket
    CreateBucket,
    /// Creation was requested and the cloud now lists the bucket
    MarkOnline,
    /// Nothing to do until the cloud catches up
    Wait,
}

/// Returns true if deciding the next step requires asking the cloud
///
/// Only `Pending` (waiting to appear) and `Online` (watching for disappearance)
/// depend on the cloud listing.
pub fn needs_existence_check(observed: Option<BucketPhase>) -> bool {
    matches!(observed, Some(BucketPhase::Pending | BucketPhase::Online))
}

/// Decide the next step for a bucket; the first matching rule wins
///
/// `exists` is the cloud's answer when [`needs_existence_check`] asked for one.
pub fn determine_action(
    desired: BucketPhase,
    observed: Option<BucketPhase>,
    exists: Option<bool>,
) -> BucketAction {
    if observed == Some(BucketPhase::Online) && exists == Some(false) {
        return BucketAction::MarkOffline;
    }
    if observed == Some(desired) {
        return BucketAction::Converged;
    }
    if desired == BucketPhase::Online && observed.is_none() {
        return BucketAction::CreateBucket;
    }
    if observed == Some(BucketPhase::Pending) && exists == Some(true) {
        return BucketAction::MarkOnline;
    }
    BucketAction::Wait
}

/// Reconcile an S3Bucket resource
///
/// Re-reads the record, asks the cloud only when the phase depends on it, takes
/// at most one cloud-mutating step and at most one status write, then requeues.
#[instrument(skip(bucket, ctx), fields(bucket = %bucket.name_any()))]
pub async fn reconcile(bucket: Arc<S3Bucket>, ctx: Arc<BucketContext>) -> Result<Action, Error> {
    let name = bucket.name_any();
    let namespace = bucket
        .namespace()
        .ok_or_else(|| Error::validation("S3Bucket has no namespace"))?;
    let requeue = Action::requeue(ctx.requeue_interval);

    // The notification may be stale; decide on the freshest copy
    let Some(current) = ctx.kube.get_bucket(&namespace, &name).await? else {
        info!("bucket was deleted, skipping reconcile");
        return Ok(requeue);
    };

    let desired = current.spec.phase;
    let observed = current.observed_phase();
    debug!(%desired, observed = %ObservedPhase(observed), "reconciling bucket");

    let exists = if needs_existence_check(observed) {
        Some(ctx.cloud.bucket_exists(&name).await?)
    } else {
        None
    };

    match determine_action(desired, observed, exists) {
        BucketAction::MarkOffline => {
            warn!("cloud bucket no longer exists");
            update_phase(&current, BucketPhase::Offline, &ctx).await?;
        }
        BucketAction::Converged => {
            debug!("desired phase reached, skipping reconcile");
        }
        BucketAction::CreateBucket => {
            info!("creating cloud bucket");
            ctx.cloud.create_bucket(&name).await?;
            update_phase(&current, BucketPhase::Pending, &ctx).await?;
        }
        BucketAction::MarkOnline => {
            update_phase(&current, BucketPhase::Online, &ctx).await?;
        }
        BucketAction::Wait => {
            debug!(observed = %ObservedPhase(observed), "waiting for cloud to catch up");
        }
    }

    Ok(requeue)
}

/// Error policy for S3Bucket reconciliation
///
/// Nothing is escalated: the pass is simply retried after the usual interval,
/// re-reading fresh state first.
pub fn error_policy(bucket: Arc<S3Bucket>, error: &Error, ctx: Arc<BucketContext>) -> Action {
    if error.is_conflict() {
        warn!(bucket = %bucket.name_any(), "bucket changed during reconciliation, will re-read");
    } else {
        error!(
            ?error,
            bucket = %bucket.name_any(),
            retryable = error.is_retryable(),
            "bucket reconciliation failed"
        );
    }
    Action::requeue(ctx.requeue_interval)
}

/// Persist a new observed phase, refusing anything but a single forward step
///
/// [`determine_action`] only ever asks for forward steps; the check here keeps a
/// regression from ever being written should that table change.
async fn update_phase(
    bucket: &S3Bucket,
    phase: BucketPhase,
    ctx: &BucketContext,
) -> Result<(), Error> {
    let from = bucket.observed_phase();
    if !BucketPhase::is_forward_transition(from, phase) {
        warn!(from = %ObservedPhase(from), to = %phase, "refusing non-forward phase transition");
        return Ok(());
    }

    ctx.kube
        .patch_bucket_status(bucket, &S3BucketStatus::with_phase(phase))
        .await?;

    info!(from = %ObservedPhase(from), to = %phase, "updated bucket phase");
    Ok(())
}
