//! End-to-end convergence tests
//!
//! Runs both reconcilers against an in-memory object store and an in-memory
//! cloud, pass after pass, the way the controller runtime would. The store
//! enforces resource versions, unique names and uid preconditions so the
//! reconcilers see the same failure modes as against a real API server.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;

use bucket_operator::cloud::CloudAdapter;
use bucket_operator::controller::bucket::{self, BucketContext, BucketKubeClient};
use bucket_operator::controller::bucket_group::{
    self, BucketGroupContext, BucketGroupKubeClient,
};
use bucket_operator::crd::{
    BucketPhase, S3Bucket, S3BucketGroup, S3BucketGroupSpec, S3BucketGroupStatus, S3BucketStatus,
};
use bucket_operator::naming::SequentialNames;
use bucket_operator::Error;

const NAMESPACE: &str = "default";

fn api_error(code: u16, reason: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    }))
}

#[derive(Default)]
struct StoreState {
    groups: BTreeMap<String, S3BucketGroup>,
    buckets: BTreeMap<String, S3Bucket>,
    version: u64,
    created_names: Vec<String>,
    phase_history: BTreeMap<String, Vec<BucketPhase>>,
}

impl StoreState {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

/// In-memory object store with API-server-like write semantics
#[derive(Default)]
struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    fn add_group(&self, name: &str, desired: u32) {
        let mut state = self.state.lock().unwrap();
        let mut group = S3BucketGroup::new(
            name,
            S3BucketGroupSpec {
                desired_bucket_count: desired,
            },
        );
        group.metadata.namespace = Some(NAMESPACE.to_string());
        group.metadata.resource_version = state.next_version();
        state.groups.insert(name.to_string(), group);
    }

    fn group(&self, name: &str) -> S3BucketGroup {
        self.state.lock().unwrap().groups[name].clone()
    }

    fn buckets(&self) -> Vec<S3Bucket> {
        self.state.lock().unwrap().buckets.values().cloned().collect()
    }

    fn created_names(&self) -> Vec<String> {
        self.state.lock().unwrap().created_names.clone()
    }

    fn phase_history(&self) -> BTreeMap<String, Vec<BucketPhase>> {
        self.state.lock().unwrap().phase_history.clone()
    }
}

#[async_trait]
impl BucketKubeClient for InMemoryStore {
    async fn get_bucket(&self, _namespace: &str, name: &str) -> Result<Option<S3Bucket>, Error> {
        Ok(self.state.lock().unwrap().buckets.get(name).cloned())
    }

    async fn patch_bucket_status(
        &self,
        bucket: &S3Bucket,
        status: &S3BucketStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let name = bucket.name_any();
        let stored = state
            .buckets
            .get_mut(&name)
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != bucket.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = version;
        if let Some(phase) = status.phase {
            state.phase_history.entry(name).or_default().push(phase);
        }
        Ok(())
    }
}

#[async_trait]
impl BucketGroupKubeClient for InMemoryStore {
    async fn get_group(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<S3BucketGroup>, Error> {
        Ok(self.state.lock().unwrap().groups.get(name).cloned())
    }

    async fn list_owned_buckets(&self, group: &S3BucketGroup) -> Result<Vec<S3Bucket>, Error> {
        let group_name = group.name_any();
        Ok(self
            .state
            .lock()
            .unwrap()
            .buckets
            .values()
            .filter(|b| b.owning_group() == Some(group_name.as_str()))
            .cloned()
            .collect())
    }

    async fn create_bucket(&self, bucket: &S3Bucket) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = bucket.name_any();
        if state.buckets.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = bucket.clone();
        stored.metadata.uid = Some(format!("uid-{}", name));
        stored.metadata.resource_version = state.next_version();
        state.created_names.push(name.clone());
        state.buckets.insert(name, stored);
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &S3Bucket) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let name = bucket.name_any();
        let stored_uid = match state.buckets.get(&name) {
            Some(stored) => stored.metadata.uid.clone(),
            None => return Ok(()),
        };
        if stored_uid != bucket.metadata.uid {
            return Err(api_error(409, "Conflict"));
        }
        state.buckets.remove(&name);
        Ok(())
    }

    async fn patch_group_status(
        &self,
        group: &S3BucketGroup,
        status: &S3BucketGroupStatus,
    ) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let stored = state
            .groups
            .get_mut(&group.name_any())
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.metadata.resource_version != group.metadata.resource_version {
            return Err(api_error(409, "Conflict"));
        }
        stored.status = Some(status.clone());
        stored.metadata.resource_version = version;
        Ok(())
    }
}

/// In-memory cloud that counts every mutating call
#[derive(Default)]
struct InMemoryCloud {
    buckets: Mutex<BTreeSet<String>>,
    create_calls: AtomicUsize,
}

impl InMemoryCloud {
    /// Delete a bucket out-of-band
    fn remove(&self, name: &str) {
        self.buckets.lock().unwrap().remove(name);
    }

    fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudAdapter for InMemoryCloud {
    async fn list_bucket_names(&self) -> Result<BTreeSet<String>, Error> {
        Ok(self.buckets.lock().unwrap().clone())
    }

    async fn create_bucket(&self, name: &str) -> Result<(), Error> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if !self.buckets.lock().unwrap().insert(name.to_string()) {
            return Err(Error::cloud(format!("BucketAlreadyExists: {}", name)));
        }
        Ok(())
    }
}

/// Both reconcilers wired to the same store and cloud
struct Harness {
    store: Arc<InMemoryStore>,
    cloud: Arc<InMemoryCloud>,
    group_ctx: Arc<BucketGroupContext>,
    bucket_ctx: Arc<BucketContext>,
}

impl Harness {
    fn with_group(name: &str, desired: u32) -> Self {
        let store = Arc::new(InMemoryStore::default());
        store.add_group(name, desired);
        let cloud = Arc::new(InMemoryCloud::default());

        let group_ctx = Arc::new(
            BucketGroupContext::with_clients(
                store.clone(),
                Arc::new(SequentialNames::new("my-s3-bucket")),
            )
            .creation_spacing(Duration::ZERO),
        );
        let bucket_ctx = Arc::new(BucketContext::with_clients(store.clone(), cloud.clone()));

        Self {
            store,
            cloud,
            group_ctx,
            bucket_ctx,
        }
    }

    /// One group pass followed by one pass over every bucket record
    async fn run_pass(&self, group: &str) {
        let current = Arc::new(self.store.group(group));
        if let Err(e) = bucket_group::reconcile(current.clone(), self.group_ctx.clone()).await {
            bucket_group::error_policy(current, &e, self.group_ctx.clone());
        }

        for record in self.store.buckets() {
            let record = Arc::new(record);
            if let Err(e) = bucket::reconcile(record.clone(), self.bucket_ctx.clone()).await {
                bucket::error_policy(record, &e, self.bucket_ctx.clone());
            }
        }
    }

    async fn run_passes(&self, group: &str, passes: usize) {
        for _ in 0..passes {
            self.run_pass(group).await;
        }
    }

    fn phases(&self) -> Vec<Option<BucketPhase>> {
        self.store
            .buckets()
            .iter()
            .map(|b| b.observed_phase())
            .collect()
    }
}

/// Story: a group asking for three buckets ends up with three online buckets
#[tokio::test]
async fn story_group_converges_to_desired_count() {
    let harness = Harness::with_group("analytics", 3);

    harness.run_passes("analytics", 4).await;

    assert_eq!(harness.phases(), vec![Some(BucketPhase::Online); 3]);
    assert_eq!(harness.store.group("analytics").observed_count(), 3);
    assert_eq!(harness.cloud.list_bucket_names().await.unwrap().len(), 3);
}

/// Story: once converged, further passes change nothing anywhere
#[tokio::test]
async fn story_converged_system_stays_quiet() {
    let harness = Harness::with_group("analytics", 2);
    harness.run_passes("analytics", 4).await;

    let creates = harness.cloud.create_calls();
    let history = harness.store.phase_history();
    let records = harness.store.created_names();

    harness.run_passes("analytics", 5).await;

    assert_eq!(harness.cloud.create_calls(), creates);
    assert_eq!(harness.store.phase_history(), history);
    assert_eq!(harness.store.created_names(), records);
}

/// Story: a bucket deleted out-of-band is marked offline, reaped and replaced
#[tokio::test]
async fn story_externally_deleted_bucket_is_replaced() {
    let harness = Harness::with_group("analytics", 3);
    harness.run_passes("analytics", 4).await;

    let victim = harness.store.buckets()[0].name_any();
    harness.cloud.remove(&victim);
    let creates_before = harness.cloud.create_calls();

    // Detection pass: the bucket goes offline without any cloud mutation
    harness.run_pass("analytics").await;
    let offline: Vec<_> = harness
        .store
        .buckets()
        .into_iter()
        .filter(|b| b.observed_phase() == Some(BucketPhase::Offline))
        .map(|b| b.name_any())
        .collect();
    assert_eq!(offline, vec![victim.clone()]);
    assert_eq!(harness.cloud.create_calls(), creates_before);

    harness.run_passes("analytics", 5).await;

    let names: Vec<_> = harness.store.buckets().iter().map(|b| b.name_any()).collect();
    assert!(!names.contains(&victim), "offline bucket should be reaped");
    assert_eq!(harness.phases(), vec![Some(BucketPhase::Online); 3]);
    assert_eq!(harness.store.group("analytics").observed_count(), 3);
}

/// Story: no two bucket records ever share a name, even across replacements
#[tokio::test]
async fn story_generated_names_are_unique() {
    let harness = Harness::with_group("analytics", 3);
    harness.run_passes("analytics", 4).await;

    for _ in 0..2 {
        let victim = harness.store.buckets()[0].name_any();
        harness.cloud.remove(&victim);
        harness.run_passes("analytics", 6).await;
    }

    let created = harness.store.created_names();
    let unique: BTreeSet<_> = created.iter().collect();
    assert_eq!(created.len(), 5);
    assert_eq!(unique.len(), created.len());
}

/// Story: every recorded phase change is a single step forward
#[tokio::test]
async fn story_phase_history_only_moves_forward() {
    let harness = Harness::with_group("analytics", 3);
    harness.run_passes("analytics", 4).await;

    let victim = harness.store.buckets()[1].name_any();
    harness.cloud.remove(&victim);
    harness.run_passes("analytics", 6).await;

    let lifecycle = [BucketPhase::Pending, BucketPhase::Online, BucketPhase::Offline];
    for (name, history) in harness.store.phase_history() {
        assert!(
            lifecycle.starts_with(&history),
            "bucket {} moved out of order: {:?}",
            name,
            history
        );
    }
}

/// Story: scaling a group down leaves the existing buckets in place
#[tokio::test]
async fn story_scale_down_keeps_buckets() {
    let harness = Harness::with_group("analytics", 3);
    harness.run_passes("analytics", 4).await;

    harness.store.add_group("analytics", 1);
    harness.run_passes("analytics", 3).await;

    assert_eq!(harness.store.buckets().len(), 3);
    assert_eq!(harness.store.group("analytics").observed_count(), 3);
}

/// Story: a stale status write is rejected by the store and nothing is lost
#[tokio::test]
async fn story_stale_group_status_write_conflicts() {
    let harness = Harness::with_group("analytics", 0);
    let stale = harness.store.group("analytics");

    harness.store.add_group("analytics", 0);

    let err = BucketGroupKubeClient::patch_group_status(
        harness.store.as_ref(),
        &stale,
        &S3BucketGroupStatus::with_count(7),
    )
    .await
    .unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(harness.store.group("analytics").observed_count(), 0);
}
