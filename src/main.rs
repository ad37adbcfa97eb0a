//! Bucket operator - converges groups of S3 buckets declared as Kubernetes resources

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, CustomResourceExt, Resource};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use bucket_operator::cloud::{S3CloudAdapter, S3Config};
use bucket_operator::controller::{bucket, bucket_group};
use bucket_operator::crd::{S3Bucket, S3BucketGroup};
use bucket_operator::naming::{
    validate_prefix, NameGenerator, SequentialNames, UuidNames, UUID_SUFFIX_LEN,
};
use bucket_operator::{DEFAULT_BUCKET_PREFIX, FIELD_MANAGER};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Longest suffix a sequential name can carry (`-` plus a u64)
const SEQUENTIAL_SUFFIX_LEN: usize = 21;

/// Bucket operator - keeps groups of S3 buckets at their declared size
#[derive(Parser, Debug)]
#[command(name = "bucket-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Only watch resources in this namespace (default: all namespaces)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// S3 endpoint override, e.g. http://localhost:4566 for LocalStack
    #[arg(long, env = "S3_ENDPOINT")]
    s3_endpoint: Option<String>,

    /// Region buckets are created in
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Use path-style bucket addressing
    #[arg(long, env = "S3_FORCE_PATH_STYLE", default_value_t = true, action = clap::ArgAction::Set)]
    force_path_style: bool,

    /// How names for new buckets are generated
    #[arg(long, env = "NAME_STRATEGY", value_enum, default_value_t = NameStrategy::Uuid)]
    name_strategy: NameStrategy,

    /// Prefix for generated bucket names
    #[arg(long, env = "BUCKET_PREFIX", default_value = DEFAULT_BUCKET_PREFIX)]
    bucket_prefix: String,
}

/// Bucket name generation strategy
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum NameStrategy {
    /// `<prefix>-<uuid>`, unique across restarts
    Uuid,
    /// `<prefix>-<n>`, readable but restarts from 1 with the process
    Sequential,
}

impl NameStrategy {
    fn generator(self, prefix: &str) -> anyhow::Result<Arc<dyn NameGenerator>> {
        match self {
            NameStrategy::Uuid => {
                validate_prefix(prefix, UUID_SUFFIX_LEN)?;
                Ok(Arc::new(UuidNames::new(prefix)))
            }
            NameStrategy::Sequential => {
                validate_prefix(prefix, SEQUENTIAL_SUFFIX_LEN)?;
                Ok(Arc::new(SequentialNames::new(prefix)))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // kube and the AWS SDK both pull in rustls; pick one provider for the process
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let group_crd = serde_yaml::to_string(&S3BucketGroup::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize S3BucketGroup CRD: {}", e))?;
        let bucket_crd = serde_yaml::to_string(&S3Bucket::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize S3Bucket CRD: {}", e))?;
        println!("{group_crd}---\n{bucket_crd}");
        return Ok(());
    }

    run_controllers(cli).await
}

/// Ensure both bucket CRDs are installed
///
/// The operator installs its own CRDs on startup using server-side apply,
/// so the CRD versions always match the operator version.
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [S3BucketGroup::crd(), S3Bucket::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "Installing CRD...");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }

    tracing::info!("All bucket CRDs installed/updated");
    Ok(())
}

/// Api for a namespaced resource, scoped to one namespace or to all of them
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run both controllers until a shutdown signal arrives
async fn run_controllers(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("Bucket operator starting...");

    let names = cli.name_strategy.generator(&cli.bucket_prefix)?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    ensure_crds_installed(&client).await?;

    let s3_config = S3Config {
        endpoint: cli.s3_endpoint,
        region: cli.region,
        force_path_style: cli.force_path_style,
    };
    tracing::info!(
        endpoint = ?s3_config.endpoint,
        region = %s3_config.region,
        "Connecting to S3"
    );
    let cloud = Arc::new(S3CloudAdapter::from_config(&s3_config).await);

    let namespace = cli.namespace.as_deref();
    let groups: Api<S3BucketGroup> = scoped_api(&client, namespace);
    let buckets: Api<S3Bucket> = scoped_api(&client, namespace);
    let owned_buckets: Api<S3Bucket> = scoped_api(&client, namespace);

    let group_ctx = Arc::new(bucket_group::BucketGroupContext::new(client.clone(), names));
    let bucket_ctx = Arc::new(bucket::BucketContext::new(client, cloud));

    tracing::info!(namespace = ?namespace, "Starting bucket controllers...");
    tracing::info!("  - S3BucketGroup controller");
    tracing::info!("  - S3Bucket controller");

    let watcher_config = WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);

    // Bucket changes wake the owning group; deletions are not forwarded
    let bucket_changes = watcher::watcher(owned_buckets, watcher_config.clone())
        .default_backoff()
        .applied_objects();

    let group_controller = Controller::new(groups, watcher_config.clone())
        .watches_stream(bucket_changes, |bucket: S3Bucket| {
            bucket_group::group_for_bucket(&bucket)
        })
        .shutdown_on_signal()
        .run(
            bucket_group::reconcile,
            bucket_group::error_policy,
            group_ctx,
        )
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "BucketGroup reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "BucketGroup reconciliation error");
                }
            }
        });

    let bucket_controller = Controller::new(buckets, watcher_config)
        .shutdown_on_signal()
        .run(bucket::reconcile, bucket::error_policy, bucket_ctx)
        .for_each(|result| async move {
            match result {
                Ok(action) => {
                    tracing::debug!(?action, "Bucket reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Bucket reconciliation error");
                }
            }
        });

    tokio::select! {
        _ = group_controller => {
            tracing::info!("BucketGroup controller completed");
        }
        _ = bucket_controller => {
            tracing::info!("Bucket controller completed");
        }
    }

    tracing::info!("Bucket operator shutting down");
    Ok(())
}
