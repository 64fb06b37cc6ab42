// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::{Context as _, Result};
use axum::{routing::get, Router};
use clap::Parser;
use fleetgate::{
    config::{load_controller_config, ConfigHandle},
    constants::{
        DEFAULT_METRICS_BIND_ADDRESS, DEFAULT_PROBE_BIND_ADDRESS, ERROR_REQUEUE_DURATION_SECS,
        LEADER_LEASE_NAME, OPERATOR_CONFIG_NAME, RECONCILE_INTERVAL_SECS, TOKIO_WORKER_THREADS,
    },
    context::Context,
    crd::ClusterIdentity,
    identity::{load_identity, run_identity_refresher, ProxySession, SharedProxy},
    labels::{FLEETGATE_CLUSTER_LABEL, FLEETGATE_CLUSTER_NAMESPACE_LABEL, K8S_MANAGED_BY, MANAGED_BY_FLEETGATE},
    metrics::{record_reconciliation, render_metrics},
    platform::kube::KubePlatformClient,
    proxy::http::HttpProxyClientFactory,
    proxy::ProxyClientFactory,
    reconcilers::{reconcile_cluster_identity, reconcile_operator_config, ConfigWatchState},
    tokens::RandomGenerator,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    runtime::{
        controller::Action,
        reflector::ObjectRef,
        watcher::Config as WatcherConfig,
        Controller,
    },
    Api, Client, ResourceExt,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Command-line arguments for the operator process.
#[derive(Parser, Debug)]
#[command(
    name = "fleetgate",
    about = "Teleport fleet enrollment operator for Kubernetes",
    version
)]
struct Args {
    /// The address the metrics endpoint binds to
    #[arg(long, default_value = DEFAULT_METRICS_BIND_ADDRESS)]
    metrics_bind_address: String,

    /// The address the health probe endpoint binds to
    #[arg(long, default_value = DEFAULT_PROBE_BIND_ADDRESS)]
    health_probe_bind_address: String,

    /// Enable leader election; ensures at most one active operator
    #[arg(long)]
    leader_elect: bool,

    /// Also delete teleport-kube-agent state secrets during teardown
    #[arg(long)]
    cleanup_agent_state: bool,

    /// Namespace the operator is deployed in
    #[arg(long)]
    namespace: String,
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

fn main() -> Result<()> {
    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("fleetgate-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging with custom format
    //
    // Respects RUST_LOG environment variable if set, otherwise defaults to INFO level
    // Example: RUST_LOG=debug fleetgate --namespace fleetgate
    //
    // Respects RUST_LOG_FORMAT environment variable for output format
    // Example: RUST_LOG_FORMAT=json fleetgate --namespace fleetgate
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    info!("Starting Teleport fleet enrollment operator");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    let platform = Arc::new(KubePlatformClient::new(client.clone()));

    // Startup fails fast: without configuration and a proxy session there is
    // nothing to reconcile
    let controller_config = load_controller_config(platform.as_ref(), &args.namespace)
        .await
        .context("load operator configuration")?;
    let identity = load_identity(platform.as_ref(), &args.namespace)
        .await
        .context("load operator proxy identity")?;

    let factory = Arc::new(HttpProxyClientFactory::new());
    let proxy_client = factory
        .connect(&controller_config.proxy_addr, &identity)
        .await
        .context("connect to access proxy")?;
    info!(proxy = %controller_config.proxy_addr, "Connected to access proxy");

    let proxy = Arc::new(SharedProxy::new(ProxySession {
        client: proxy_client,
        identity,
    }));
    let config_handle = ConfigHandle::new(controller_config);

    let ctx = Arc::new(Context {
        platform: platform.clone(),
        proxy: proxy.clone(),
        config: config_handle.clone(),
        generator: Arc::new(RandomGenerator::new()),
        operator_namespace: args.namespace.clone(),
        cleanup_agent_state: args.cleanup_agent_state,
    });

    // Probe and metrics servers run regardless of leadership
    tokio::spawn(serve_probes(args.health_probe_bind_address.clone()));
    tokio::spawn(serve_metrics(args.metrics_bind_address.clone()));

    let _lease_task;
    if args.leader_elect {
        let manager = kube_lease_manager::LeaseManagerBuilder::new(client.clone(), LEADER_LEASE_NAME)
            .with_namespace(args.namespace.clone())
            .build()
            .await
            .context("create leader election lease manager")?;
        let (mut leadership, task) = manager.watch().await;
        _lease_task = task;

        info!(lease = LEADER_LEASE_NAME, "Waiting for leadership");
        while !*leadership.borrow_and_update() {
            leadership
                .changed()
                .await
                .context("leader election channel closed")?;
        }
        info!("Acquired leadership");
    }

    info!("Starting all controllers");

    // Controllers should never exit - if one does, log it and exit the process
    tokio::select! {
        result = run_cluster_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: ClusterIdentity controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("ClusterIdentity controller exited unexpectedly without error")
        }
        result = run_config_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: OperatorConfig controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("OperatorConfig controller exited unexpectedly without error")
        }
        result = run_identity_refresher(proxy, platform, factory, config_handle, args.namespace.clone()) => {
            error!("CRITICAL: identity refresher exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("identity refresher exited unexpectedly without error")
        }
    }
}

/// Map an enrollment artifact back to its owning `ClusterIdentity`.
///
/// Artifacts carry the owner name and namespace as labels; anything without
/// them is not ours and maps to nothing.
fn artifact_owner<K: ResourceExt>(obj: &K) -> Option<ObjectRef<ClusterIdentity>> {
    let labels = obj.labels();
    let name = labels.get(FLEETGATE_CLUSTER_LABEL)?;
    let namespace = labels.get(FLEETGATE_CLUSTER_NAMESPACE_LABEL)?;
    Some(ObjectRef::new(name).within(namespace))
}

/// Run the `ClusterIdentity` controller.
///
/// Triggers: the `ClusterIdentity` watch itself, label-matched enrollment
/// artifacts mapped back to their owner, and the fixed requeue interval
/// after every successful reconciliation.
async fn run_cluster_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting ClusterIdentity controller");

    let clusters = Api::<ClusterIdentity>::all(client.clone());
    let secrets = Api::<Secret>::all(client.clone());
    let config_maps = Api::<ConfigMap>::all(client.clone());
    let artifact_watch =
        WatcherConfig::default().labels(&format!("{K8S_MANAGED_BY}={MANAGED_BY_FLEETGATE}"));

    Controller::new(clusters, WatcherConfig::default())
        .watches(secrets, artifact_watch.clone(), |secret: Secret| {
            artifact_owner(&secret)
        })
        .watches(config_maps, artifact_watch, |config_map: ConfigMap| {
            artifact_owner(&config_map)
        })
        .run(reconcile_cluster_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Reconcile wrapper for `ClusterIdentity`.
async fn reconcile_cluster_wrapper(
    cluster: Arc<ClusterIdentity>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        cluster = %cluster.name_any(),
        namespace = ?cluster.namespace(),
        "Reconcile wrapper called for ClusterIdentity"
    );

    let start = Instant::now();
    match reconcile_cluster_identity(ctx, &cluster).await {
        Ok(()) => {
            record_reconciliation("ClusterIdentity", "success", start.elapsed());
            if cluster.metadata.deletion_timestamp.is_some() {
                // Teardown finished; the object vanishes once the finalizer is gone
                Ok(Action::await_change())
            } else {
                // The fixed tick is the only way proxy-side token expiry is noticed
                Ok(Action::requeue(Duration::from_secs(RECONCILE_INTERVAL_SECS)))
            }
        }
        Err(e) => {
            record_reconciliation("ClusterIdentity", "error", start.elapsed());
            error!("Failed to reconcile ClusterIdentity {}: {:?}", cluster.name_any(), e);
            Err(e.into())
        }
    }
}

/// Run the operator configuration controller.
///
/// Watches only the singleton ConfigMap via a field selector.
async fn run_config_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting OperatorConfig controller");

    let api = Api::<ConfigMap>::namespaced(client, &ctx.operator_namespace);
    let watch =
        WatcherConfig::default().fields(&format!("metadata.name={OPERATOR_CONFIG_NAME}"));
    let state = Arc::new(ConfigWatchState::new());

    Controller::new(api, watch)
        .run(
            move |config_map: Arc<ConfigMap>, ctx: Arc<Context>| {
                let state = state.clone();
                async move {
                    let start = Instant::now();
                    match reconcile_operator_config(ctx, &state, &config_map).await {
                        Ok(()) => {
                            record_reconciliation("OperatorConfig", "success", start.elapsed());
                            Ok(Action::await_change())
                        }
                        Err(e) => {
                            record_reconciliation("OperatorConfig", "error", start.elapsed());
                            error!("Failed to process operator configuration: {:?}", e);
                            Err(ReconcileError::from(e))
                        }
                    }
                }
            },
            error_policy,
            ctx,
        )
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Error policy shared by both controllers.
fn error_policy<K>(_obj: Arc<K>, _error: &ReconcileError, _ctx: Arc<Context>) -> Action {
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}

/// Serve `/healthz` and `/readyz`.
async fn serve_probes(bind_address: String) -> Result<()> {
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind health probe server to {bind_address}"))?;
    info!(address = %bind_address, "Health probe server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Serve Prometheus metrics.
async fn serve_metrics(bind_address: String) -> Result<()> {
    let app = Router::new().route(
        fleetgate::constants::METRICS_SERVER_PATH,
        get(|| async { render_metrics() }),
    );
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind metrics server to {bind_address}"))?;
    info!(address = %bind_address, "Metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
