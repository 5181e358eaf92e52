use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Response;
use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;

use kecs_common::shutdown::shutdown_signal;
use kecs_core::arn::ArnBuilder;
use kecs_core::cache::JsonFieldCache;
use kecs_core::store::{self, Db};
use kecs_orchestrator::Orchestrator;
use kecs_orchestrator::client::ClientProvider;
use kecs_orchestrator::localstack::{LocalStackConfig, LocalStackManager};
use kecs_orchestrator::materializer::Materializer;
use kecs_orchestrator::recovery::RecoveryCoordinator;

use crate::args::ServerArgs;
use crate::dispatch;
use crate::proxy::LocalStackProxy;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub arn: ArnBuilder,
    pub cache: JsonFieldCache,
    pub orch: Orchestrator,
    pub proxy: Arc<LocalStackProxy>,
    pub localstack_enabled: bool,
}

async fn health() -> &'static str {
    "OK"
}

/// Probe the LocalStack upstream through the proxy's own client.
async fn localstack_health(State(state): State<AppState>) -> Response {
    state.proxy.health().await
}

/// Run the control-plane HTTP server.
pub async fn run_server(args: ServerArgs) -> Result<()> {
    let db = Db::open(&args.state.data_dir.join("kecs.db"))
        .context("failed to open state database")?;

    let kube_context = args
        .instance
        .instance
        .as_deref()
        .map(|instance| format!("k3d-{instance}"));
    let clients = Arc::new(ClientProvider::new(kube_context));
    let materializer = Arc::new(Materializer::new(
        clients.clone(),
        args.instance.region.clone(),
    ));
    let localstack_config = LocalStackConfig::new(
        args.features.localstack_enabled,
        args.features.traefik_enabled,
        args.features.container_mode,
        args.instance.instance.clone(),
    );
    let (localstack, endpoint_rx) = LocalStackManager::new(localstack_config, clients);
    let localstack = Arc::new(localstack);

    let cancel = CancellationToken::new();
    let orch = Orchestrator::spawn(
        db.clone(),
        materializer.clone(),
        localstack.clone(),
        cancel.clone(),
    );

    if args.state.auto_recover_state {
        RecoveryCoordinator::new(db.clone(), materializer.clone(), localstack.clone())
            .spawn(cancel.clone());
    } else {
        tracing::info!("state recovery disabled");
    }

    let state = AppState {
        db: db.clone(),
        arn: ArnBuilder::new(args.instance.region.as_str(), args.instance.account_id.as_str()),
        cache: JsonFieldCache::new(),
        orch,
        proxy: Arc::new(LocalStackProxy::new(endpoint_rx)),
        localstack_enabled: args.features.localstack_enabled,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/health/localstack", get(localstack_health))
        .fallback(dispatch::dispatch)
        .with_state(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    tracing::info!(%addr, region = %args.instance.region, "starting control-plane server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    cancel.cancel();
    if !args.state.keep_clusters_on_shutdown {
        teardown_namespaces(&db, &materializer).await;
    }
    tracing::info!("server stopped gracefully");
    Ok(())
}

async fn teardown_namespaces(db: &Db, materializer: &Materializer) {
    let clusters = match store::clusters::list(db).await {
        Ok(clusters) => clusters,
        Err(err) => {
            tracing::warn!(%err, "shutdown teardown could not list clusters");
            return;
        }
    };
    for cluster in clusters {
        if let Err(err) = materializer.delete_namespace(&cluster.name).await {
            tracing::warn!(%err, cluster = %cluster.name, "shutdown teardown failed");
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    let (_tx, rx) = tokio::sync::watch::channel(None);
    AppState {
        db: Db::open_in_memory().expect("in-memory db"),
        arn: ArnBuilder::new("us-east-1", "123456789012"),
        cache: JsonFieldCache::new(),
        orch: Orchestrator::disconnected(),
        proxy: Arc::new(LocalStackProxy::new(rx)),
        localstack_enabled: false,
    }
}
