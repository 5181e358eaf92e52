//! Startup reconvergence: walk persisted state and re-drive materialization
//! so the substrate matches the stored model again. Best-effort, retried on
//! a fixed schedule.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::localstack::LocalStackManager;
use crate::materializer::Materializer;
use kecs_core::models::{localstack_status, status};
use kecs_core::store::{self, Db};

const RETRY_INTERVAL: Duration = Duration::from_secs(60);

pub struct RecoveryCoordinator {
    db: Db,
    materializer: Arc<Materializer>,
    localstack: Arc<LocalStackManager>,
}

impl RecoveryCoordinator {
    pub fn new(
        db: Db,
        materializer: Arc<Materializer>,
        localstack: Arc<LocalStackManager>,
    ) -> Self {
        Self {
            db,
            materializer,
            localstack,
        }
    }

    /// First pass runs immediately, then on the retry interval until
    /// shutdown.
    pub fn spawn(self, cancel: CancellationToken) {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(RETRY_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                self.reconcile_once().await;
            }
            tracing::debug!("recovery coordinator stopped");
        });
    }

    async fn reconcile_once(&self) {
        let clusters = match store::clusters::list(&self.db).await {
            Ok(clusters) => clusters,
            Err(err) => {
                tracing::warn!(%err, "recovery could not list clusters");
                return;
            }
        };
        for cluster in &clusters {
            if let Err(err) = self.materializer.ensure_namespace(cluster).await {
                tracing::warn!(%err, cluster = %cluster.name, "recovery could not ensure namespace");
            }
            let needs_localstack = cluster.localstack().is_some_and(|state| {
                state.status == localstack_status::RUNNING
                    || state.status == localstack_status::DEPLOYING
            });
            if needs_localstack
                && let Err(err) = self
                    .localstack
                    .deploy_for_cluster(&self.db, &cluster.name)
                    .await
            {
                tracing::warn!(%err, cluster = %cluster.name, "recovery could not re-drive LocalStack");
            }
        }

        let services = match store::services::list_all(&self.db).await {
            Ok(services) => services,
            Err(err) => {
                tracing::warn!(%err, "recovery could not list services");
                return;
            }
        };
        for service in services {
            if service.status != status::ACTIVE {
                continue;
            }
            let cluster_name =
                kecs_core::arn::extract_cluster_name(&service.cluster_arn).to_string();
            let task_def = match store::task_definitions::get_by_arn(
                &self.db,
                &service.task_definition_arn,
            )
            .await
            {
                Ok(Some(task_def)) => task_def,
                Ok(None) => {
                    tracing::warn!(
                        service = %service.service_name,
                        task_definition = %service.task_definition_arn,
                        "recovery skipping service with missing task definition"
                    );
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%err, service = %service.service_name, "recovery read failed");
                    continue;
                }
            };
            if let Err(err) = self
                .materializer
                .project_service(&cluster_name, &service, &task_def)
                .await
            {
                tracing::warn!(%err, service = %service.service_name, "recovery could not project service");
            }
        }
    }
}
