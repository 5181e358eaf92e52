//! Fire-and-forget materialization queue.
//!
//! API handlers enqueue jobs and return; a single worker drains the queue
//! under the process-scoped cancellation token, so jobs outlive the request
//! that produced them and are only cancelled at shutdown. A failed job is
//! logged and left to the recovery coordinator to re-drive.

use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use async_channel::Receiver;
use tokio_util::sync::CancellationToken;

use crate::localstack::LocalStackManager;
use crate::materializer::Materializer;
use kecs_core::models::{now_ms, status};
use kecs_core::store::{self, Db};

#[derive(Debug, Clone)]
pub enum Job {
    /// Make sure the cluster's namespace exists.
    EnsureCluster { cluster_name: String },
    /// Tear down the cluster's namespace.
    DeleteCluster { cluster_name: String },
    /// Create or rescale the Deployment projected from a service.
    ProjectService {
        cluster_name: String,
        service_arn: String,
    },
    /// Remove the Deployment of a deleted service.
    RemoveService {
        cluster_name: String,
        service_name: String,
    },
    /// Create the Pod for a freshly started task.
    StartTask { task_id: String },
    /// Delete the Pod of a stopping task.
    StopTask { task_id: String },
    /// Deploy LocalStack for a cluster that enables it.
    DeployLocalStack { cluster_name: String },
}

#[derive(Clone)]
pub struct Orchestrator {
    tx: async_channel::Sender<Job>,
}

impl Orchestrator {
    /// Start the worker and hand back the enqueue side.
    pub fn spawn(
        db: Db,
        materializer: Arc<Materializer>,
        localstack: Arc<LocalStackManager>,
        cancel: CancellationToken,
    ) -> Orchestrator {
        let (tx, rx) = async_channel::unbounded();
        let ctx = WorkerContext {
            db,
            materializer,
            localstack,
        };
        tokio::spawn(async move {
            if let Err(err) = worker_main(cancel, ctx, rx).await {
                tracing::info!(%err, "materialization worker stopped");
            }
        });
        Orchestrator { tx }
    }

    /// Queue without a worker; jobs are dropped. Used by tests of the
    /// synchronous path.
    pub fn disconnected() -> Orchestrator {
        let (tx, _rx) = async_channel::unbounded();
        Orchestrator { tx }
    }

    pub fn enqueue(&self, job: Job) {
        if let Err(err) = self.tx.try_send(job) {
            tracing::warn!(%err, "dropping materialization job");
        }
    }
}

struct WorkerContext {
    db: Db,
    materializer: Arc<Materializer>,
    localstack: Arc<LocalStackManager>,
}

async fn worker_main(
    cancel: CancellationToken,
    ctx: WorkerContext,
    rx: Receiver<Job>,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => bail!("shutdown"),
            job = rx.recv() => {
                let job = job.context("job queue closed")?;
                if let Err(err) = handle(&ctx, &job).await {
                    tracing::warn!(?job, %err, "materialization job failed");
                }
            }
        }
    }
}

async fn handle(ctx: &WorkerContext, job: &Job) -> Result<()> {
    match job {
        Job::EnsureCluster { cluster_name } => {
            let Some(cluster) = store::clusters::get(&ctx.db, cluster_name).await? else {
                return Ok(());
            };
            ctx.materializer.ensure_namespace(&cluster).await?;
        }
        Job::DeleteCluster { cluster_name } => {
            ctx.materializer.delete_namespace(cluster_name).await?;
        }
        Job::ProjectService {
            cluster_name,
            service_arn,
        } => {
            let Some(mut service) = store::services::get_by_arn(&ctx.db, service_arn).await?
            else {
                return Ok(());
            };
            let Some(task_def) =
                store::task_definitions::get_by_arn(&ctx.db, &service.task_definition_arn).await?
            else {
                bail!("task definition {} is gone", service.task_definition_arn);
            };
            ctx.materializer
                .project_service(cluster_name, &service, &task_def)
                .await?;

            // The substrate accepted the projection; reflect it in the record
            // so subsequent Describe calls converge.
            service.running_count = service.desired_count;
            service.pending_count = 0;
            let mut deployments = service.deployment_list();
            for deployment in &mut deployments {
                deployment.running_count = service.desired_count;
                deployment.pending_count = 0;
                deployment.rollout_state = status::COMPLETED.to_string();
                deployment.updated_at = now_ms() as f64 / 1000.0;
            }
            if !deployments.is_empty() {
                service.deployments = Some(serde_json::to_string(&deployments)?);
            }
            service.updated_at = now_ms();
            store::services::update(&ctx.db, &service).await?;
        }
        Job::RemoveService {
            cluster_name,
            service_name,
        } => {
            ctx.materializer
                .remove_service(cluster_name, service_name)
                .await?;
        }
        Job::StartTask { task_id } => {
            let Some(mut task) = store::tasks::get(&ctx.db, task_id).await? else {
                return Ok(());
            };
            if task.desired_status != status::RUNNING {
                return Ok(());
            }
            let Some(task_def) =
                store::task_definitions::get_by_arn(&ctx.db, &task.task_definition_arn).await?
            else {
                bail!("task definition {} is gone", task.task_definition_arn);
            };
            let cluster_name =
                kecs_core::arn::extract_cluster_name(&task.cluster_arn).to_string();
            let Some(placement) = ctx
                .materializer
                .create_pod_for_task(&cluster_name, &task, &task_def)
                .await?
            else {
                return Ok(());
            };

            let now = now_ms();
            task.pod_name = Some(placement.0);
            task.namespace = Some(placement.1);
            task.last_status = status::RUNNING.to_string();
            task.started_at = Some(now);
            task.connectivity = Some("CONNECTED".to_string());
            task.connectivity_at = Some(now);
            task.pull_started_at = Some(now);
            task.pull_stopped_at = Some(now);
            task.version += 1;
            store::tasks::update(&ctx.db, &task).await?;
        }
        Job::StopTask { task_id } => {
            let Some(mut task) = store::tasks::get(&ctx.db, task_id).await? else {
                return Ok(());
            };
            ctx.materializer.delete_pod_for_task(&task).await?;
            let now = now_ms();
            task.last_status = status::STOPPED.to_string();
            task.execution_stopped_at = Some(now);
            if task.stopped_at.is_none() {
                task.stopped_at = Some(now);
            }
            task.version += 1;
            store::tasks::update(&ctx.db, &task).await?;
        }
        Job::DeployLocalStack { cluster_name } => {
            ctx.localstack
                .deploy_for_cluster(&ctx.db, cluster_name)
                .await?;
        }
    }
    Ok(())
}
