use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    CapacityProviderStrategyItem, Failure, Tag, blob_value, epoch_secs, opt_epoch_secs, to_blob,
};
use super::{resolve_cluster, resolve_task_definition};
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::{Task, TaskDefinition, now_ms, status};
use kecs_core::store::{self, tasks::TaskFilters};
use kecs_orchestrator::Job;

const CACHE_KIND: &str = "task";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunTaskRequest {
    pub cluster: Option<String>,
    pub task_definition: Option<String>,
    pub count: Option<i64>,
    pub overrides: Option<Value>,
    pub started_by: Option<String>,
    pub group: Option<String>,
    pub launch_type: Option<String>,
    pub platform_version: Option<String>,
    pub network_configuration: Option<Value>,
    pub placement_constraints: Option<Value>,
    pub placement_strategy: Option<Value>,
    pub capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
    pub enable_execute_command: Option<bool>,
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTaskResponse {
    pub tasks: Vec<WireTask>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopTaskRequest {
    pub cluster: Option<String>,
    pub task: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTaskResponse {
    pub task: WireTask,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeTasksRequest {
    pub cluster: Option<String>,
    pub tasks: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTasksResponse {
    pub tasks: Vec<WireTask>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTasksRequest {
    pub cluster: Option<String>,
    pub service_name: Option<String>,
    pub family: Option<String>,
    pub container_instance: Option<String>,
    pub launch_type: Option<String>,
    pub desired_status: Option<String>,
    pub started_by: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    pub task_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTask {
    pub task_arn: String,
    pub cluster_arn: String,
    pub task_definition_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_instance_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overrides: Option<Value>,
    pub last_status: String,
    pub desired_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub containers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_by: Option<String>,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectivity_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_started_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_stopped_at: Option<f64>,
    pub created_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopping_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_stopped_at: Option<f64>,
    pub launch_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_status: Option<String>,
    pub enable_execute_command: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider_name: Option<String>,
}

fn to_wire(state: &AppState, task: &Task) -> WireTask {
    let cache = &state.cache;
    let id = &task.id;
    WireTask {
        task_arn: task.arn.clone(),
        cluster_arn: task.cluster_arn.clone(),
        task_definition_arn: task.task_definition_arn.clone(),
        container_instance_arn: task.container_instance_arn.clone(),
        overrides: blob_value(cache, CACHE_KIND, id, "overrides", task.overrides.as_deref()),
        last_status: task.last_status.clone(),
        desired_status: task.desired_status.clone(),
        cpu: task.cpu.clone(),
        memory: task.memory.clone(),
        containers: blob_value(cache, CACHE_KIND, id, "containers", task.containers.as_deref()),
        started_by: task.started_by.clone(),
        version: task.version,
        stop_code: task.stop_code.clone(),
        stopped_reason: task.stopped_reason.clone(),
        connectivity: task.connectivity.clone(),
        connectivity_at: opt_epoch_secs(task.connectivity_at),
        pull_started_at: opt_epoch_secs(task.pull_started_at),
        pull_stopped_at: opt_epoch_secs(task.pull_stopped_at),
        created_at: epoch_secs(task.created_at),
        started_at: opt_epoch_secs(task.started_at),
        stopping_at: opt_epoch_secs(task.stopping_at),
        stopped_at: opt_epoch_secs(task.stopped_at),
        execution_stopped_at: opt_epoch_secs(task.execution_stopped_at),
        launch_type: task.launch_type.clone(),
        platform_version: task.platform_version.clone(),
        group: task.group.clone(),
        attachments: blob_value(cache, CACHE_KIND, id, "attachments", task.attachments.as_deref()),
        attributes: blob_value(cache, CACHE_KIND, id, "attributes", task.attributes.as_deref()),
        tags: blob_value(cache, CACHE_KIND, id, "tags", task.tags.as_deref()),
        health_status: task.health_status.clone(),
        enable_execute_command: task.enable_execute_command,
        capacity_provider_name: task.capacity_provider_name.clone(),
    }
}

/// Initial per-container status blob, echoed until the substrate reports in.
fn initial_containers(task_def: &TaskDefinition, task_arn: &str) -> Option<String> {
    let defs: Vec<Value> = serde_json::from_str(&task_def.container_definitions).ok()?;
    let containers: Vec<Value> = defs
        .iter()
        .filter_map(|def| {
            let name = def.get("name")?.as_str()?;
            Some(serde_json::json!({
                "name": name,
                "image": def.get("image").and_then(|v| v.as_str()),
                "taskArn": task_arn,
                "lastStatus": status::PENDING,
            }))
        })
        .collect();
    serde_json::to_string(&containers).ok()
}

pub async fn run_task(state: &AppState, req: RunTaskRequest) -> Result<RunTaskResponse, EcsError> {
    let task_definition = req
        .task_definition
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskDefinition is required".to_string()))?;
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let task_def = resolve_task_definition(state, &task_definition).await?;

    let count = req.count.unwrap_or(1).clamp(1, 10);
    let overrides = to_blob(&req.overrides)?;
    let group = req
        .group
        .clone()
        .unwrap_or_else(|| format!("family:{}", task_def.family));

    let mut tasks = Vec::new();
    let mut failures = Vec::new();
    for _ in 0..count {
        let id = uuid::Uuid::new_v4().to_string();
        let arn = state.arn.task(&cluster.name, &id);
        let task = Task {
            id: id.clone(),
            arn: arn.clone(),
            cluster_arn: cluster.arn.clone(),
            task_definition_arn: task_def.arn.clone(),
            container_instance_arn: None,
            overrides: overrides.clone(),
            last_status: status::PENDING.to_string(),
            desired_status: status::RUNNING.to_string(),
            cpu: task_def.cpu.clone(),
            memory: task_def.memory.clone(),
            containers: initial_containers(&task_def, &arn),
            started_by: req.started_by.clone(),
            version: 1,
            stop_code: None,
            stopped_reason: None,
            connectivity: None,
            connectivity_at: None,
            pull_started_at: None,
            pull_stopped_at: None,
            started_at: None,
            stopping_at: None,
            stopped_at: None,
            execution_stopped_at: None,
            launch_type: req.launch_type.clone().unwrap_or_else(|| "FARGATE".to_string()),
            platform_version: req.platform_version.clone(),
            group: Some(group.clone()),
            attachments: None,
            attributes: None,
            tags: to_blob(&req.tags)?,
            health_status: None,
            enable_execute_command: req.enable_execute_command.unwrap_or(false),
            capacity_provider_name: None,
            pod_name: None,
            namespace: None,
            created_at: now_ms(),
        };

        match store::tasks::create(&state.db, &task).await {
            Ok(()) => {
                store::clusters::adjust_counters(&state.db, &cluster.name, 0, 1, 0).await?;
                state.orch.enqueue(Job::StartTask { task_id: id });
                tasks.push(to_wire(state, &task));
            }
            Err(err) => failures.push(Failure {
                arn,
                reason: err.type_name().to_string(),
                detail: Some(err.to_string()),
            }),
        }
    }
    Ok(RunTaskResponse { tasks, failures })
}

pub async fn stop_task(state: &AppState, req: StopTaskRequest) -> Result<StopTaskResponse, EcsError> {
    let id = req
        .task
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("task is required".to_string()))?;
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let task_id = kecs_core::arn::extract_task_id(&id);
    let mut task = store::tasks::get(&state.db, task_id)
        .await?
        .ok_or_else(|| EcsError::ResourceNotFound(format!("Task not found: {id}")))?;

    let now = now_ms();
    task.desired_status = status::STOPPED.to_string();
    task.last_status = "STOPPING".to_string();
    task.stop_code = Some("UserInitiated".to_string());
    task.stopped_reason = req.reason.or_else(|| Some("Task stopped by user".to_string()));
    task.stopping_at = Some(now);
    task.stopped_at = Some(now);
    task.version += 1;
    store::tasks::update(&state.db, &task).await?;
    store::clusters::adjust_counters(&state.db, &cluster.name, 0, -1, 0).await?;
    state.cache.invalidate(CACHE_KIND, &task.id);
    state.orch.enqueue(Job::StopTask {
        task_id: task.id.clone(),
    });

    Ok(StopTaskResponse {
        task: to_wire(state, &task),
    })
}

pub async fn describe_tasks(
    state: &AppState,
    req: DescribeTasksRequest,
) -> Result<DescribeTasksResponse, EcsError> {
    let identifiers = req.tasks.unwrap_or_default();
    if identifiers.is_empty() {
        return Err(EcsError::MissingParameter("Tasks cannot be empty.".to_string()));
    }
    let mut tasks = Vec::new();
    let mut failures = Vec::new();
    for id in identifiers {
        if id.is_empty() {
            failures.push(Failure::missing(""));
            continue;
        }
        let task_id = kecs_core::arn::extract_task_id(&id);
        match store::tasks::get(&state.db, task_id).await? {
            Some(task) => tasks.push(to_wire(state, &task)),
            None => failures.push(Failure::missing(id)),
        }
    }
    Ok(DescribeTasksResponse { tasks, failures })
}

pub async fn list_tasks(state: &AppState, req: ListTasksRequest) -> Result<ListTasksResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let filters = TaskFilters {
        cluster_arn: Some(cluster.arn.clone()),
        service_name: req
            .service_name
            .as_deref()
            .map(|s| kecs_core::arn::extract_service_name(s).to_string()),
        family: req.family.clone(),
        container_instance: req.container_instance.clone(),
        launch_type: req.launch_type.clone(),
        desired_status: req.desired_status.clone(),
        started_by: req.started_by.clone(),
    };
    let (tasks, next_token) =
        store::tasks::list_page(&state.db, &filters, req.max_results, req.next_token.as_deref())
            .await?;
    Ok(ListTasksResponse {
        task_arns: tasks.into_iter().map(|t| t.arn).collect(),
        next_token,
    })
}
