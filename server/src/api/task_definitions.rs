use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{Tag, blob_value, opt_epoch_secs, to_blob};
use super::resolve_task_definition;
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::TaskDefinition;
use kecs_core::store;

const CACHE_KIND: &str = "task-definition";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegisterTaskDefinitionRequest {
    pub family: Option<String>,
    pub container_definitions: Option<Value>,
    pub volumes: Option<Value>,
    pub placement_constraints: Option<Value>,
    pub proxy_configuration: Option<Value>,
    pub runtime_platform: Option<Value>,
    pub inference_accelerators: Option<Value>,
    pub requires_compatibilities: Option<Vec<String>>,
    pub network_mode: Option<String>,
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub task_role_arn: Option<String>,
    pub execution_role_arn: Option<String>,
    pub pid_mode: Option<String>,
    pub ipc_mode: Option<String>,
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionResponse {
    pub task_definition: WireTaskDefinition,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskDefinitionIdRequest {
    pub task_definition: Option<String>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTaskDefinitionsRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionsResponse {
    pub task_definition_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListTaskDefinitionFamiliesRequest {
    pub family_prefix: Option<String>,
    pub status: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTaskDefinitionFamiliesResponse {
    pub families: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskDefinition {
    pub task_definition_arn: String,
    pub family: String,
    pub revision: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_definitions: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_configuration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_platform: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inference_accelerators: Option<Value>,
    pub requires_compatibilities: Vec<String>,
    pub compatibilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_role_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipc_mode: Option<String>,
    pub registered_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deregistered_at: Option<f64>,
}

fn to_wire(state: &AppState, task_def: &TaskDefinition) -> WireTaskDefinition {
    let cache = &state.cache;
    let id = &task_def.arn;
    let compatibilities: Vec<String> = task_def
        .requires_compatibilities
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    WireTaskDefinition {
        task_definition_arn: task_def.arn.clone(),
        family: task_def.family.clone(),
        revision: task_def.revision,
        status: task_def.status.clone(),
        container_definitions: blob_value(
            cache,
            CACHE_KIND,
            id,
            "container_definitions",
            Some(&task_def.container_definitions),
        ),
        volumes: blob_value(cache, CACHE_KIND, id, "volumes", task_def.volumes.as_deref()),
        placement_constraints: blob_value(
            cache,
            CACHE_KIND,
            id,
            "placement_constraints",
            task_def.placement_constraints.as_deref(),
        ),
        proxy_configuration: blob_value(
            cache,
            CACHE_KIND,
            id,
            "proxy_configuration",
            task_def.proxy_configuration.as_deref(),
        ),
        runtime_platform: blob_value(
            cache,
            CACHE_KIND,
            id,
            "runtime_platform",
            task_def.runtime_platform.as_deref(),
        ),
        inference_accelerators: blob_value(
            cache,
            CACHE_KIND,
            id,
            "inference_accelerators",
            task_def.inference_accelerators.as_deref(),
        ),
        requires_compatibilities: compatibilities.clone(),
        compatibilities,
        network_mode: task_def.network_mode.clone(),
        cpu: task_def.cpu.clone(),
        memory: task_def.memory.clone(),
        task_role_arn: task_def.task_role_arn.clone(),
        execution_role_arn: task_def.execution_role_arn.clone(),
        pid_mode: task_def.pid_mode.clone(),
        ipc_mode: task_def.ipc_mode.clone(),
        registered_at: super::types::epoch_secs(task_def.registered_at),
        deregistered_at: opt_epoch_secs(task_def.deregistered_at),
    }
}

/// Requested compatibilities unioned with the inferred ones: every
/// definition can run on EC2, and FARGATE when it is awsvpc with task-level
/// cpu and memory.
fn infer_compatibilities(req: &RegisterTaskDefinitionRequest) -> Vec<String> {
    let mut compatibilities = req.requires_compatibilities.clone().unwrap_or_default();
    if !compatibilities.iter().any(|c| c == "EC2") {
        compatibilities.push("EC2".to_string());
    }
    let fargate_capable =
        req.network_mode.as_deref() == Some("awsvpc") && req.cpu.is_some() && req.memory.is_some();
    if fargate_capable && !compatibilities.iter().any(|c| c == "FARGATE") {
        compatibilities.push("FARGATE".to_string());
    }
    compatibilities
}

pub async fn register_task_definition(
    state: &AppState,
    req: RegisterTaskDefinitionRequest,
) -> Result<TaskDefinitionResponse, EcsError> {
    let family = req
        .family
        .clone()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("Family is required".to_string()))?;
    let container_count = req
        .container_definitions
        .as_ref()
        .and_then(|v| v.as_array())
        .map(|a| a.len())
        .unwrap_or(0);
    if container_count == 0 {
        return Err(EcsError::MissingParameter(
            "At least one container definition is required".to_string(),
        ));
    }

    let compatibilities = infer_compatibilities(&req);
    let task_def = TaskDefinition {
        family,
        revision: 0,
        arn: String::new(),
        status: String::new(),
        container_definitions: to_blob(&req.container_definitions)?
            .unwrap_or_else(|| "[]".to_string()),
        volumes: to_blob(&req.volumes)?,
        placement_constraints: to_blob(&req.placement_constraints)?,
        proxy_configuration: to_blob(&req.proxy_configuration)?,
        runtime_platform: to_blob(&req.runtime_platform)?,
        inference_accelerators: to_blob(&req.inference_accelerators)?,
        requires_compatibilities: Some(compatibilities.join(",")),
        network_mode: req.network_mode,
        cpu: req.cpu,
        memory: req.memory,
        task_role_arn: req.task_role_arn,
        execution_role_arn: req.execution_role_arn,
        pid_mode: req.pid_mode,
        ipc_mode: req.ipc_mode,
        tags: to_blob(&req.tags)?,
        registered_at: 0,
        deregistered_at: None,
    };

    let registered = store::task_definitions::register(&state.db, &state.arn, task_def).await?;
    Ok(TaskDefinitionResponse {
        task_definition: to_wire(state, &registered),
    })
}

pub async fn deregister_task_definition(
    state: &AppState,
    req: TaskDefinitionIdRequest,
) -> Result<TaskDefinitionResponse, EcsError> {
    let id = req
        .task_definition
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskDefinition is required".to_string()))?;
    let (family, revision) = kecs_core::arn::parse_task_definition(&id);
    let revision = revision.ok_or_else(|| {
        EcsError::InvalidParameter(format!(
            "Task definition revision is required to deregister: {id}"
        ))
    })?;
    let deregistered = store::task_definitions::deregister(&state.db, &family, revision)
        .await?
        .ok_or_else(|| {
            EcsError::ResourceNotFound(format!("Task definition not found: {id}"))
        })?;
    state.cache.invalidate(CACHE_KIND, &deregistered.arn);
    Ok(TaskDefinitionResponse {
        task_definition: to_wire(state, &deregistered),
    })
}

pub async fn describe_task_definition(
    state: &AppState,
    req: TaskDefinitionIdRequest,
) -> Result<TaskDefinitionResponse, EcsError> {
    let id = req
        .task_definition
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskDefinition is required".to_string()))?;
    let task_def = resolve_task_definition(state, &id).await?;
    Ok(TaskDefinitionResponse {
        task_definition: to_wire(state, &task_def),
    })
}

pub async fn list_task_definitions(
    state: &AppState,
    req: ListTaskDefinitionsRequest,
) -> Result<ListTaskDefinitionsResponse, EcsError> {
    let revision_desc = req
        .sort
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("DESC"));
    let status = req.status.as_deref().unwrap_or("ACTIVE");
    let (task_definition_arns, next_token) = store::task_definitions::list_arns(
        &state.db,
        req.family_prefix.as_deref(),
        Some(status),
        revision_desc,
        req.max_results,
        req.next_token.as_deref(),
    )
    .await?;
    Ok(ListTaskDefinitionsResponse {
        task_definition_arns,
        next_token,
    })
}

pub async fn list_task_definition_families(
    state: &AppState,
    req: ListTaskDefinitionFamiliesRequest,
) -> Result<ListTaskDefinitionFamiliesResponse, EcsError> {
    let (families, next_token) = store::task_definitions::list_families(
        &state.db,
        req.family_prefix.as_deref(),
        req.status.as_deref(),
        req.max_results,
        req.next_token.as_deref(),
    )
    .await?;
    Ok(ListTaskDefinitionFamiliesResponse {
        families,
        next_token,
    })
}
