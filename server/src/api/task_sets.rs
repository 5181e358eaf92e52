use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    CapacityProviderStrategyItem, Failure, Scale, Tag, blob_value, epoch_secs, to_blob,
};
use super::{resolve_cluster, resolve_task_definition};
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::{Service, TaskSet, now_ms, status};
use kecs_core::store;

const CACHE_KIND: &str = "task-set";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateTaskSetRequest {
    pub service: Option<String>,
    pub cluster: Option<String>,
    pub task_definition: Option<String>,
    pub external_id: Option<String>,
    pub launch_type: Option<String>,
    pub platform_version: Option<String>,
    pub scale: Option<Scale>,
    pub network_configuration: Option<Value>,
    pub load_balancers: Option<Value>,
    pub service_registries: Option<Value>,
    pub capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
    pub client_token: Option<String>,
    pub tags: Option<Vec<Tag>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSetResponse {
    pub task_set: WireTaskSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_set: Option<String>,
    pub scale: Option<Scale>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteTaskSetRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_set: Option<String>,
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeTaskSetsRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub task_sets: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeTaskSetsResponse {
    pub task_sets: Vec<WireTaskSet>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireTaskSet {
    pub id: String,
    pub task_set_arn: String,
    pub service_arn: String,
    pub cluster_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub status: String,
    pub task_definition: String,
    pub computed_desired_count: i64,
    pub pending_count: i64,
    pub running_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    pub scale: Scale,
    pub stability_status: String,
    pub stability_status_at: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_registries: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider_strategy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    pub created_at: f64,
    pub updated_at: f64,
}

fn to_wire(state: &AppState, task_set: &TaskSet) -> WireTaskSet {
    let cache = &state.cache;
    let id = &task_set.arn;
    WireTaskSet {
        id: task_set.id.clone(),
        task_set_arn: task_set.arn.clone(),
        service_arn: task_set.service_arn.clone(),
        cluster_arn: task_set.cluster_arn.clone(),
        external_id: task_set.external_id.clone(),
        status: task_set.status.clone(),
        task_definition: task_set.task_definition.clone(),
        computed_desired_count: task_set.computed_desired_count,
        pending_count: task_set.pending_count,
        running_count: task_set.running_count,
        launch_type: task_set.launch_type.clone(),
        platform_version: task_set.platform_version.clone(),
        scale: Scale {
            value: Some(task_set.scale_value),
            unit: Some(task_set.scale_unit.clone()),
        },
        stability_status: task_set.stability_status.clone(),
        stability_status_at: epoch_secs(task_set.stability_status_at),
        network_configuration: blob_value(
            cache,
            CACHE_KIND,
            id,
            "network_configuration",
            task_set.network_configuration.as_deref(),
        ),
        load_balancers: blob_value(
            cache,
            CACHE_KIND,
            id,
            "load_balancers",
            task_set.load_balancers.as_deref(),
        ),
        service_registries: blob_value(
            cache,
            CACHE_KIND,
            id,
            "service_registries",
            task_set.service_registries.as_deref(),
        ),
        capacity_provider_strategy: blob_value(
            cache,
            CACHE_KIND,
            id,
            "capacity_provider_strategy",
            task_set.capacity_provider_strategy.as_deref(),
        ),
        tags: blob_value(cache, CACHE_KIND, id, "tags", task_set.tags.as_deref()),
        created_at: epoch_secs(task_set.created_at),
        updated_at: epoch_secs(task_set.updated_at),
    }
}

/// Scale is always PERCENT in [0, 100]; absent scale defaults to 100.
fn normalize_scale(scale: Option<Scale>) -> Result<f64, EcsError> {
    let value = scale.and_then(|s| s.value).unwrap_or(100.0);
    if !(0.0..=100.0).contains(&value) {
        return Err(EcsError::InvalidParameter(format!(
            "Scale value must be between 0 and 100, got: {value}"
        )));
    }
    Ok(value)
}

fn computed_count(service: &Service, scale_value: f64) -> i64 {
    ((service.desired_count as f64) * scale_value / 100.0).round() as i64
}

async fn resolve_service(
    state: &AppState,
    cluster_arn: &str,
    id: Option<&str>,
) -> Result<Service, EcsError> {
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("service is required".to_string()))?;
    let name = kecs_core::arn::extract_service_name(id);
    store::services::get(&state.db, cluster_arn, name)
        .await?
        .ok_or_else(EcsError::service_not_found)
}

pub async fn create_task_set(
    state: &AppState,
    req: CreateTaskSetRequest,
) -> Result<TaskSetResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;
    let task_definition = req
        .task_definition
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskDefinition is required".to_string()))?;
    let task_def = resolve_task_definition(state, &task_definition).await?;

    let scale_value = normalize_scale(req.scale)?;
    let id = format!("ts-{}", uuid::Uuid::new_v4().simple());
    let now = now_ms();
    let task_set = TaskSet {
        arn: state
            .arn
            .task_set(&cluster.name, &service.service_name, &id),
        id,
        service_arn: service.arn.clone(),
        cluster_arn: cluster.arn.clone(),
        external_id: req.external_id,
        task_definition: task_def.arn,
        launch_type: req.launch_type,
        platform_version: req.platform_version,
        scale_value,
        scale_unit: "PERCENT".to_string(),
        status: status::ACTIVE.to_string(),
        stability_status: status::STEADY_STATE.to_string(),
        computed_desired_count: computed_count(&service, scale_value),
        running_count: 0,
        pending_count: 0,
        network_configuration: to_blob(&req.network_configuration)?,
        load_balancers: to_blob(&req.load_balancers)?,
        service_registries: to_blob(&req.service_registries)?,
        capacity_provider_strategy: to_blob(&req.capacity_provider_strategy)?,
        tags: to_blob(&req.tags)?,
        created_at: now,
        updated_at: now,
        stability_status_at: now,
    };
    store::task_sets::create(&state.db, &task_set).await?;

    Ok(TaskSetResponse {
        task_set: to_wire(state, &task_set),
    })
}

async fn resolve_task_set(
    state: &AppState,
    service_arn: &str,
    id: Option<&str>,
) -> Result<TaskSet, EcsError> {
    let id = id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskSet is required".to_string()))?;
    let ts_id = kecs_core::arn::extract_task_id(id);
    store::task_sets::get(&state.db, service_arn, ts_id)
        .await?
        .ok_or_else(|| EcsError::TaskSetNotFound(format!("Task set not found: {id}")))
}

/// Replacing the scale moves the set to STABILIZING until the substrate
/// converges on the new computed count.
pub async fn update_task_set(
    state: &AppState,
    req: UpdateTaskSetRequest,
) -> Result<TaskSetResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;
    let mut task_set = resolve_task_set(state, &service.arn, req.task_set.as_deref()).await?;

    let scale = req
        .scale
        .ok_or_else(|| EcsError::MissingParameter("scale is required".to_string()))?;
    let scale_value = normalize_scale(Some(scale))?;

    let now = now_ms();
    task_set.scale_value = scale_value;
    task_set.scale_unit = "PERCENT".to_string();
    task_set.computed_desired_count = computed_count(&service, scale_value);
    task_set.stability_status = status::STABILIZING.to_string();
    task_set.stability_status_at = now;
    task_set.updated_at = now;
    store::task_sets::update(&state.db, &task_set).await?;
    state.cache.invalidate(CACHE_KIND, &task_set.arn);

    Ok(TaskSetResponse {
        task_set: to_wire(state, &task_set),
    })
}

/// Transitions to DRAINING; with force the record is removed and the
/// response reports INACTIVE.
pub async fn delete_task_set(
    state: &AppState,
    req: DeleteTaskSetRequest,
) -> Result<TaskSetResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;
    let mut task_set = resolve_task_set(state, &service.arn, req.task_set.as_deref()).await?;

    task_set.status = status::DRAINING.to_string();
    task_set.updated_at = now_ms();
    store::task_sets::update(&state.db, &task_set).await?;

    if req.force.unwrap_or(false) {
        store::task_sets::delete(&state.db, &service.arn, &task_set.id).await?;
        task_set.status = status::INACTIVE.to_string();
    }
    state.cache.invalidate(CACHE_KIND, &task_set.arn);

    Ok(TaskSetResponse {
        task_set: to_wire(state, &task_set),
    })
}

pub async fn describe_task_sets(
    state: &AppState,
    req: DescribeTaskSetsRequest,
) -> Result<DescribeTaskSetsResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;

    let mut task_sets = Vec::new();
    let mut failures = Vec::new();
    let identifiers = req.task_sets.unwrap_or_default();
    if identifiers.is_empty() {
        for task_set in store::task_sets::list_by_service(&state.db, &service.arn).await? {
            task_sets.push(to_wire(state, &task_set));
        }
        return Ok(DescribeTaskSetsResponse { task_sets, failures });
    }
    for id in identifiers {
        if id.is_empty() {
            failures.push(Failure::missing(""));
            continue;
        }
        let ts_id = kecs_core::arn::extract_task_id(&id);
        match store::task_sets::get(&state.db, &service.arn, ts_id).await? {
            Some(task_set) => task_sets.push(to_wire(state, &task_set)),
            None => failures.push(Failure::missing(id)),
        }
    }
    Ok(DescribeTaskSetsResponse { task_sets, failures })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::services::tests::{create_simple, setup_cluster_and_task_def};
    use crate::server::test_state;

    async fn create_default_task_set(state: &crate::server::AppState) -> WireTaskSet {
        create_task_set(
            state,
            CreateTaskSetRequest {
                service: Some("api".to_string()),
                task_definition: Some("web".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .task_set
    }

    #[tokio::test]
    async fn test_create_defaults_scale_to_100_percent() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;

        let task_set = create_default_task_set(&state).await;
        assert!(task_set.id.starts_with("ts-"));
        assert_eq!(task_set.scale.value, Some(100.0));
        assert_eq!(task_set.scale.unit.as_deref(), Some("PERCENT"));
        assert_eq!(task_set.stability_status, "STEADY_STATE");
        assert_eq!(task_set.status, "ACTIVE");
        assert_eq!(task_set.computed_desired_count, 1);
        assert!(
            task_set
                .task_set_arn
                .contains(":task-set/default/api/ts-")
        );
    }

    #[tokio::test]
    async fn test_create_requires_an_existing_service() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;

        let err = create_task_set(
            &state,
            CreateTaskSetRequest {
                service: Some("ghost".to_string()),
                task_definition: Some("web".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EcsError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_scale_moves_to_stabilizing() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;
        let created = create_default_task_set(&state).await;

        let updated = update_task_set(
            &state,
            UpdateTaskSetRequest {
                service: Some("api".to_string()),
                task_set: Some(created.id.clone()),
                scale: Some(Scale {
                    value: Some(50.0),
                    unit: Some("PERCENT".to_string()),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.task_set.scale.value, Some(50.0));
        assert_eq!(updated.task_set.stability_status, "STABILIZING");

        // Persisted, not just echoed
        let stored = store::task_sets::get(&state.db, &created.service_arn, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.scale_value, 50.0);
        assert_eq!(stored.stability_status, "STABILIZING");
    }

    #[tokio::test]
    async fn test_scale_range_is_validated() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;

        let err = create_task_set(
            &state,
            CreateTaskSetRequest {
                service: Some("api".to_string()),
                task_definition: Some("web".to_string()),
                scale: Some(Scale {
                    value: Some(150.0),
                    unit: Some("PERCENT".to_string()),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EcsError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn test_delete_drains_then_force_removes() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;
        let created = create_default_task_set(&state).await;

        let drained = delete_task_set(
            &state,
            DeleteTaskSetRequest {
                service: Some("api".to_string()),
                task_set: Some(created.id.clone()),
                force: None,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(drained.task_set.status, "DRAINING");

        let removed = delete_task_set(
            &state,
            DeleteTaskSetRequest {
                service: Some("api".to_string()),
                task_set: Some(created.id.clone()),
                force: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(removed.task_set.status, "INACTIVE");
        assert!(
            store::task_sets::get(&state.db, &created.service_arn, &created.id)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_describe_task_sets_with_failures() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;
        let created = create_default_task_set(&state).await;

        let described = describe_task_sets(
            &state,
            DescribeTaskSetsRequest {
                service: Some("api".to_string()),
                task_sets: Some(vec![created.id.clone(), "ts-missing".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(described.task_sets.len(), 1);
        assert_eq!(described.failures.len(), 1);
        assert_eq!(described.failures[0].arn, "ts-missing");
    }
}
