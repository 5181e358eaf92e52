use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    CapacityProviderStrategyItem, Failure, Tag, blob_value, epoch_secs, to_blob,
};
use super::{resolve_cluster, resolve_task_definition};
use crate::server::AppState;
use kecs_core::error::EcsError;
use kecs_core::models::{Service, ServiceDeployment, now_ms, status};
use kecs_core::store;
use kecs_orchestrator::Job;

const CACHE_KIND: &str = "service";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateServiceRequest {
    pub cluster: Option<String>,
    pub service_name: Option<String>,
    pub task_definition: Option<String>,
    pub desired_count: Option<i64>,
    pub launch_type: Option<String>,
    pub platform_version: Option<String>,
    pub scheduling_strategy: Option<String>,
    pub deployment_configuration: Option<Value>,
    pub network_configuration: Option<Value>,
    pub placement_constraints: Option<Value>,
    pub placement_strategy: Option<Value>,
    pub capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
    pub load_balancers: Option<Value>,
    pub service_registries: Option<Value>,
    pub service_connect_configuration: Option<Value>,
    pub role: Option<String>,
    pub enable_ecs_managed_tags: Option<bool>,
    pub propagate_tags: Option<String>,
    pub enable_execute_command: Option<bool>,
    pub health_check_grace_period_seconds: Option<i64>,
    pub tags: Option<Vec<Tag>>,
    pub client_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub service: WireService,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateServiceRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub desired_count: Option<i64>,
    pub task_definition: Option<String>,
    pub deployment_configuration: Option<Value>,
    pub network_configuration: Option<Value>,
    pub placement_constraints: Option<Value>,
    pub placement_strategy: Option<Value>,
    pub capacity_provider_strategy: Option<Vec<CapacityProviderStrategyItem>>,
    pub platform_version: Option<String>,
    pub force_new_deployment: Option<bool>,
    pub health_check_grace_period_seconds: Option<i64>,
    pub enable_execute_command: Option<bool>,
    pub load_balancers: Option<Value>,
    pub service_registries: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteServiceRequest {
    pub cluster: Option<String>,
    pub service: Option<String>,
    pub force: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DescribeServicesRequest {
    pub cluster: Option<String>,
    pub services: Option<Vec<String>>,
    pub include: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DescribeServicesResponse {
    pub services: Vec<WireService>,
    pub failures: Vec<Failure>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListServicesRequest {
    pub cluster: Option<String>,
    pub launch_type: Option<String>,
    pub scheduling_strategy: Option<String>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListServicesResponse {
    pub service_arns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireService {
    pub service_arn: String,
    pub service_name: String,
    pub cluster_arn: String,
    pub task_definition: String,
    pub desired_count: i64,
    pub running_count: i64,
    pub pending_count: i64,
    pub launch_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<String>,
    pub status: String,
    pub scheduling_strategy: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_configuration: Option<Value>,
    pub deployments: Vec<ServiceDeployment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_configuration: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_constraints: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placement_strategy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_provider_strategy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancers: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_registries: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_arn: Option<String>,
    pub enable_ecs_managed_tags: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub propagate_tags: Option<String>,
    pub enable_execute_command: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_grace_period_seconds: Option<i64>,
    pub created_at: f64,
}

fn to_wire(state: &AppState, service: &Service) -> WireService {
    let cache = &state.cache;
    let id = &service.arn;
    WireService {
        service_arn: service.arn.clone(),
        service_name: service.service_name.clone(),
        cluster_arn: service.cluster_arn.clone(),
        task_definition: service.task_definition_arn.clone(),
        desired_count: service.desired_count,
        running_count: service.running_count,
        pending_count: service.pending_count,
        launch_type: service.launch_type.clone(),
        platform_version: service.platform_version.clone(),
        status: service.status.clone(),
        scheduling_strategy: service.scheduling_strategy.clone(),
        deployment_configuration: blob_value(
            cache,
            CACHE_KIND,
            id,
            "deployment_configuration",
            service.deployment_configuration.as_deref(),
        ),
        deployments: service.deployment_list(),
        network_configuration: blob_value(
            cache,
            CACHE_KIND,
            id,
            "network_configuration",
            service.network_configuration.as_deref(),
        ),
        placement_constraints: blob_value(
            cache,
            CACHE_KIND,
            id,
            "placement_constraints",
            service.placement_constraints.as_deref(),
        ),
        placement_strategy: blob_value(
            cache,
            CACHE_KIND,
            id,
            "placement_strategy",
            service.placement_strategy.as_deref(),
        ),
        capacity_provider_strategy: blob_value(
            cache,
            CACHE_KIND,
            id,
            "capacity_provider_strategy",
            service.capacity_provider_strategy.as_deref(),
        ),
        load_balancers: blob_value(
            cache,
            CACHE_KIND,
            id,
            "load_balancers",
            service.load_balancers.as_deref(),
        ),
        service_registries: blob_value(
            cache,
            CACHE_KIND,
            id,
            "service_registries",
            service.service_registries.as_deref(),
        ),
        tags: blob_value(cache, CACHE_KIND, id, "tags", service.tags.as_deref()),
        role_arn: service.role_arn.clone(),
        enable_ecs_managed_tags: service.enable_ecs_managed_tags,
        propagate_tags: service.propagate_tags.clone(),
        enable_execute_command: service.enable_execute_command,
        health_check_grace_period_seconds: service.health_check_grace_period_seconds,
        created_at: epoch_secs(service.created_at),
    }
}

fn initial_deployment(service: &Service) -> ServiceDeployment {
    let now = epoch_secs(now_ms());
    ServiceDeployment {
        id: format!("ecs-svc/{}", uuid::Uuid::new_v4().simple()),
        status: status::PRIMARY.to_string(),
        task_definition: service.task_definition_arn.clone(),
        desired_count: service.desired_count,
        pending_count: service.desired_count,
        running_count: 0,
        rollout_state: status::IN_PROGRESS.to_string(),
        rollout_state_reason: Some("ECS deployment in progress.".to_string()),
        launch_type: Some(service.launch_type.clone()),
        created_at: now,
        updated_at: now,
    }
}

pub async fn create_service(
    state: &AppState,
    req: CreateServiceRequest,
) -> Result<ServiceResponse, EcsError> {
    let service_name = req
        .service_name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("serviceName is required".to_string()))?;
    let task_definition = req
        .task_definition
        .clone()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| EcsError::MissingParameter("taskDefinition is required".to_string()))?;

    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let task_def = resolve_task_definition(state, &task_definition).await?;

    let now = now_ms();
    let mut service = Service {
        arn: state.arn.service(&cluster.name, &service_name),
        service_name: service_name.clone(),
        cluster_arn: cluster.arn.clone(),
        task_definition_arn: task_def.arn.clone(),
        desired_count: req.desired_count.unwrap_or(1).max(0),
        running_count: 0,
        pending_count: 0,
        launch_type: req.launch_type.unwrap_or_else(|| "FARGATE".to_string()),
        platform_version: req.platform_version,
        status: status::ACTIVE.to_string(),
        scheduling_strategy: req
            .scheduling_strategy
            .unwrap_or_else(|| "REPLICA".to_string()),
        deployment_configuration: to_blob(&req.deployment_configuration)?,
        deployments: None,
        network_configuration: to_blob(&req.network_configuration)?,
        placement_constraints: to_blob(&req.placement_constraints)?,
        placement_strategy: to_blob(&req.placement_strategy)?,
        capacity_provider_strategy: to_blob(&req.capacity_provider_strategy)?,
        load_balancers: to_blob(&req.load_balancers)?,
        service_registries: to_blob(&req.service_registries)?,
        service_connect_configuration: to_blob(&req.service_connect_configuration)?,
        tags: to_blob(&req.tags)?,
        role_arn: req.role,
        enable_ecs_managed_tags: req.enable_ecs_managed_tags.unwrap_or(false),
        propagate_tags: req.propagate_tags,
        enable_execute_command: req.enable_execute_command.unwrap_or(false),
        health_check_grace_period_seconds: req.health_check_grace_period_seconds,
        created_at: now,
        updated_at: now,
    };
    service.pending_count = service.desired_count;
    let deployment = initial_deployment(&service);
    service.deployments = Some(
        serde_json::to_string(&vec![deployment])
            .map_err(|err| EcsError::Internal(anyhow::Error::new(err)))?,
    );

    store::services::create(&state.db, &service).await?;
    store::clusters::adjust_counters(&state.db, &cluster.name, 1, 0, 0).await?;
    state.orch.enqueue(Job::ProjectService {
        cluster_name: cluster.name.clone(),
        service_arn: service.arn.clone(),
    });

    Ok(ServiceResponse {
        service: to_wire(state, &service),
    })
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

/// Partial update: only provided fields mutate.
pub async fn update_service(
    state: &AppState,
    req: UpdateServiceRequest,
) -> Result<ServiceResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let mut service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;

    let mut reproject = req.force_new_deployment.unwrap_or(false);
    if let Some(task_definition) = &req.task_definition {
        let task_def = resolve_task_definition(state, task_definition).await?;
        if task_def.arn != service.task_definition_arn {
            service.task_definition_arn = task_def.arn;
            reproject = true;
        }
    }
    if let Some(desired_count) = req.desired_count {
        if desired_count != service.desired_count {
            service.desired_count = desired_count.max(0);
            reproject = true;
        }
    }
    if req.deployment_configuration.is_some() {
        service.deployment_configuration = to_blob(&req.deployment_configuration)?;
    }
    if req.network_configuration.is_some() {
        service.network_configuration = to_blob(&req.network_configuration)?;
    }
    if req.placement_constraints.is_some() {
        service.placement_constraints = to_blob(&req.placement_constraints)?;
    }
    if req.placement_strategy.is_some() {
        service.placement_strategy = to_blob(&req.placement_strategy)?;
    }
    if req.capacity_provider_strategy.is_some() {
        service.capacity_provider_strategy = to_blob(&req.capacity_provider_strategy)?;
    }
    if req.load_balancers.is_some() {
        service.load_balancers = to_blob(&req.load_balancers)?;
    }
    if req.service_registries.is_some() {
        service.service_registries = to_blob(&req.service_registries)?;
    }
    if let Some(platform_version) = req.platform_version {
        service.platform_version = Some(platform_version);
    }
    if let Some(grace) = req.health_check_grace_period_seconds {
        service.health_check_grace_period_seconds = Some(grace);
    }
    if let Some(enable) = req.enable_execute_command {
        service.enable_execute_command = enable;
    }

    service.updated_at = now_ms();
    store::services::update(&state.db, &service).await?;
    state.cache.invalidate(CACHE_KIND, &service.arn);
    if reproject {
        state.orch.enqueue(Job::ProjectService {
            cluster_name: cluster.name.clone(),
            service_arn: service.arn.clone(),
        });
    }

    Ok(ServiceResponse {
        service: to_wire(state, &service),
    })
}

pub async fn delete_service(
    state: &AppState,
    req: DeleteServiceRequest,
) -> Result<ServiceResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let mut service = resolve_service(state, &cluster.arn, req.service.as_deref()).await?;

    let force = req.force.unwrap_or(false);
    if !force && (service.desired_count > 0 || service.running_count > 0) {
        return Err(EcsError::InvalidParameter(
            "The service cannot be stopped while it is scaled above 0.".to_string(),
        ));
    }
    if force {
        service.desired_count = 0;
    }
    service.status = status::DRAINING.to_string();
    service.updated_at = now_ms();
    let response = ServiceResponse {
        service: to_wire(state, &service),
    };

    store::services::delete(&state.db, &service.arn).await?;
    store::tags::remove_all(&state.db, &service.arn).await?;
    store::clusters::adjust_counters(&state.db, &cluster.name, -1, 0, 0).await?;
    state.cache.invalidate(CACHE_KIND, &service.arn);
    state.orch.enqueue(Job::RemoveService {
        cluster_name: cluster.name.clone(),
        service_name: service.service_name.clone(),
    });

    Ok(response)
}

pub async fn describe_services(
    state: &AppState,
    req: DescribeServicesRequest,
) -> Result<DescribeServicesResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let mut services = Vec::new();
    let mut failures = Vec::new();
    for id in req.services.unwrap_or_default() {
        if id.is_empty() {
            failures.push(Failure::missing(""));
            continue;
        }
        let name = kecs_core::arn::extract_service_name(&id);
        match store::services::get(&state.db, &cluster.arn, name).await? {
            Some(service) => services.push(to_wire(state, &service)),
            None => failures.push(Failure::missing(id)),
        }
    }
    Ok(DescribeServicesResponse { services, failures })
}

pub async fn list_services(
    state: &AppState,
    req: ListServicesRequest,
) -> Result<ListServicesResponse, EcsError> {
    let cluster = resolve_cluster(state, req.cluster.as_deref()).await?;
    let (services, next_token) = store::services::list_page(
        &state.db,
        &cluster.arn,
        req.launch_type.as_deref(),
        req.scheduling_strategy.as_deref(),
        req.max_results,
        req.next_token.as_deref(),
    )
    .await?;
    Ok(ListServicesResponse {
        service_arns: services.into_iter().map(|s| s.arn).collect(),
        next_token,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::clusters::{CreateClusterRequest, create_cluster};
    use crate::api::task_definitions::tests::register_simple;
    use crate::server::{AppState, test_state};

    pub(crate) async fn setup_cluster_and_task_def(state: &AppState) {
        create_cluster(
            state,
            CreateClusterRequest {
                cluster_name: Some("default".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        register_simple(state, "web").await;
    }

    pub(crate) async fn create_simple(state: &AppState, name: &str) -> WireService {
        create_service(
            state,
            CreateServiceRequest {
                service_name: Some(name.to_string()),
                task_definition: Some("web".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .service
    }

    #[tokio::test]
    async fn test_create_service_defaults() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;

        let service = create_simple(&state, "api").await;
        assert_eq!(
            service.service_arn,
            "arn:aws:ecs:us-east-1:123456789012:service/default/api"
        );
        assert_eq!(service.launch_type, "FARGATE");
        assert_eq!(service.scheduling_strategy, "REPLICA");
        assert_eq!(service.desired_count, 1);
        assert_eq!(service.status, "ACTIVE");
        // Latest ACTIVE revision resolved from the bare family
        assert!(service.task_definition.ends_with("web:1"));
        assert_eq!(service.deployments.len(), 1);
        assert_eq!(service.deployments[0].status, "PRIMARY");
        assert_eq!(service.deployments[0].rollout_state, "IN_PROGRESS");

        let cluster = store::clusters::get(&state.db, "default").await.unwrap().unwrap();
        assert_eq!(cluster.active_services_count, 1);
    }

    #[tokio::test]
    async fn test_create_service_requires_name_and_task_definition() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;

        let err = create_service(
            &state,
            CreateServiceRequest {
                task_definition: Some("web".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EcsError::MissingParameter(_)));

        let err = create_service(
            &state,
            CreateServiceRequest {
                service_name: Some("api".to_string()),
                task_definition: Some("missing-family".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EcsError::ResourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_service_is_partial() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;

        let updated = update_service(
            &state,
            UpdateServiceRequest {
                service: Some("api".to_string()),
                desired_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.service.desired_count, 3);
        // Untouched fields survive
        assert_eq!(updated.service.launch_type, "FARGATE");
        assert!(updated.service.task_definition.ends_with("web:1"));
    }

    #[tokio::test]
    async fn test_delete_service_force_semantics() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "api").await;

        // desired_count is 1, so a plain delete refuses
        let err = delete_service(
            &state,
            DeleteServiceRequest {
                service: Some("api".to_string()),
                force: None,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("scaled above 0"));

        let deleted = delete_service(
            &state,
            DeleteServiceRequest {
                service: Some("api".to_string()),
                force: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(deleted.service.status, "DRAINING");
        assert_eq!(deleted.service.desired_count, 0);

        let cluster = store::clusters::get(&state.db, "default").await.unwrap().unwrap();
        assert_eq!(cluster.active_services_count, 0);

        let described = describe_services(
            &state,
            DescribeServicesRequest {
                services: Some(vec!["api".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(described.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_complex_fields_survive_create_describe() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;

        let network = serde_json::json!({
            "awsvpcConfiguration": {
                "subnets": ["subnet-12345"],
                "securityGroups": ["sg-1"],
                "assignPublicIp": "ENABLED"
            }
        });
        let load_balancers = serde_json::json!([
            {"targetGroupArn": "arn:aws:elasticloadbalancing:us-east-1:123456789012:targetgroup/tg/1", "containerName": "app", "containerPort": 80}
        ]);
        create_service(
            &state,
            CreateServiceRequest {
                service_name: Some("api".to_string()),
                task_definition: Some("web".to_string()),
                network_configuration: Some(network.clone()),
                load_balancers: Some(load_balancers.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let described = describe_services(
            &state,
            DescribeServicesRequest {
                services: Some(vec!["api".to_string()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(described.services[0].network_configuration, Some(network));
        assert_eq!(described.services[0].load_balancers, Some(load_balancers));
    }

    #[tokio::test]
    async fn test_list_services_by_arn_and_filters() {
        let state = test_state();
        setup_cluster_and_task_def(&state).await;
        create_simple(&state, "alpha").await;
        create_simple(&state, "bravo").await;

        let listed = list_services(&state, ListServicesRequest::default()).await.unwrap();
        assert_eq!(listed.service_arns.len(), 2);

        let filtered = list_services(
            &state,
            ListServicesRequest {
                launch_type: Some("EC2".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert!(filtered.service_arns.is_empty());
    }
}
